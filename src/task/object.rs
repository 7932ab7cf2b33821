use std::path::PathBuf;
use std::time::SystemTime;

use teloxide::types::{ChatId, MessageId, UserId};
use tokio_util::sync::CancellationToken;

use super::config::ToolConfig;
use super::id::TaskId;
use super::kind::TaskKind;
use super::stage::Stage;

pub const TASKS_ROOT: &str = "./tasks";

/// An input descriptor: a platform message reference, a URL, or a magnet
/// link, carrying a stable index so order survives the whole pipeline
/// (§3 `inputs`, §8 property 4).
#[derive(Debug, Clone)]
pub enum InputRef {
    Message { chat_id: ChatId, message_id: MessageId },
    Url(url::Url),
    Magnet(String),
}

/// The central entity (§3). Pure data plus the helper predicates named in
/// §4.B; mutated only by the single task driving its pipeline, matching the
/// teacher's `task/download.rs`/`task/state.rs` ownership model generalised
/// from a 3-variant chat flow to the full pipeline.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub owner: UserId,
    pub chat: ChatId,
    pub kind: TaskKind,
    pub stage: Stage,
    pub requested_count: usize,
    pub output_name: String,
    pub inputs: Vec<InputRef>,
    pub downloaded: Vec<(usize, PathBuf)>,
    pub config: Option<ToolConfig>,
    pub cancel_token: CancellationToken,
    pub work_dir: PathBuf,
    pub created_at: SystemTime,
    pub status_message: Option<MessageId>,
    download_tasks_started: usize,
    download_tasks_completed: usize,
}

impl Task {
    /// Construction normalises `output_name` and creates `work_dir`
    /// (§4.B). The caller is responsible for registering the result with
    /// the `TaskRegistry` — construction and registration are kept separate
    /// so tests can build a `Task` without touching the global registry.
    pub fn new(id: TaskId, owner: UserId, chat: ChatId, kind: TaskKind, output_name: String) -> std::io::Result<Self> {
        Task::new_under(std::path::Path::new(TASKS_ROOT), id, owner, chat, kind, output_name)
    }

    /// Same as [`Task::new`] but rooted at a caller-supplied directory
    /// instead of `TASKS_ROOT`, so tests can exercise the extension-append
    /// behaviour without relying on the process's current directory.
    pub fn new_under(root: &std::path::Path, id: TaskId, owner: UserId, chat: ChatId, kind: TaskKind, mut output_name: String) -> std::io::Result<Self> {
        if std::path::Path::new(&output_name).extension().is_none() {
            output_name.push('.');
            output_name.push_str(kind.default_extension());
        }
        let work_dir = root.join(id.as_str());
        std::fs::create_dir_all(&work_dir)?;
        Ok(Task {
            id,
            owner,
            chat,
            kind,
            stage: Stage::CommandReceived,
            requested_count: 0,
            output_name,
            inputs: Vec::new(),
            downloaded: Vec::new(),
            config: None,
            cancel_token: CancellationToken::new(),
            work_dir,
            created_at: SystemTime::now(),
            status_message: None,
            download_tasks_started: 0,
            download_tasks_completed: 0,
        })
    }

    pub fn is_cancellable(&self) -> bool {
        self.stage.is_cancellable()
    }

    pub fn downloads_started(&self) -> usize {
        self.download_tasks_started
    }

    pub fn downloads_completed(&self) -> usize {
        self.download_tasks_completed
    }

    pub fn mark_download_started(&mut self) {
        self.download_tasks_started += 1;
    }

    pub fn mark_download_completed(&mut self) {
        self.download_tasks_completed += 1;
    }

    /// Advances `stage`, enforcing monotonicity (§3 invariant 4, §8 property
    /// 2). Panics on an illegal transition: every call site advances the
    /// pipeline by construction, so a violation here is a programming error,
    /// not a runtime condition to recover from.
    pub fn advance_stage(&mut self, next: Stage) {
        assert!(
            self.stage.can_advance_to(next),
            "illegal stage transition {:?} -> {:?} for task {}",
            self.stage,
            next,
            self.id,
        );
        self.stage = next;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Test-only constructor that skips directory creation on `TASKS_ROOT`
    /// in favour of a caller-supplied `work_dir`, used by other modules'
    /// `#[cfg(test)]` fixtures that need a `Task` without cwd-dependent I/O.
    #[cfg(test)]
    pub fn new_for_test(id: TaskId, owner: UserId, chat: ChatId, kind: TaskKind, work_dir: PathBuf) -> Self {
        Task {
            id,
            owner,
            chat,
            kind,
            stage: Stage::CommandReceived,
            requested_count: 0,
            output_name: "out.mp4".to_string(),
            inputs: Vec::new(),
            downloaded: Vec::new(),
            config: None,
            cancel_token: CancellationToken::new(),
            work_dir,
            created_at: SystemTime::now(),
            status_message: None,
            download_tasks_started: 0,
            download_tasks_completed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_task(dir: &tempfile::TempDir) -> Task {
        let id = TaskId::random();
        let work_dir = dir.path().join(id.as_str());
        std::fs::create_dir_all(&work_dir).unwrap();
        Task::new_for_test(id, UserId(1), ChatId(1), TaskKind::Leech, work_dir)
    }

    #[test]
    fn output_name_gets_extension_appended_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new_under(dir.path(), TaskId::random(), UserId(1), ChatId(1), TaskKind::Leech, "out".to_string()).unwrap();
        assert_eq!(task.output_name, "out.mp4");
    }

    #[test]
    fn output_name_is_left_alone_when_extension_present() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new_under(dir.path(), TaskId::random(), UserId(1), ChatId(1), TaskKind::Leech, "out.mkv".to_string()).unwrap();
        assert_eq!(task.output_name, "out.mkv");
    }

    #[test]
    #[should_panic(expected = "illegal stage transition")]
    fn advance_stage_panics_on_illegal_transition() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = test_task(&dir);
        task.advance_stage(Stage::Completed);
    }

    #[test]
    fn advance_stage_accepts_legal_transition() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = test_task(&dir);
        task.advance_stage(Stage::ToolSelectionPending);
        assert_eq!(task.stage, Stage::ToolSelectionPending);
    }
}
