use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use teloxide::types::{ChatId, UserId};
use tokio::sync::oneshot;

use crate::error::{EngineError, EngineResult};
use crate::task::id::TaskId;
use crate::task::stage::Stage;
use crate::transport::ChatTransport;

/// What a single prompt step asks for (§4.I "a sequence of prompts, each
/// either (a) free-form text ... or (b) a closed set of options"). Grounded
/// on `leech.py`'s two waiting shapes: `client.ask(...)` for free text, the
/// tool-selection/audio-mode inline keyboards for closed options.
#[derive(Debug, Clone)]
pub enum PromptKind {
    FreeText,
    Options(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub kind: PromptKind,
    pub timeout: Duration,
}

/// What the user actually sent back, whichever half of the prompt they
/// answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserResponse {
    Text(String),
    Option(String),
}

/// Registers one outstanding prompt per task and lets whichever chat
/// handler later observes the matching text message or callback resolve
/// it. The teacher's own flow blocks inline inside one async function
/// (`leech.py`'s `while ...: sleep(0.5)` polling loop / `client.ask`);
/// this engine's dispatcher is event-driven per incoming update, so the
/// same "wait for the next matching reply" shape is expressed as a
/// registered waiter instead of a poll loop.
#[derive(Default)]
pub struct InteractiveRegistry {
    waiters: Mutex<HashMap<TaskId, oneshot::Sender<UserResponse>>>,
}

impl InteractiveRegistry {
    pub fn new() -> Self {
        InteractiveRegistry::default()
    }

    fn register(&self, task_id: TaskId) -> oneshot::Receiver<UserResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(task_id, tx);
        rx
    }

    /// Delivers `response` to the task's outstanding waiter, if any.
    /// Returns `false` when nothing was waiting (stale callback, already
    /// timed out, or task not in a prompting stage) — callers should treat
    /// that as "ignore, don't error".
    pub fn resolve(&self, task_id: TaskId, response: UserResponse) -> bool {
        if let Some(tx) = self.waiters.lock().unwrap().remove(&task_id) {
            tx.send(response).is_ok()
        } else {
            false
        }
    }

    fn cancel_wait(&self, task_id: TaskId) {
        self.waiters.lock().unwrap().remove(&task_id);
    }
}

/// One step of the bounded dialogue (§4.I): sends the prompt (with an
/// inline keyboard for `Options`), then waits up to `prompt.timeout` for a
/// matching response. A timeout is surfaced as a plain `UserInput` error —
/// callers drive the owning task to `Stage::Failed` and clean up on any
/// error from this function, so no separate error class is needed here.
pub async fn await_step<T: ChatTransport>(
    transport: &T,
    registry: &InteractiveRegistry,
    chat: ChatId,
    task_id: TaskId,
    prompt: &Prompt,
) -> EngineResult<UserResponse> {
    let rx = registry.register(task_id);

    match &prompt.kind {
        PromptKind::FreeText => {
            transport.send_text(chat, &prompt.text).await?;
        }
        PromptKind::Options(choices) => {
            let keyboard = options_keyboard(choices);
            transport.send_text_with_keyboard(chat, &prompt.text, keyboard).await?;
        }
    }

    match tokio::time::timeout(prompt.timeout, rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_recv_dropped)) => Err(EngineError::user_input("prompt was cancelled before a response arrived")),
        Err(_timeout) => {
            registry.cancel_wait(task_id);
            Err(EngineError::user_input(format!("task {task_id} timed out waiting for a response")))
        }
    }
}

fn options_keyboard(choices: &[String]) -> teloxide::types::InlineKeyboardMarkup {
    let buttons: Vec<Vec<teloxide::types::InlineKeyboardButton>> =
        choices.iter().map(|choice| vec![teloxide::types::InlineKeyboardButton::callback(choice.clone(), choice.clone())]).collect();
    teloxide::types::InlineKeyboardMarkup::new(buttons)
}

/// Matches an incoming callback/text to the task it belongs to (§4.I
/// "callbacks are matched to the owning task by scanning active tasks in a
/// suitable stage authored by the clicking user"). `tasks` is
/// `(task_id, owner, stage)` triples from the registry; the uniqueness
/// invariant (one prompting task per user) means at most one match should
/// ever exist, but this returns the first in iteration order defensively
/// rather than panicking on a duplicate.
pub fn find_owning_task<'a>(tasks: impl IntoIterator<Item = (TaskId, UserId, Stage)>, clicking_user: UserId, expected_stage: Stage) -> Option<TaskId> {
    tasks.into_iter().find(|(_, owner, stage)| *owner == clicking_user && *stage == expected_stage).map(|(id, _, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeChatTransport;

    #[tokio::test]
    async fn resolve_delivers_the_response_to_the_waiting_step() {
        let registry = InteractiveRegistry::new();
        let transport = FakeChatTransport::new();
        let task_id = TaskId::random();
        let prompt = Prompt { text: "pick one".to_string(), kind: PromptKind::Options(vec!["a".to_string(), "b".to_string()]), timeout: Duration::from_secs(5) };

        let registry_ref = &registry;
        let waiting = await_step(&transport, registry_ref, ChatId(1), task_id, &prompt);
        let resolving = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(registry_ref.resolve(task_id, UserResponse::Option("a".to_string())));
        };

        let (result, _) = tokio::join!(waiting, resolving);
        assert_eq!(result.unwrap(), UserResponse::Option("a".to_string()));
    }

    #[tokio::test]
    async fn unmatched_resolve_returns_false() {
        let registry = InteractiveRegistry::new();
        assert!(!registry.resolve(TaskId::random(), UserResponse::Text("done".to_string())));
    }

    #[tokio::test]
    async fn a_step_with_no_response_times_out() {
        let registry = InteractiveRegistry::new();
        let transport = FakeChatTransport::new();
        let task_id = TaskId::random();
        let prompt = Prompt { text: "type done".to_string(), kind: PromptKind::FreeText, timeout: Duration::from_millis(20) };

        let result = await_step(&transport, &registry, ChatId(1), task_id, &prompt).await;
        assert!(result.is_err());
    }

    #[test]
    fn find_owning_task_matches_on_both_user_and_stage() {
        let user = UserId(42);
        let task_id = TaskId::random();
        let tasks = vec![(TaskId::random(), UserId(1), Stage::WaitingForDone), (task_id, user, Stage::WaitingForDone), (TaskId::random(), user, Stage::Downloading)];
        assert_eq!(find_owning_task(tasks, user, Stage::WaitingForDone), Some(task_id));
    }
}
