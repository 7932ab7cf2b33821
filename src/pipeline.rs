//! Glue between the Orchestration Engine's components (A-L) and a concrete
//! chat transport: the part `engine.rs`'s handlers used to do inline,
//! generalised from a 3-state chat flow to the full pipeline driven by
//! `task::object::Task`/`task::stage::Stage`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::download_pool::{self, InputFetcher};
use crate::error::{EngineError, EngineResult};
use crate::fetch::{self, UrlStrategy};
use crate::misc::{cleanup_dir, directory_size};
use crate::quota::{QuotaStore, TierLimits};
use crate::task::object::{InputRef, Task};
use crate::task::stage::Stage;
use crate::tools::{self, StatusSink};
use crate::transport::ChatTransport;
use crate::uploader;

/// Resolves one `InputRef` to a single local file, per the Download Pool's
/// one-path-per-input contract (`download_pool::InputFetcher`). Tweet/
/// torrent adapters can yield several files for one input (§4.G); this
/// fetcher keeps only the first and logs the rest as dropped rather than
/// widening the pool's contract, since a `/leech` task's `inputs` are
/// expected to be one-file-each in the documented flows.
pub struct TaskInputFetcher<T: ChatTransport> {
    transport: Arc<T>,
    http: reqwest::Client,
    torrent: Option<fetch::torrent::TorrentRpcClient>,
}

impl<T: ChatTransport> TaskInputFetcher<T> {
    pub fn new(transport: Arc<T>, http: reqwest::Client, torrent: Option<fetch::torrent::TorrentRpcClient>) -> Self {
        TaskInputFetcher { transport, http, torrent }
    }
}

impl<T: ChatTransport> InputFetcher for TaskInputFetcher<T> {
    async fn fetch(&self, input: &InputRef, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<PathBuf> {
        match input {
            InputRef::Message { chat_id, message_id } => {
                let meta = self
                    .transport
                    .message(*chat_id, *message_id)
                    .ok_or_else(|| EngineError::user_input("replied-to message is no longer available"))?;
                let file_id = meta.file_id.ok_or_else(|| EngineError::user_input("replied-to message carries no file"))?;
                let file_name = meta.file_name.unwrap_or_else(|| "file".to_string());
                let dest = dest_dir.join(file_name);
                self.transport.download_file(&file_id, &dest).await?;
                Ok(dest)
            }
            InputRef::Url(url) => {
                if is_tweet_url(url) {
                    let strategy = fetch::tweet::TweetStrategy { client: self.http.clone(), proxy_base_url: url.clone() };
                    let mut outputs = strategy.fetch(url, dest_dir, cancel).await?;
                    if outputs.is_empty() {
                        return Err(EngineError::user_input("tweet carried no downloadable media"));
                    }
                    if outputs.len() > 1 {
                        warn!("tweet proxy returned {} items, keeping only the first", outputs.len());
                    }
                    return Ok(outputs.remove(0));
                }
                fetch::reject_if_too_large(&self.http, url).await?;
                let chain: Vec<UrlStrategy> = fetch::default_chain(self.http.clone());
                let mut outputs = fetch::try_strategies_in_order(&chain, url, dest_dir, cancel).await?;
                if outputs.is_empty() {
                    return Err(EngineError::user_input("no strategy could fetch this url"));
                }
                Ok(outputs.remove(0))
            }
            InputRef::Magnet(_) => {
                let client = self.torrent.as_ref().ok_or_else(|| EngineError::user_input("torrent RPC is not configured"))?;
                let mut outputs = fetch::torrent::fetch_via_torrent_rpc(client, input, dest_dir, cancel).await?;
                if outputs.is_empty() {
                    return Err(EngineError::user_input("torrent finished with no files to deliver"));
                }
                Ok(outputs.remove(0))
            }
        }
    }
}

fn is_tweet_url(url: &url::Url) -> bool {
    matches!(url.host_str(), Some(host) if host.ends_with("twitter.com") || host.ends_with("x.com"))
}

/// Reports tool progress by editing the task's status message in place,
/// the Rust side of `trackedmessage.rs`'s directory-size poller. No-ops
/// when the task never got a status message (no interactive step ran).
struct ChatStatusSink<'a, T: ChatTransport> {
    transport: &'a T,
    chat: teloxide::types::ChatId,
    message_id: Option<teloxide::types::MessageId>,
}

impl<'a, T: ChatTransport> StatusSink for ChatStatusSink<'a, T> {
    async fn update(&self, text: &str) {
        if let Some(id) = self.message_id {
            let _ = self.transport.edit_text(self.chat, id, text).await;
        }
    }
}

/// Drives one `Task` through Download -> Process -> Upload (§3's
/// `CommandReceived..Completed` happy path). `task.config` must already be
/// set (the Interactive Config component, 4.I, runs before this is called).
/// Admits against the Quota Gate once the transfer size is known and
/// charges it only after the upload actually succeeds; any step's error
/// advances `task.stage` to `Failed`, notifies the owning chat, and
/// cleanup still runs regardless of outcome.
pub async fn run<T: ChatTransport, S: QuotaStore, L: TierLimits>(
    task: &mut Task,
    transport: &T,
    fetcher: Arc<TaskInputFetcher<T>>,
    quota_store: &S,
    limits: &L,
    is_admin: bool,
    default_tier: &str,
    today: &str,
    stagger: std::time::Duration,
) -> EngineResult<()> {
    let result = run_inner(task, transport, fetcher, quota_store, limits, is_admin, default_tier, today, stagger).await;

    if let Err(err) = &result {
        warn!("task {} failed: {err}", task.id);
        if task.stage.can_advance_to(Stage::Failed) {
            task.advance_stage(Stage::Failed);
        }
        let _ = transport.send_text(task.chat, &format!("Task {} failed: {err}", task.id)).await;
    }

    cleanup_dir(&task.work_dir).await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_inner<T: ChatTransport, S: QuotaStore, L: TierLimits>(
    task: &mut Task,
    transport: &T,
    fetcher: Arc<TaskInputFetcher<T>>,
    quota_store: &S,
    limits: &L,
    is_admin: bool,
    default_tier: &str,
    today: &str,
    stagger: std::time::Duration,
) -> EngineResult<()> {
    task.advance_stage(Stage::Downloading);

    let downloaded = download_pool::run(&task.inputs, &task.work_dir, fetcher, task.cancel_token.clone(), stagger).await?;
    task.downloaded = downloaded;

    task.advance_stage(Stage::Merging);
    let outputs = match &task.config {
        // Jl/Qbl/UrlUpload carry no tool config (§4.F's dispatch table is
        // keyed by kind *and*, for Leech/Vt, by tool tag) — they pass the
        // downloaded files straight through to the Uploader unprocessed.
        None => task.downloaded.iter().map(|(_, p)| p.clone()).collect(),
        Some(config) => {
            let sink = ChatStatusSink { transport, chat: task.chat, message_id: task.status_message };
            tools::dispatch(config, &task.downloaded, &task.work_dir, &task.output_name, task.cancel_token.clone(), &sink).await?
        }
    };

    let mut output_sizes = Vec::with_capacity(outputs.len());
    let mut total_bytes = 0u64;
    for path in &outputs {
        let size = directory_size(path).await.unwrap_or(0);
        output_sizes.push(size);
        total_bytes += size;
    }

    let quota = crate::quota::admit(quota_store, limits, task.owner, is_admin, default_tier, today, total_bytes).await?;

    task.advance_stage(Stage::Uploading);
    for (output, size) in outputs.iter().zip(output_sizes.iter()) {
        let mut caption = format!("{} ({})", task.output_name, crate::misc::humanbytes(*size));
        if let Some(footer) = &quota.caption_footer {
            caption.push('\n');
            caption.push_str(footer);
        }
        uploader::upload(transport, task.chat, output, &caption).await?;
    }

    if !is_admin {
        crate::quota::mark_transfer_complete(quota_store, task.owner, default_tier, today, total_bytes).await?;
    }

    task.advance_stage(Stage::Completed);
    Ok(())
}
