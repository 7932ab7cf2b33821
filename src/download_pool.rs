use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::task::object::InputRef;

pub const DEFAULT_STAGGER: Duration = Duration::from_secs(5);

/// Resolves a single `InputRef` to a local file inside `dest_dir`, returning
/// its final path. Implementations live in `fetch/` (§4.G); the pool only
/// orchestrates stagger timing, cancellation, and the `NNN_` rename, the
/// same separation `task/download.rs` draws between `yt_dlp()` (fetch) and
/// `download_and_send_files()` (orchestration).
pub trait InputFetcher: Send + Sync {
    async fn fetch(&self, input: &InputRef, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<PathBuf>;
}

/// Download Pool (4.D): staggered-parallel fetch of every task input into
/// `work_dir`, returning `(original_index, path)` pairs. One input's
/// failure cancels every outstanding fetch and fails the whole task — no
/// partial merges.
pub async fn run<F: InputFetcher + 'static>(
    inputs: &[InputRef],
    work_dir: &Path,
    fetcher: std::sync::Arc<F>,
    cancel: CancellationToken,
    stagger: Duration,
) -> EngineResult<Vec<(usize, PathBuf)>> {
    let mut handles = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.iter().enumerate() {
        let delay = stagger * index as u32;
        let input = input.clone();
        let dest_dir = work_dir.to_path_buf();
        let task_cancel = cancel.clone();
        let fetcher = fetcher.clone();

        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = task_cancel.cancelled() => return Err(EngineError::Cancelled),
            }
            debug!("starting download {index} after {delay:?} stagger");
            let raw_path = fetcher.fetch(&input, &dest_dir, task_cancel.clone()).await?;
            let final_path = apply_index_prefix(&raw_path, index)?;
            Ok((index, final_path))
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_error: Option<EngineError> = None;
    let mut pending: FuturesUnordered<_> = handles.into_iter().collect();

    while let Some(joined) = pending.next().await {
        match joined {
            Ok(Ok(pair)) => results.push(pair),
            Ok(Err(err)) => {
                if first_error.is_none() {
                    // Cancel immediately so the still-running handles in
                    // `pending` observe `task_cancel.cancelled()` instead of
                    // running to completion while we drain the rest.
                    cancel.cancel();
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                warn!("download task panicked: {join_err}");
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(EngineError::fatal(join_err));
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results)
}

/// Renames a fetched file to `NNN_<original-filename>` (§4.D filename
/// discipline) so later pipeline stages can process in deterministic index
/// order regardless of filesystem listing order.
fn apply_index_prefix(path: &Path, index: usize) -> EngineResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| EngineError::user_input("downloaded file has no name"))?
        .to_string_lossy()
        .into_owned();
    let renamed = path.with_file_name(format!("{index:03}_{file_name}"));
    std::fs::rename(path, &renamed)?;
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct InstantFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl InputFetcher for InstantFetcher {
        async fn fetch(&self, _input: &InputRef, dest_dir: &Path, _cancel: CancellationToken) -> EngineResult<PathBuf> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let path = dest_dir.join(format!("clip{n}.mp4"));
            tokio::fs::write(&path, b"data").await?;
            Ok(path)
        }
    }

    struct FailingFetcher;

    impl InputFetcher for FailingFetcher {
        async fn fetch(&self, _input: &InputRef, _dest_dir: &Path, _cancel: CancellationToken) -> EngineResult<PathBuf> {
            Err(EngineError::user_input("boom"))
        }
    }

    fn url_input() -> InputRef {
        InputRef::Url(url::Url::parse("https://example.com/a.mp4").unwrap())
    }

    #[tokio::test]
    async fn results_are_ordered_by_original_index_and_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(InstantFetcher { calls: Arc::new(AtomicUsize::new(0)) });
        let inputs = vec![url_input(), url_input(), url_input()];

        let results = run(&inputs, dir.path(), fetcher, CancellationToken::new(), Duration::from_millis(0)).await.unwrap();

        assert_eq!(results.len(), 3);
        for (i, (index, path)) in results.iter().enumerate() {
            assert_eq!(*index, i);
            assert!(path.file_name().unwrap().to_string_lossy().starts_with(&format!("{i:03}_")));
        }
    }

    #[tokio::test]
    async fn one_failure_fails_the_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FailingFetcher);
        let inputs = vec![url_input()];

        let result = run(&inputs, dir.path(), fetcher, CancellationToken::new(), Duration::from_millis(0)).await;
        assert!(result.is_err());
    }

    struct SlowFetcher {
        cancelled_before_completion: Arc<std::sync::atomic::AtomicBool>,
    }

    impl InputFetcher for SlowFetcher {
        async fn fetch(&self, _input: &InputRef, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<PathBuf> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                _ = cancel.cancelled() => {
                    self.cancelled_before_completion.store(true, Ordering::SeqCst);
                    return Err(EngineError::Cancelled);
                }
            }
            let path = dest_dir.join("slow.mp4");
            tokio::fs::write(&path, b"data").await?;
            Ok(path)
        }
    }

    struct FastFailThenSlowFetcher {
        cancelled_before_completion: Arc<std::sync::atomic::AtomicBool>,
    }

    impl InputFetcher for FastFailThenSlowFetcher {
        async fn fetch(&self, input: &InputRef, dest_dir: &Path, cancel: CancellationToken) -> EngineResult<PathBuf> {
            match input {
                InputRef::Url(url) if url.as_str().contains("fail") => Err(EngineError::user_input("boom")),
                _ => {
                    let slow = SlowFetcher { cancelled_before_completion: self.cancelled_before_completion.clone() };
                    slow.fetch(input, dest_dir, cancel).await
                }
            }
        }
    }

    #[tokio::test]
    async fn fast_failure_promptly_cancels_slow_sibling_download() {
        let dir = tempfile::tempdir().unwrap();
        let cancelled_before_completion = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fetcher = Arc::new(FastFailThenSlowFetcher { cancelled_before_completion: cancelled_before_completion.clone() });
        let inputs = vec![url_input(), InputRef::Url(url::Url::parse("https://example.com/fail.mp4").unwrap())];

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(&inputs, dir.path(), fetcher, CancellationToken::new(), Duration::from_millis(0)),
        )
        .await
        .expect("cancellation should unblock the slow download well before the 30s sleep completes");

        assert!(result.is_err());
        assert!(cancelled_before_completion.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelling_before_stagger_delay_elapses_yields_cancelled_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(InstantFetcher { calls: Arc::new(AtomicUsize::new(0)) });
        let inputs = vec![url_input()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run(&inputs, dir.path(), fetcher, cancel, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
