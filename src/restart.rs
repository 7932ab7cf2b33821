use std::time::Duration;

use teloxide::types::ChatId;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::EngineResult;
use crate::transport::ChatTransport;

/// Grace window between sending the restart notice / cancelling tasks and
/// actually exiting (§4.L "awaits wind-down"). Grounded on
/// `restart.py::_do_restart`'s `asyncio.sleep(3)`.
pub const WIND_DOWN_GRACE: Duration = Duration::from_secs(3);

/// Restart Coordinator (4.L): notifies the triggering chat and the owner,
/// cancels every outstanding task's `CancellationToken`, waits
/// `WIND_DOWN_GRACE` for them to unwind, wipes scratch directories, then
/// returns an exit code the process supervisor reads as "please restart
/// me". Grounded on `restart.py::_do_restart`, minus its `os._exit(0)` —
/// the supervisor boundary belongs in `main.rs`, not here, so this
/// function stays testable.
pub async fn restart<T: ChatTransport>(
    transport: &T,
    reason: &str,
    triggering_chat: Option<ChatId>,
    owner_chat: Option<ChatId>,
    active_tasks: impl IntoIterator<Item = CancellationToken>,
    work_dir_root: &std::path::Path,
) -> EngineResult<()> {
    info!("restart triggered: {reason}");

    let notice = format!("Bot is restarting...\nReason: {reason}\nPlease wait a few seconds.");
    if let Some(chat) = triggering_chat {
        let _ = transport.send_text(chat, &notice).await;
    }
    if let Some(chat) = owner_chat {
        if Some(chat) != triggering_chat {
            let _ = transport.send_text(chat, &notice).await;
        }
    }

    let mut cancelled = 0;
    for token in active_tasks {
        token.cancel();
        cancelled += 1;
    }
    info!("cancelled {cancelled} active task(s) for restart");

    tokio::time::sleep(WIND_DOWN_GRACE).await;

    crate::misc::cleanup_dir(work_dir_root).await;
    info!("wiped scratch root {}", work_dir_root.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeChatTransport;

    #[tokio::test]
    async fn notifies_both_triggering_chat_and_distinct_owner_chat() {
        let transport = FakeChatTransport::new();
        let dir = tempfile::tempdir().unwrap();

        restart(&transport, "manual restart", Some(ChatId(1)), Some(ChatId(2)), std::iter::empty(), dir.path()).await.unwrap();

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn owner_chat_is_not_double_notified_when_it_triggered_the_restart() {
        let transport = FakeChatTransport::new();
        let dir = tempfile::tempdir().unwrap();

        restart(&transport, "manual restart", Some(ChatId(1)), Some(ChatId(1)), std::iter::empty(), dir.path()).await.unwrap();

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_active_task_token_is_cancelled() {
        let transport = FakeChatTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();

        restart(&transport, "resource saturation", None, None, tokens.clone(), dir.path()).await.unwrap();

        assert!(tokens.iter().all(|t| t.is_cancelled()));
    }

    #[tokio::test]
    async fn scratch_root_is_removed_after_wind_down() {
        let transport = FakeChatTransport::new();
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("leftover.bin"), b"x").await.unwrap();

        restart(&transport, "manual restart", None, None, std::iter::empty(), dir.path()).await.unwrap();

        assert!(!dir.path().exists());
    }
}
