use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::task::object::InputRef;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// States the daemon reports once a torrent has finished downloading and
/// moved to seeding — the success terminal set (§4.G "Terminal torrent
/// states include both success states ... and error states"). Grounded on
/// `qbl.py`'s own state check.
const SUCCESS_STATES: &[&str] = &["uploading", "pausedUP", "stalledUP", "queuedUP"];
const ERROR_STATES: &[&str] = &["error", "missingFiles"];

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    name: String,
    progress: f64,
    state: String,
}

/// A thin client over the torrent daemon's WebUI-style RPC (§6
/// `torrent_rpc_host/port/user/pass`). Grounded on `qbl.py::_get_qb_client`
/// and the `torrents_add`/`torrents_info`/`torrents_delete` calls it makes
/// through the `qbittorrentapi` Python client — this is the same API
/// surface driven directly over HTTP instead of through that wrapper
/// library, since no Rust crate in the corpus binds it.
pub struct TorrentRpcClient {
    client: reqwest::Client,
    base_url: url::Url,
    username: Option<String>,
    password: Option<String>,
}

impl TorrentRpcClient {
    pub fn new(host: &str, port: u16, username: Option<String>, password: Option<String>) -> EngineResult<Self> {
        let base_url = url::Url::parse(&format!("http://{host}:{port}/api/v2/")).map_err(EngineError::fatal)?;
        Ok(TorrentRpcClient { client: reqwest::Client::new(), base_url, username, password })
    }

    async fn login(&self) -> EngineResult<()> {
        let Some(username) = &self.username else { return Ok(()) };
        let url = self.base_url.join("auth/login").map_err(EngineError::fatal)?;
        let params = [("username", username.as_str()), ("password", self.password.as_deref().unwrap_or(""))];
        self.client.post(url).form(&params).send().await.map_err(|e| EngineError::transient("torrent rpc login", e))?;
        Ok(())
    }

    async fn add_magnet(&self, magnet: &str, save_path: &Path) -> EngineResult<()> {
        let url = self.base_url.join("torrents/add").map_err(EngineError::fatal)?;
        let params = [("urls", magnet), ("savepath", &save_path.display().to_string())];
        self.client.post(url).form(&params).send().await.map_err(|e| EngineError::transient("torrent rpc add", e))?;
        Ok(())
    }

    async fn recent_torrents(&self) -> EngineResult<Vec<TorrentInfo>> {
        let mut url = self.base_url.join("torrents/info").map_err(EngineError::fatal)?;
        url.query_pairs_mut().append_pair("sort", "added_on").append_pair("reverse", "true").append_pair("limit", "5");
        let resp = self.client.get(url).send().await.map_err(|e| EngineError::transient("torrent rpc info", e))?;
        resp.json().await.map_err(|e| EngineError::transient("torrent rpc info", e))
    }

    async fn torrent_by_hash(&self, hash: &str) -> EngineResult<Option<TorrentInfo>> {
        let mut url = self.base_url.join("torrents/info").map_err(EngineError::fatal)?;
        url.query_pairs_mut().append_pair("hashes", hash);
        let resp = self.client.get(url).send().await.map_err(|e| EngineError::transient("torrent rpc info", e))?;
        let mut infos: Vec<TorrentInfo> = resp.json().await.map_err(|e| EngineError::transient("torrent rpc info", e))?;
        Ok(infos.pop())
    }

    async fn delete(&self, hash: &str, delete_files: bool) -> EngineResult<()> {
        let url = self.base_url.join("torrents/delete").map_err(EngineError::fatal)?;
        let params = [("hashes", hash), ("deleteFiles", if delete_files { "true" } else { "false" })];
        let _ = self.client.post(url).form(&params).send().await;
        Ok(())
    }
}

/// Submits a magnet or `.torrent` payload, polls every 5s, and hands the
/// produced files back once a success terminal state is reached (§4.G last
/// paragraph). `input` must be `InputRef::Magnet`; `.torrent`-file inputs
/// are resolved to a magnet/file path by the caller before this runs, the
/// same split `qbl.py`'s command handler makes between a magnet string and
/// a replied `.torrent` file.
pub async fn fetch_via_torrent_rpc(
    rpc: &TorrentRpcClient,
    input: &InputRef,
    save_path: &Path,
    cancel: CancellationToken,
) -> EngineResult<Vec<PathBuf>> {
    let InputRef::Magnet(magnet) = input else {
        return Err(EngineError::user_input("torrent strategy requires a magnet input"));
    };

    rpc.login().await?;
    tokio::fs::create_dir_all(save_path).await?;
    rpc.add_magnet(magnet, save_path).await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(3)) => {}
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
    }

    let torrents = rpc.recent_torrents().await?;
    let Some(added) = torrents.into_iter().next() else {
        return Err(EngineError::transient("torrent rpc", std::io::Error::other("torrent not found after adding")));
    };
    let hash = added.hash.clone();
    info!("polling torrent {} ({})", added.name, hash);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => {
                rpc.delete(&hash, true).await?;
                return Err(EngineError::Cancelled);
            }
        }

        let Some(info) = rpc.torrent_by_hash(&hash).await? else {
            return Err(EngineError::transient("torrent rpc", std::io::Error::other("torrent disappeared")));
        };
        debug!("torrent {} at {:.1}% state={}", hash, info.progress * 100.0, info.state);

        if ERROR_STATES.contains(&info.state.as_str()) {
            rpc.delete(&hash, true).await?;
            return Err(EngineError::transient("torrent rpc", std::io::Error::other(format!("torrent error: {}", info.state))));
        }
        if info.progress >= 1.0 || SUCCESS_STATES.contains(&info.state.as_str()) {
            break;
        }
    }

    let files = collect_downloaded_files(save_path).await?;
    rpc.delete(&hash, false).await?;
    if files.is_empty() {
        return Err(EngineError::transient("torrent rpc", std::io::Error::other("no files found after download")));
    }
    Ok(files)
}

/// Walks `save_path` for non-empty, non-`.torrent` files — the final
/// fallback `qbl.py` uses when the content-path-based lookup and the
/// `torrents_files` API both come up empty.
async fn collect_downloaded_files(save_path: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![save_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                let is_torrent = path.extension().map(|e| e == "torrent").unwrap_or(false);
                let size = entry.metadata().await?.len();
                if !is_torrent && size > 0 {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_error_state_tables_are_disjoint() {
        for s in SUCCESS_STATES {
            assert!(!ERROR_STATES.contains(s));
        }
    }

    #[tokio::test]
    async fn collect_downloaded_files_skips_torrent_files_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("movie.mkv"), b"data").await.unwrap();
        tokio::fs::write(dir.path().join("leftover.torrent"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("empty.txt"), b"").await.unwrap();
        let files = collect_downloaded_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("movie.mkv"));
    }
}
