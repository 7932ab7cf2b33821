use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::task::config::Timecode;

use super::{output_path, run_ffmpeg, StatusSink};

/// Trim (§4.F): extract `[start,end]`, stream-copy. Grounded on
/// `video_tools.py::_trim`.
pub async fn trim<S: StatusSink>(
    inputs: &[PathBuf],
    start: Timecode,
    end: Timecode,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    let video = inputs.first().ok_or_else(|| EngineError::user_input("no video file found to trim"))?;
    if end <= start {
        return Err(EngineError::user_input("trim end time must be after start time"));
    }

    let out = output_path(work_dir, output_name);
    let args = vec![
        "-y".to_string(),
        "-i".to_string(), video.display().to_string(),
        "-ss".to_string(), start.as_ffmpeg_arg(),
        "-to".to_string(), end.as_ffmpeg_arg(),
        "-c".to_string(), "copy".to_string(),
        out.display().to_string(),
    ];

    status.update(&format!("trimming {} to {}", start.as_ffmpeg_arg(), end.as_ffmpeg_arg())).await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SilentSink;

    #[tokio::test]
    async fn rejects_an_end_time_not_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("in.mp4");
        tokio::fs::write(&video, b"x").await.unwrap();
        let result = trim(&[video], Timecode { total_seconds: 30 }, Timecode { total_seconds: 30 }, dir.path(), "out.mp4", CancellationToken::new(), &SilentSink).await;
        assert!(result.is_err());
    }
}
