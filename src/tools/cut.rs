use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::task::config::Timecode;

use super::{output_path, run_ffmpeg, StatusSink};

/// Cut (§4.F): remove the `[start,end]` segment by materialising
/// `[0,start]` and `[end,EOF]` as separate stream-copy segments, then
/// concatenating them — the inverse of `trim.rs`, built the same way
/// `video_tools.py`'s trim cmd is, composed twice plus a concat demuxer
/// pass (§4.F algorithm description; no single-command ffmpeg primitive
/// removes an interior segment directly).
pub async fn cut<S: StatusSink>(
    inputs: &[PathBuf],
    start: Timecode,
    end: Timecode,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    let video = inputs.first().ok_or_else(|| EngineError::user_input("no video file found to cut"))?;
    if end <= start {
        return Err(EngineError::user_input("cut end time must be after start time"));
    }

    let before = work_dir.join("cut_before.mp4");
    let after = work_dir.join("cut_after.mp4");

    status.update("extracting segment before the cut").await;
    run_ffmpeg(
        &[
            "-y".to_string(),
            "-i".to_string(), video.display().to_string(),
            "-to".to_string(), start.as_ffmpeg_arg(),
            "-c".to_string(), "copy".to_string(),
            before.display().to_string(),
        ],
        cancel.clone(),
        status,
    )
    .await?;

    status.update("extracting segment after the cut").await;
    run_ffmpeg(
        &[
            "-y".to_string(),
            "-i".to_string(), video.display().to_string(),
            "-ss".to_string(), end.as_ffmpeg_arg(),
            "-c".to_string(), "copy".to_string(),
            after.display().to_string(),
        ],
        cancel.clone(),
        status,
    )
    .await?;

    let concat_file = work_dir.join("cut_concat.txt");
    let abs_before = before.canonicalize().unwrap_or(before.clone());
    let abs_after = after.canonicalize().unwrap_or(after.clone());
    tokio::fs::write(&concat_file, format!("file '{}'\nfile '{}'\n", abs_before.display(), abs_after.display())).await?;

    let out = output_path(work_dir, output_name);
    status.update("joining the remaining segments").await;
    run_ffmpeg(
        &[
            "-y".to_string(),
            "-f".to_string(), "concat".to_string(),
            "-safe".to_string(), "0".to_string(),
            "-i".to_string(), concat_file.display().to_string(),
            "-c".to_string(), "copy".to_string(),
            out.display().to_string(),
        ],
        cancel,
        status,
    )
    .await?;

    let _ = tokio::fs::remove_file(&before).await;
    let _ = tokio::fs::remove_file(&after).await;
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
        let result = cut(&[video], Timecode { total_seconds: 30 }, Timecode { total_seconds: 10 }, dir.path(), "out.mp4", CancellationToken::new(), &SilentSink).await;
        assert!(result.is_err());
    }
}
