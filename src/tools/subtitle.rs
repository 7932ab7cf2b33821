use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::task::config::SubtitleMode;

use super::{output_path, run_ffmpeg, StatusSink};

/// Video+Subtitle (§4.F): mode 1 burns the chosen subtitle track into the
/// video (re-encode); mode 2 adds every subtitle as a soft selectable
/// stream (stream copy). Grounded on `video_tools.py::_hardsub` (burn-in)
/// and `_merge_video_subtitle` (soft sub).
pub async fn video_subtitle<S: StatusSink>(
    inputs: &[PathBuf],
    mode: SubtitleMode,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    let (video, subtitles): (Vec<&PathBuf>, Vec<&PathBuf>) = inputs.iter().partition(|p| is_video_file(p));
    super::require_exactly_one_video(video.len())?;
    if subtitles.is_empty() {
        return Err(EngineError::user_input("no subtitle file found"));
    }
    let video = video[0];

    let out = output_path(work_dir, output_name);

    match mode {
        SubtitleMode::BurnIn { track_index } => {
            let subtitle_path = subtitles.get(track_index as usize).copied().unwrap_or(subtitles[0]);
            // The filter-argument path is escaped so colons (drive letters,
            // timestamps) survive the subprocess argument layer, same escaping
            // `video_tools.py::_hardsub` applies before building the filter string.
            let escaped = escape_filter_path(subtitle_path);
            let args = vec![
                "-y".to_string(),
                "-i".to_string(), video.display().to_string(),
                "-vf".to_string(), format!("subtitles={escaped}"),
                "-c:a".to_string(), "copy".to_string(),
                out.display().to_string(),
            ];
            status.update("burning subtitle into video").await;
            run_ffmpeg(&args, cancel, status).await?;
        }
        SubtitleMode::SoftAll => {
            let mut args = vec!["-y".to_string(), "-i".to_string(), video.display().to_string()];
            for subtitle in &subtitles {
                args.push("-i".to_string());
                args.push(subtitle.display().to_string());
            }
            args.push("-c:v".to_string());
            args.push("copy".to_string());
            args.push("-c:a".to_string());
            args.push("copy".to_string());
            args.push("-c:s".to_string());
            args.push("srt".to_string());
            args.push("-map".to_string());
            args.push("0:v".to_string());
            args.push("-map".to_string());
            args.push("0:a?".to_string());
            for i in 0..subtitles.len() {
                args.push("-map".to_string());
                args.push(format!("{}:s", i + 1));
            }
            args.push(out.display().to_string());
            status.update("adding soft subtitle streams").await;
            run_ffmpeg(&args, cancel, status).await?;
        }
    }

    Ok(out)
}

fn escape_filter_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/").replace(':', "\\:")
}

fn is_video_file(path: &Path) -> bool {
    const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "mkv", "avi", "webm", "mov", "flv", "ts", "wmv", "m4v"];
    path.extension().map(|e| VIDEO_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str())).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_path_escapes_colon_and_normalises_separators() {
        assert_eq!(escape_filter_path(Path::new("C:/subs/a.srt")), "C\\:/subs/a.srt");
    }
}
