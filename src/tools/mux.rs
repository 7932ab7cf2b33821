use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::task::config::AudioMode;

use super::{output_path, run_ffmpeg, StatusSink};

/// Video+Audio mux (§4.F): exactly one video input, one or more audio
/// inputs, each becoming an independently selectable stream. Forces an MKV
/// container, per `leech.py::_process_video_audio`'s own comment: MP4's
/// multi-audio-from-separate-inputs bug makes every track play the last
/// audio only.
pub async fn video_audio<S: StatusSink>(
    inputs: &[PathBuf],
    mode: AudioMode,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    let (video_files, audio_files): (Vec<&PathBuf>, Vec<&PathBuf>) = inputs.iter().partition(|p| is_video_file(p));
    super::require_exactly_one_video(video_files.len())?;
    if audio_files.is_empty() {
        return Err(EngineError::user_input("no audio files found; at least 1 audio input is required"));
    }

    let effective_name = replace_extension(output_name, "mkv");
    let out = output_path(work_dir, &effective_name);

    let mut args = vec!["-y".to_string()];
    args.push("-i".to_string());
    args.push(video_files[0].display().to_string());
    for audio in &audio_files {
        args.push("-i".to_string());
        args.push(audio.display().to_string());
    }

    args.push("-map".to_string());
    args.push("0:v".to_string());
    if mode == AudioMode::KeepOriginal {
        args.push("-map".to_string());
        args.push("0:a?".to_string());
    }
    for i in 0..audio_files.len() {
        args.push("-map".to_string());
        args.push(format!("{}:a", i + 1));
    }
    args.push("-c".to_string());
    args.push("copy".to_string());
    args.push(out.display().to_string());

    status.update("muxing video and audio streams").await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(out)
}

fn is_video_file(path: &Path) -> bool {
    const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "mkv", "avi", "webm", "mov", "flv", "ts", "wmv", "m4v"];
    path.extension().map(|e| VIDEO_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str())).unwrap_or(false)
}

fn replace_extension(name: &str, new_ext: &str) -> String {
    let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string());
    format!("{stem}.{new_ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_is_forced_to_mkv() {
        assert_eq!(replace_extension("out.mp4", "mkv"), "out.mkv");
    }

    #[test]
    fn detects_video_vs_non_video_extension() {
        assert!(is_video_file(Path::new("a.mkv")));
        assert!(!is_video_file(Path::new("a.mp3")));
    }
}
