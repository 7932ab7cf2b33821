use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

use super::{output_path, run_ffmpeg, StatusSink};

/// Video+Video concat (§4.F): stream-copy concat demuxer, order = input
/// index. Direct generalisation of `leech.py::_process_video_video` /
/// `video_tools.py::_merge_video_video`.
pub async fn video_video<S: StatusSink>(
    inputs: &[PathBuf],
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    if inputs.len() < 2 {
        return Err(EngineError::user_input("video+video concat needs at least 2 video inputs"));
    }

    status.update("preparing concat list").await;
    let concat_file = work_dir.join("concat.txt");
    let mut contents = String::new();
    for path in inputs {
        let abs = path.canonicalize().unwrap_or_else(|_| path.clone());
        contents.push_str(&format!("file '{}'\n", abs.display()));
    }
    tokio::fs::write(&concat_file, contents).await?;

    let out = output_path(work_dir, output_name);
    let args = vec![
        "-y".to_string(),
        "-f".to_string(), "concat".to_string(),
        "-safe".to_string(), "0".to_string(),
        "-i".to_string(), concat_file.display().to_string(),
        "-c".to_string(), "copy".to_string(),
        out.display().to_string(),
    ];

    status.update("merging videos").await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(out)
}

/// Audio+Audio concat (§4.F). Output extension defaults to a lossless-ish
/// audio format (`.m4a`) if a video extension was supplied as the task's
/// output name, since concatenated audio has no business in a video
/// container.
pub async fn audio_audio<S: StatusSink>(
    inputs: &[PathBuf],
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    if inputs.is_empty() {
        return Err(EngineError::user_input("audio+audio concat needs at least 1 audio input"));
    }

    let effective_name = if is_video_extension(output_name) {
        replace_extension(output_name, "m4a")
    } else {
        output_name.to_string()
    };

    status.update("preparing concat list").await;
    let concat_file = work_dir.join("concat.txt");
    let mut contents = String::new();
    for path in inputs {
        let abs = path.canonicalize().unwrap_or_else(|_| path.clone());
        contents.push_str(&format!("file '{}'\n", abs.display()));
    }
    tokio::fs::write(&concat_file, contents).await?;

    let out = output_path(work_dir, &effective_name);
    let args = vec![
        "-y".to_string(),
        "-f".to_string(), "concat".to_string(),
        "-safe".to_string(), "0".to_string(),
        "-i".to_string(), concat_file.display().to_string(),
        "-c".to_string(), "copy".to_string(),
        out.display().to_string(),
    ];

    status.update("merging audio tracks").await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(out)
}

fn is_video_extension(name: &str) -> bool {
    const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "mkv", "avi", "webm", "mov", "flv", "ts", "wmv", "m4v"];
    Path::new(name).extension().map(|e| VIDEO_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str())).unwrap_or(false)
}

fn replace_extension(name: &str, new_ext: &str) -> String {
    let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string());
    format!("{stem}.{new_ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extension_gets_rewritten_to_m4a_for_audio_concat() {
        assert_eq!(replace_extension("out.mp4", "m4a"), "out.m4a");
        assert!(is_video_extension("out.mp4"));
        assert!(!is_video_extension("out.mp3"));
    }
}
