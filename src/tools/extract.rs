use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::task::config::AudioCodec;

use super::{output_path, run_ffmpeg, StatusSink};

/// Extract Audio (§4.F): strip video, choose output codec. Multi-track
/// inputs produce one output per track, suffixed `_k` (edge-case rule),
/// same as `compress.rs`. Grounded on
/// `video_tools.py::_remove_video_stream`.
pub async fn extract_audio<S: StatusSink>(
    inputs: &[PathBuf],
    codec: AudioCodec,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<Vec<PathBuf>> {
    if inputs.is_empty() {
        return Err(EngineError::user_input("no input file found to extract audio from"));
    }

    let mut outputs = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let ext = codec_extension(codec);
        let name = if inputs.len() > 1 { suffixed(output_name, i, ext) } else { replace_extension(output_name, ext) };
        let out = output_path(work_dir, &name);

        let mut args = vec!["-y".to_string(), "-i".to_string(), input.display().to_string(), "-vn".to_string()];
        match codec {
            AudioCodec::KeepOriginal => {
                args.push("-c:a".to_string());
                args.push("copy".to_string());
            }
            AudioCodec::Mp3 => {
                args.push("-c:a".to_string());
                args.push("libmp3lame".to_string());
                args.push("-q:a".to_string());
                args.push("2".to_string());
            }
            AudioCodec::Aac => {
                args.push("-c:a".to_string());
                args.push("aac".to_string());
                args.push("-b:a".to_string());
                args.push("128k".to_string());
            }
            AudioCodec::Wav => {
                args.push("-c:a".to_string());
                args.push("pcm_s16le".to_string());
            }
        }
        args.push(out.display().to_string());

        status.update(&format!("extracting audio track {i}")).await;
        run_ffmpeg(&args, cancel.clone(), status).await?;
        outputs.push(out);
    }
    Ok(outputs)
}

/// Extract Video (§4.F): strip all audio, stream-copy video. Grounded on
/// `video_tools.py::_extract_video_stream`.
pub async fn extract_video<S: StatusSink>(
    inputs: &[PathBuf],
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<Vec<PathBuf>> {
    let video = inputs.first().ok_or_else(|| EngineError::user_input("no video file found"))?;
    let out = output_path(work_dir, output_name);
    let args = vec![
        "-y".to_string(),
        "-i".to_string(), video.display().to_string(),
        "-an".to_string(),
        "-c:v".to_string(), "copy".to_string(),
        out.display().to_string(),
    ];
    status.update("stripping audio streams").await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(vec![out])
}

fn codec_extension(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Mp3 => "mp3",
        AudioCodec::Aac => "m4a",
        AudioCodec::Wav => "wav",
        AudioCodec::KeepOriginal => "m4a",
    }
}

fn replace_extension(name: &str, new_ext: &str) -> String {
    let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string());
    format!("{stem}.{new_ext}")
}

fn suffixed(output_name: &str, index: usize, ext: &str) -> String {
    let stem = Path::new(output_name).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| output_name.to_string());
    format!("{stem}_{index}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_extension_matches_each_variant() {
        assert_eq!(codec_extension(AudioCodec::Mp3), "mp3");
        assert_eq!(codec_extension(AudioCodec::Wav), "wav");
    }

    #[test]
    fn multi_track_outputs_are_suffixed_per_index() {
        assert_eq!(suffixed("out.m4a", 1, "mp3"), "out_1.mp3");
    }
}
