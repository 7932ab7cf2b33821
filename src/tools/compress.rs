use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::EngineResult;
use crate::task::config::CompressMode;

use super::{output_path, run_ffmpeg, SilentSink, StatusSink};

/// Floor so target-size mode never requests an unwatchably low bitrate
/// (§4.F "clamped to a floor, ≥100 kbps").
const MIN_VIDEO_BITRATE_BPS: u64 = 100_000;
const AAC_AUDIO_BITRATE_BPS: u64 = 128_000;

/// Compress (§4.F): 5 modes. Per-input when more than one file is supplied,
/// suffixing each output `_k` (§4.F edge-case rule). Grounded on
/// `video_tools.py::_compress`'s CRF/preset choice, extended with the
/// target-byte-size math the distilled spec calls for but the original
/// tool-call doesn't implement standalone.
pub async fn compress<S: StatusSink>(
    inputs: &[PathBuf],
    mode: CompressMode,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<Vec<PathBuf>> {
    let mut outputs = Vec::with_capacity(inputs.len());

    for (i, input) in inputs.iter().enumerate() {
        let name = if inputs.len() > 1 { suffixed(output_name, i) } else { output_name.to_string() };
        let out = output_path(work_dir, &name);

        let crf = match mode {
            CompressMode::TargetSize { target_bytes } => {
                let video_bitrate = match target_video_bitrate(input, target_bytes).await {
                    Ok(bps) => bps,
                    Err(e) => {
                        warn!("duration/bitrate probe failed, falling back to balanced mode: {e}");
                        None
                    }
                };
                if let Some(bitrate) = video_bitrate {
                    let args = vec![
                        "-y".to_string(),
                        "-i".to_string(), input.display().to_string(),
                        "-c:v".to_string(), "libx264".to_string(),
                        "-b:v".to_string(), format!("{bitrate}"),
                        "-preset".to_string(), "faster".to_string(),
                        "-c:a".to_string(), "aac".to_string(),
                        "-b:a".to_string(), format!("{AAC_AUDIO_BITRATE_BPS}"),
                        out.display().to_string(),
                    ];
                    status.update(&format!("compressing to target bitrate {bitrate}bps")).await;
                    run_ffmpeg(&args, cancel.clone(), status).await?;
                    outputs.push(out);
                    continue;
                }
                CompressMode::Balanced.crf()
            }
            other => other.crf(),
        };

        let crf = crf.expect("non-TargetSize modes always carry a crf");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(), input.display().to_string(),
            "-c:v".to_string(), "libx264".to_string(),
            "-crf".to_string(), crf.to_string(),
            "-preset".to_string(), "faster".to_string(),
            "-c:a".to_string(), "aac".to_string(),
            "-b:a".to_string(), "128k".to_string(),
            out.display().to_string(),
        ];
        status.update(&format!("compressing with CRF={crf}")).await;
        run_ffmpeg(&args, cancel.clone(), status).await?;
        outputs.push(out);
    }

    Ok(outputs)
}

/// `target_bits/duration - audio_bitrate`, clamped to `MIN_VIDEO_BITRATE_BPS`
/// (§4.F). Returns `None` when the probe fails, signalling the caller to
/// fall back to `Balanced` mode.
async fn target_video_bitrate(input: &Path, target_bytes: u64) -> EngineResult<Option<u64>> {
    let duration_secs = probe_duration_seconds(input, &SilentSink).await?;
    if duration_secs <= 0.0 {
        return Ok(None);
    }
    let audio_bitrate = probe_audio_bitrate_bps(input, &SilentSink).await;
    let target_bits = target_bytes as f64 * 8.0;
    let video_bitrate = (target_bits / duration_secs) as i64 - audio_bitrate as i64;
    Ok(Some((video_bitrate.max(MIN_VIDEO_BITRATE_BPS as i64)) as u64))
}

/// Probes the input's audio stream bitrate, falling back to
/// `AAC_AUDIO_BITRATE_BPS` when there's no audio stream or ffprobe doesn't
/// report one (mirrors `stream.get("bit_rate", 128000)` in the tool this is
/// grounded on).
async fn probe_audio_bitrate_bps<S: StatusSink>(input: &Path, status: &S) -> u64 {
    let args = vec![
        "-v".to_string(), "error".to_string(),
        "-select_streams".to_string(), "a:0".to_string(),
        "-show_entries".to_string(), "stream=bit_rate".to_string(),
        "-of".to_string(), "default=noprint_wrappers=1:nokey=1".to_string(),
        input.display().to_string(),
    ];
    let output = match crate::subprocess::run("ffprobe", &args, None, CancellationToken::new(), Some(crate::subprocess::SHORT_COMMAND_TIMEOUT), |_| {}).await {
        Ok(output) if output.success() => output,
        _ => return AAC_AUDIO_BITRATE_BPS,
    };
    status.update("probed audio bitrate").await;
    String::from_utf8_lossy(&output.stdout).trim().parse::<u64>().unwrap_or(AAC_AUDIO_BITRATE_BPS)
}

pub async fn probe_duration_seconds<S: StatusSink>(input: &Path, status: &S) -> EngineResult<f64> {
    let args = vec![
        "-v".to_string(), "error".to_string(),
        "-show_entries".to_string(), "format=duration".to_string(),
        "-of".to_string(), "default=noprint_wrappers=1:nokey=1".to_string(),
        input.display().to_string(),
    ];
    let output = crate::subprocess::run("ffprobe", &args, None, CancellationToken::new(), Some(crate::subprocess::SHORT_COMMAND_TIMEOUT), |_| {}).await?;
    status.update("probed duration").await;
    if !output.success() {
        return Err(crate::error::EngineError::media_format("ffprobe", &output.stderr));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<f64>().map_err(|e| crate::error::EngineError::transient("ffprobe duration parse", e))
}

fn suffixed(output_name: &str, index: usize) -> String {
    let path = Path::new(output_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| output_name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    match ext {
        Some(ext) => format!("{stem}_{index}.{ext}"),
        None => format!("{stem}_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_inserts_index_before_extension() {
        assert_eq!(suffixed("out.mp4", 2), "out_2.mp4");
        assert_eq!(suffixed("out", 0), "out_0");
    }
}
