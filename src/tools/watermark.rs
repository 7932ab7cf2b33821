use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;
use crate::task::config::{Watermark, WatermarkAnimation, WatermarkPosition};

use super::{output_path, run_ffmpeg, StatusSink};

/// Watermark (§4.F): text or image, 8 animation modes, 5 fixed positions
/// for the non-moving modes. Static/text-position math is grounded on
/// `video_tools.py::_watermark`'s `pos_map` tables; the moving-class
/// animations (not present standalone in the original tool) compute their
/// own coordinate expressions and ignore `position` (§4.F).
pub async fn apply<S: StatusSink>(
    inputs: &[PathBuf],
    watermark: &Watermark,
    animation: WatermarkAnimation,
    position: WatermarkPosition,
    work_dir: &Path,
    output_name: &str,
    cancel: CancellationToken,
    status: &S,
) -> EngineResult<PathBuf> {
    let video = inputs.first().ok_or_else(|| crate::error::EngineError::user_input("no video file found for watermark"))?;
    let out = output_path(work_dir, output_name);

    let args = match watermark {
        Watermark::Text(text) => text_args(video, text, animation, position, &out),
        Watermark::Image(image_path) => image_args(video, image_path, animation, position, &out),
    };

    status.update("applying watermark").await;
    run_ffmpeg(&args, cancel, status).await?;
    Ok(out)
}

fn text_args(video: &Path, text: &str, animation: WatermarkAnimation, position: WatermarkPosition, out: &Path) -> Vec<String> {
    let safe_text = text.replace('\'', "\\'").replace(':', "\\:");
    let filter = drawtext_filter(&safe_text, animation, position);
    vec![
        "-y".to_string(),
        "-i".to_string(), video.display().to_string(),
        "-vf".to_string(), filter,
        "-c:a".to_string(), "copy".to_string(),
        out.display().to_string(),
    ]
}

fn image_args(video: &Path, image_path: &Path, animation: WatermarkAnimation, position: WatermarkPosition, out: &Path) -> Vec<String> {
    let overlay_expr = overlay_position(animation, position);
    let filter = format!("[1:v]scale=iw/5:-1[wm];[0:v][wm]overlay={overlay_expr}");
    vec![
        "-y".to_string(),
        "-i".to_string(), video.display().to_string(),
        "-i".to_string(), image_path.display().to_string(),
        "-filter_complex".to_string(), filter,
        "-c:a".to_string(), "copy".to_string(),
        out.display().to_string(),
    ]
}

/// `pos_map` for image overlays, from `video_tools.py::_watermark`.
fn overlay_position(animation: WatermarkAnimation, position: WatermarkPosition) -> String {
    if animation.uses_fixed_position() {
        match position {
            WatermarkPosition::TopLeft => "10:10".to_string(),
            WatermarkPosition::TopRight => "main_w-overlay_w-10:10".to_string(),
            WatermarkPosition::BottomLeft => "10:main_h-overlay_h-10".to_string(),
            WatermarkPosition::BottomRight => "main_w-overlay_w-10:main_h-overlay_h-10".to_string(),
            WatermarkPosition::Center => "(main_w-overlay_w)/2:(main_h-overlay_h)/2".to_string(),
        }
    } else {
        moving_overlay_expr(animation)
    }
}

fn moving_overlay_expr(animation: WatermarkAnimation) -> String {
    match animation {
        WatermarkAnimation::Moving => "mod(t*80\\,main_w-overlay_w):10".to_string(),
        WatermarkAnimation::Bouncing => "abs(mod(t*80\\,2*(main_w-overlay_w))-(main_w-overlay_w)):abs(mod(t*60\\,2*(main_h-overlay_h))-(main_h-overlay_h))".to_string(),
        WatermarkAnimation::Floating => "(main_w-overlay_w)/2+50*sin(t):(main_h-overlay_h)/2+50*cos(t)".to_string(),
        WatermarkAnimation::Scrolling => "main_w-mod(t*100\\,main_w+overlay_w):main_h-overlay_h-10".to_string(),
        _ => unreachable!("moving_overlay_expr only called for moving-class animations"),
    }
}

/// `pos_map` for `drawtext`, from `video_tools.py::_watermark`'s text branch,
/// extended with the animation opacity expressions §4.F names. `Pulsing`'s
/// `fontcolor` alpha is a fixed expression, not time-parameterised — this
/// reproduces the original's observed (non-pulsing) behaviour rather than
/// "fixing" it; see DESIGN.md open question 3.
fn drawtext_filter(safe_text: &str, animation: WatermarkAnimation, position: WatermarkPosition) -> String {
    let dt = match position {
        WatermarkPosition::TopLeft => "x=10:y=10",
        WatermarkPosition::TopRight => "x=w-tw-10:y=10",
        WatermarkPosition::BottomLeft => "x=10:y=h-th-10",
        WatermarkPosition::BottomRight => "x=w-tw-10:y=h-th-10",
        WatermarkPosition::Center => "x=(w-tw)/2:y=(h-th)/2",
    };

    let alpha = match animation {
        WatermarkAnimation::Static => "0.7".to_string(),
        WatermarkAnimation::FadeIn => "min(1\\,t/2)*0.7".to_string(),
        WatermarkAnimation::FadeInOut => "if(lt(t\\,2)\\,t/2\\,1)*0.7".to_string(),
        WatermarkAnimation::Pulsing => "0.7".to_string(),
        WatermarkAnimation::Moving | WatermarkAnimation::Bouncing | WatermarkAnimation::Floating | WatermarkAnimation::Scrolling => "0.7".to_string(),
    };

    if animation.uses_fixed_position() {
        format!("drawtext=text='{safe_text}':fontsize=24:fontcolor=white@{alpha}:{dt}")
    } else {
        let (x, y) = match animation {
            WatermarkAnimation::Moving => ("mod(t*80\\,w-tw)", "10"),
            WatermarkAnimation::Bouncing => ("abs(mod(t*80\\,2*(w-tw))-(w-tw))", "abs(mod(t*60\\,2*(h-th))-(h-th))"),
            WatermarkAnimation::Floating => ("(w-tw)/2+50*sin(t)", "(h-th)/2+50*cos(t)"),
            WatermarkAnimation::Scrolling => ("w-mod(t*100\\,w+tw)", "h-th-10"),
            _ => unreachable!(),
        };
        format!("drawtext=text='{safe_text}':fontsize=24:fontcolor=white@{alpha}:x={x}:y={y}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_positions_use_the_static_overlay_table() {
        assert_eq!(overlay_position(WatermarkAnimation::Static, WatermarkPosition::BottomRight), "main_w-overlay_w-10:main_h-overlay_h-10");
        assert_eq!(overlay_position(WatermarkAnimation::Static, WatermarkPosition::Center), "(main_w-overlay_w)/2:(main_h-overlay_h)/2");
    }

    #[test]
    fn moving_class_animations_ignore_position() {
        let a = overlay_position(WatermarkAnimation::Moving, WatermarkPosition::TopLeft);
        let b = overlay_position(WatermarkAnimation::Moving, WatermarkPosition::Center);
        assert_eq!(a, b);
    }

    #[test]
    fn pulsing_alpha_is_a_fixed_constant_not_time_varying() {
        let filter = drawtext_filter("hi", WatermarkAnimation::Pulsing, WatermarkPosition::Center);
        assert!(filter.contains("fontcolor=white@0.7"));
        assert!(!filter.contains("sin(t)"));
    }

    #[test]
    fn text_is_escaped_before_entering_the_filter_string() {
        let filter = drawtext_filter("it\\'s: fine", WatermarkAnimation::Static, WatermarkPosition::Center);
        assert!(filter.contains("it\\'s: fine"));
    }
}
