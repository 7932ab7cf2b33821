use serde::{Deserialize, Serialize};

use super::kind::ToolTag;

/// Per-tool configuration gathered by the Interactive Config component
/// (4.I) before the Tool Dispatch (4.F) runs. One arm per tool, per §9's
/// "tagged variant, not an open property bag" instruction — the dispatch
/// table match in `tools::dispatch` is exhaustive over this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool")]
pub enum ToolConfig {
    Vt,
    Va { mode: AudioMode },
    Aa,
    Vs { mode: SubtitleMode },
    Cv { mode: CompressMode },
    Wv { watermark: Watermark, animation: WatermarkAnimation, position: WatermarkPosition },
    Tv { start: Timecode, end: Timecode },
    Cut { start: Timecode, end: Timecode },
    Rv { codec: AudioCodec },
    Ev,
}

impl ToolConfig {
    pub fn tool_tag(&self) -> ToolTag {
        match self {
            ToolConfig::Vt => ToolTag::Vt,
            ToolConfig::Va { .. } => ToolTag::Va,
            ToolConfig::Aa => ToolTag::Aa,
            ToolConfig::Vs { .. } => ToolTag::Vs,
            ToolConfig::Cv { .. } => ToolTag::Cv,
            ToolConfig::Wv { .. } => ToolTag::Wv,
            ToolConfig::Tv { .. } => ToolTag::Tv,
            ToolConfig::Cut { .. } => ToolTag::Cut,
            ToolConfig::Rv { .. } => ToolTag::Rv,
            ToolConfig::Ev => ToolTag::Ev,
        }
    }
}

/// Video+Audio mux mode: drop the original video's audio, or keep it
/// alongside the uploaded tracks as independently selectable streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioMode {
    DropOriginal,
    KeepOriginal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleMode {
    BurnIn { track_index: u32 },
    SoftAll,
}

/// Five compress modes (§4.F). `TargetSize` carries the target in bytes;
/// the video bitrate is derived at dispatch time from probed duration and
/// audio bitrate (S2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CompressMode {
    HighQuality,
    Balanced,
    HighCompression,
    TargetSize { target_bytes: u64 },
    Custom { crf: u8 },
}

impl CompressMode {
    pub fn crf(self) -> Option<u8> {
        match self {
            CompressMode::HighQuality => Some(18),
            CompressMode::Balanced => Some(23),
            CompressMode::HighCompression => Some(28),
            CompressMode::Custom { crf } => Some(crf),
            CompressMode::TargetSize { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Watermark {
    Text(String),
    Image(std::path::PathBuf),
}

/// 8 animation modes (§4.F). `Pulsing`'s opacity expression is intentionally
/// not time-parameterised — SPEC_FULL.md §12 Q3 records this as a reproduced
/// quirk of the original, not a bug to silently "fix".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkAnimation {
    Static,
    FadeIn,
    FadeInOut,
    Moving,
    Bouncing,
    Floating,
    Scrolling,
    Pulsing,
}

impl WatermarkAnimation {
    /// Moving-class animations compute their own coordinate expressions and
    /// therefore ignore `WatermarkPosition` (§4.F "5 positions ... for
    /// non-moving modes").
    pub fn uses_fixed_position(self) -> bool {
        !matches!(self, WatermarkAnimation::Moving | WatermarkAnimation::Bouncing | WatermarkAnimation::Floating | WatermarkAnimation::Scrolling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Mp3,
    Aac,
    Wav,
    KeepOriginal,
}

/// `HH:MM:SS` timestamp, parsed once at config-gathering time so later
/// stages never reparse user text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timecode {
    pub total_seconds: u32,
}

impl Timecode {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        let (h, m, s) = match parts.as_slice() {
            [h, m, s] => (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?),
            [m, s] => (0u32, m.parse().ok()?, s.parse().ok()?),
            _ => return None,
        };
        if m >= 60 || s >= 60 {
            return None;
        }
        Some(Timecode { total_seconds: h * 3600 + m * 60 + s })
    }

    pub fn as_ffmpeg_arg(self) -> String {
        let h = self.total_seconds / 3600;
        let m = (self.total_seconds % 3600) / 60;
        let s = self.total_seconds % 60;
        format!("{h:02}:{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_parses_hms() {
        let tc = Timecode::parse("00:00:20").unwrap();
        assert_eq!(tc.total_seconds, 20);
        assert_eq!(tc.as_ffmpeg_arg(), "00:00:20");
    }

    #[test]
    fn timecode_rejects_overflowing_minutes_or_seconds() {
        assert!(Timecode::parse("00:61:00").is_none());
        assert!(Timecode::parse("00:00:61").is_none());
    }

    #[test]
    fn compress_mode_crf_matches_spec_values() {
        assert_eq!(CompressMode::HighQuality.crf(), Some(18));
        assert_eq!(CompressMode::Balanced.crf(), Some(23));
        assert_eq!(CompressMode::HighCompression.crf(), Some(28));
        assert_eq!(CompressMode::TargetSize { target_bytes: 1 }.crf(), None);
    }

    #[test]
    fn tool_config_tool_tag_matches_variant() {
        assert_eq!(ToolConfig::Vt.tool_tag(), ToolTag::Vt);
        assert_eq!(ToolConfig::Ev.tool_tag(), ToolTag::Ev);
    }
}
