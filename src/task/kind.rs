use serde::{Deserialize, Serialize};

/// Generalises the teacher's `MediaType` (`Mp3`/`Mp4`/`Voice`) to the full
/// command surface of §6. One `Task` has exactly one `kind` for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Leech,
    Twitter,
    UrlUpload,
    Jl,
    Qbl,
    Vt,
    Zip,
    Unzip,
    MediaInfo,
}

impl TaskKind {
    /// Extension appended to `output_name` when the user supplied none
    /// (§4.B, invariant 6).
    pub fn default_extension(self) -> &'static str {
        match self {
            TaskKind::Leech | TaskKind::Vt => "mp4",
            TaskKind::Twitter | TaskKind::Jl | TaskKind::UrlUpload | TaskKind::Qbl => "mp4",
            TaskKind::Zip => "zip",
            TaskKind::Unzip => "",
            TaskKind::MediaInfo => "txt",
        }
    }
}

/// Recipe tag for the Leech/Vt kinds (§4.F dispatch table key, §6 TOOL set).
/// `leech.py`'s `AVAILABLE_TOOLS`/flag parsing names these; this engine fully
/// implements all ten rather than the single `vt` entry point video_tools.py
/// ships standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolTag {
    /// Video + Video concat.
    Vt,
    /// Video + Audio mux.
    Va,
    /// Audio + Audio concat.
    Aa,
    /// Video + Subtitle (soft or burned-in).
    Vs,
    /// Compress.
    Cv,
    /// Watermark.
    Wv,
    /// Trim.
    Tv,
    /// Cut (remove segment).
    Cut,
    /// Extract audio (remove video).
    Rv,
    /// Extract video (remove audio).
    Ev,
}

impl ToolTag {
    pub fn from_flag(flag: &str) -> Option<Self> {
        Some(match flag {
            "vt" => ToolTag::Vt,
            "va" => ToolTag::Va,
            "aa" => ToolTag::Aa,
            "vs" => ToolTag::Vs,
            "cv" => ToolTag::Cv,
            "wv" => ToolTag::Wv,
            "tv" => ToolTag::Tv,
            "cut" => ToolTag::Cut,
            "rv" => ToolTag::Rv,
            "ev" => ToolTag::Ev,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolTag::Vt => "vt",
            ToolTag::Va => "va",
            ToolTag::Aa => "aa",
            ToolTag::Vs => "vs",
            ToolTag::Cv => "cv",
            ToolTag::Wv => "wv",
            ToolTag::Tv => "tv",
            ToolTag::Cut => "cut",
            ToolTag::Rv => "rv",
            ToolTag::Ev => "ev",
        }
    }

    /// Callback-data prefix this tool's inline buttons use (§9 "prefix
    /// namespaced" rule).
    pub fn callback_prefix(self) -> String {
        format!("leech_tool_{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_round_trips_through_as_str() {
        for tag in [
            ToolTag::Vt, ToolTag::Va, ToolTag::Aa, ToolTag::Vs, ToolTag::Cv,
            ToolTag::Wv, ToolTag::Tv, ToolTag::Cut, ToolTag::Rv, ToolTag::Ev,
        ] {
            assert_eq!(ToolTag::from_flag(tag.as_str()), Some(tag));
        }
    }

    #[test]
    fn unknown_flag_is_none() {
        assert_eq!(ToolTag::from_flag("bogus"), None);
    }
}
