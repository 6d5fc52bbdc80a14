//! Codec identifiers, media kinds and container format enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of elementary stream.
///
/// Also used as the role of a demuxer/decoder pair inside the orchestrator,
/// and as the canonical lock order (video, then audio, then subtitles).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl MediaKind {
    /// All kinds in canonical lock order.
    pub const ALL: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle];

    pub fn label(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitles",
        }
    }

    /// Position in [`MediaKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Subtitle => 2,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Codec identifier as reported by the container.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    H264,
    H265,
    Vp9,
    Av1,
    Aac,
    Mp3,
    Opus,
    Flac,
    SubRip,
    WebVtt,
    Ass,
    /// Codec the container names but the pipeline has no identifier for.
    Other(String),
}

impl CodecId {
    /// Media kind this codec produces.
    pub fn kind(&self) -> Option<MediaKind> {
        match self {
            Self::H264 | Self::H265 | Self::Vp9 | Self::Av1 => Some(MediaKind::Video),
            Self::Aac | Self::Mp3 | Self::Opus | Self::Flac => Some(MediaKind::Audio),
            Self::SubRip | Self::WebVtt | Self::Ass => Some(MediaKind::Subtitle),
            Self::Other(_) => None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
            Self::Aac => "AAC",
            Self::Mp3 => "MP3",
            Self::Opus => "Opus",
            Self::Flac => "FLAC",
            Self::SubRip => "SubRip",
            Self::WebVtt => "WebVTT",
            Self::Ass => "ASS/SSA",
            Self::Other(name) => name,
        }
    }
}

/// Output/input container format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerFormat {
    /// ISO BMFF (MP4, M4V).
    Mp4,
    /// QuickTime.
    Mov,
    /// Matroska (MKV).
    Mkv,
    /// WebM (Matroska subset).
    WebM,
    /// MPEG transport stream.
    MpegTs,
    /// Flash video.
    Flv,
}

impl ContainerFormat {
    pub fn file_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => &["mp4", "m4v", "m4a"],
            Self::Mov => &["mov"],
            Self::Mkv => &["mkv", "mka", "mks"],
            Self::WebM => &["webm"],
            Self::MpegTs => &["ts", "m2ts", "mts"],
            Self::Flv => &["flv"],
        }
    }

    /// Extension used when the caller asks for the recommended one.
    pub fn recommended_extension(self) -> &'static str {
        self.file_extensions()[0]
    }

    /// Short format name (as a container library would report it).
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "matroska",
            Self::WebM => "webm",
            Self::MpegTs => "mpegts",
            Self::Flv => "flv",
        }
    }

    /// Whether codec headers must live in the container's global header
    /// instead of being repeated in-band.
    pub fn needs_global_header(self) -> bool {
        !matches!(self, Self::MpegTs)
    }

    /// Look up a format by file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        [
            Self::Mp4,
            Self::Mov,
            Self::Mkv,
            Self::WebM,
            Self::MpegTs,
            Self::Flv,
        ]
        .into_iter()
        .find(|f| f.file_extensions().contains(&ext.as_str()))
    }

    /// Look up a format by the extension of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Look up a format by a short name or extension (`"matroska"`, `"mp4"`).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "matroska" => Some(Self::Mkv),
            "mpegts" => Some(Self::MpegTs),
            other => Self::from_extension(other),
        }
    }

    /// Map an input format name (comma separated aliases, as demuxers report
    /// them, e.g. `"mov,mp4,m4a,3gp"`) to the format a remux should target.
    pub fn from_input_format_name(name: &str) -> Option<Self> {
        let aliases: Vec<String> = name
            .split(',')
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();
        if aliases.iter().any(|a| a == "hls" || a == "applehttp") {
            return Some(Self::MpegTs);
        }
        if aliases.iter().any(|a| a == "mp4") {
            return Some(Self::Mp4);
        }
        aliases.iter().find_map(|a| Self::from_name(a))
    }
}
