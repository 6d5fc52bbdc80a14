//! Stream descriptors and encoded packets: output of demuxer, input to
//! decoder and remuxer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecId, MediaKind};
use crate::types::{Rational, Ticks};

/// Where a container comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaSource {
    /// Local file.
    Path(PathBuf),
    /// Network or device URI (`https://…`, `rtsp://…`, `synth://…`).
    Url(String),
}

impl MediaSource {
    /// Classify a user-supplied string: anything with a scheme is a URL.
    pub fn parse(input: &str) -> Self {
        if input.contains("://") {
            Self::Url(input.to_string())
        } else {
            Self::Path(PathBuf::from(input))
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => f.write_str(u),
        }
    }
}

/// Codec parameters copied from the container into decoders and output
/// streams.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    /// Video width in pixels (0 for non-video).
    pub width: u32,
    /// Video height in pixels (0 for non-video).
    pub height: u32,
    /// Nominal frame rate (video only).
    pub frame_rate: Option<Rational>,
    /// Audio sample rate in Hz (0 for non-audio).
    pub sample_rate: u32,
    /// Audio channel count (0 for non-audio).
    pub channels: u16,
    /// Codec-specific data (SPS/PPS, AudioSpecificConfig, ...).
    pub extra_data: Vec<u8>,
    /// Codec headers are carried in the container's global header.
    pub global_header: bool,
}

/// Immutable metadata about one elementary stream, extracted once when the
/// container is opened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Index of the stream inside its container.
    pub index: usize,
    pub kind: MediaKind,
    pub codec: CodecId,
    /// Unit of this stream's packet timestamps.
    pub time_base: Rational,
    /// Start-time offset of the stream.
    pub start_time: Ticks,
    /// Total duration (zero when unknown or live).
    pub duration: Ticks,
    /// Bits per second (0 when unknown).
    pub bitrate: u64,
    /// ISO 639 language tag.
    pub language: Option<String>,
    /// Free-form container metadata (title, handler name, ...).
    pub metadata: BTreeMap<String, String>,
    pub params: CodecParameters,
}

impl StreamDescriptor {
    /// Pixel count, used to pick the "best" video stream.
    pub fn pixel_count(&self) -> u64 {
        self.params.width as u64 * self.params.height as u64
    }

    /// Whether the language tag matches `lang` (case-insensitive).
    pub fn has_language(&self, lang: &str) -> bool {
        self.language
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case(lang))
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}",
            self.index,
            self.kind,
            self.codec.display_name()
        )?;
        match self.kind {
            MediaKind::Video => write!(f, " {}x{}", self.params.width, self.params.height)?,
            MediaKind::Audio => write!(
                f,
                " {}Hz {}ch",
                self.params.sample_rate, self.params.channels
            )?,
            MediaKind::Subtitle => {}
        }
        if let Some(lang) = &self.language {
            write!(f, " [{lang}]")?;
        }
        Ok(())
    }
}

/// Encoded packet as read from a container.
///
/// Timestamps are in the originating stream's timebase until a remuxer
/// rescales them. `None` means "no timestamp".
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedPacket {
    /// Index of the originating stream.
    pub stream_index: usize,
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decode timestamp.
    pub dts: Option<i64>,
    /// Duration in stream timebase units (0 when unknown).
    pub duration: i64,
    /// Whether this packet starts a decodable unit (keyframe).
    pub is_keyframe: bool,
}

impl EncodedPacket {
    /// Best timestamp for ordering and progress: DTS, falling back to PTS.
    pub fn timestamp(&self) -> Option<i64> {
        self.dts.or(self.pts)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source() {
        assert_eq!(
            MediaSource::parse("https://example.com/a.m3u8"),
            MediaSource::Url("https://example.com/a.m3u8".into())
        );
        assert_eq!(
            MediaSource::parse("/tmp/clip.mp4"),
            MediaSource::Path(PathBuf::from("/tmp/clip.mp4"))
        );
    }

    #[test]
    fn packet_timestamp_prefers_dts() {
        let mut pkt = EncodedPacket {
            stream_index: 0,
            data: vec![1, 2, 3],
            pts: Some(10),
            dts: Some(8),
            duration: 1,
            is_keyframe: true,
        };
        assert_eq!(pkt.timestamp(), Some(8));
        pkt.dts = None;
        assert_eq!(pkt.timestamp(), Some(10));
        assert_eq!(pkt.size(), 3);
    }

    #[test]
    fn language_match_is_case_insensitive() {
        let stream = StreamDescriptor {
            index: 1,
            kind: MediaKind::Audio,
            codec: CodecId::Aac,
            time_base: Rational::new(1, 48_000),
            start_time: Ticks::ZERO,
            duration: Ticks::from_millis(1000),
            bitrate: 128_000,
            language: Some("ENG".into()),
            metadata: BTreeMap::new(),
            params: CodecParameters {
                sample_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
        };
        assert!(stream.has_language("eng"));
        assert!(!stream.has_language("fre"));
        assert_eq!(stream.to_string(), "#1 audio AAC 48000Hz 2ch [ENG]");
    }
}
