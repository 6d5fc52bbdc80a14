//! Decoded frames: output of decoders, consumed by renderers outside the
//! pipeline core.

use crate::codec::MediaKind;
use crate::color::PixelFormat;
use crate::types::Ticks;

/// Coding type of a decoded picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PictureType {
    /// Intra-coded: decodable on its own.
    I,
    /// Predicted from earlier pictures.
    P,
    /// Bi-directionally predicted.
    B,
    Unknown,
}

/// Decoded picture data.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoPicture {
    pub picture_type: PictureType,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// One buffer per plane (see [`PixelFormat::plane_count`]).
    pub planes: Vec<Vec<u8>>,
}

impl VideoPicture {
    pub fn is_intra(&self) -> bool {
        self.picture_type == PictureType::I
    }
}

/// Decoded interleaved audio samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
}

impl AudioSamples {
    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// One styled run of subtitle text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

/// Decoded subtitle event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubtitleText {
    pub spans: Vec<TextSpan>,
}

impl SubtitleText {
    /// Concatenated plain text of all spans.
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Kind-specific frame payload.
#[derive(Clone, Debug, PartialEq)]
pub enum FramePayload {
    Video(VideoPicture),
    Audio(AudioSamples),
    Subtitle(SubtitleText),
}

impl FramePayload {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Audio(_) => MediaKind::Audio,
            Self::Subtitle(_) => MediaKind::Subtitle,
        }
    }
}

/// Frame as returned by a codec: timestamps still in the stream timebase.
#[derive(Clone, Debug, PartialEq)]
pub struct CodecFrame {
    pub pts: Option<i64>,
    /// Duration in stream timebase units (0 when unknown).
    pub duration: i64,
    pub payload: FramePayload,
}

/// Frame handed to consumers: timestamp normalized to ticks relative to the
/// container start.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub timestamp: Ticks,
    pub duration: Ticks,
    pub payload: FramePayload,
}

impl DecodedFrame {
    pub fn kind(&self) -> MediaKind {
        self.payload.kind()
    }

    pub fn as_video(&self) -> Option<&VideoPicture> {
        match &self.payload {
            FramePayload::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioSamples> {
        match &self.payload {
            FramePayload::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_subtitle(&self) -> Option<&SubtitleText> {
        match &self.payload {
            FramePayload::Subtitle(s) => Some(s),
            _ => None,
        }
    }
}
