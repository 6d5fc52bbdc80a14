//! Configuration structs for the demuxer, decoders, audio and subtitles.
//!
//! Every struct has a `Default`, and missing JSON fields fall back to it, so a
//! config file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::MediaKind;
use crate::error::PipelineError;
use crate::types::Ticks;

/// Demuxer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxerConfig {
    /// Packets buffered per queue before the read loop suspends.
    pub max_queue_packets: usize,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            max_queue_packets: 256,
        }
    }
}

/// Decoder settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    /// Codec threads (0 = auto).
    pub threads: u32,
    /// Frame queue bound for video decoders.
    pub max_video_frames: usize,
    /// Frame queue bound for audio decoders.
    pub max_audio_frames: usize,
    /// Frame queue bound for subtitle decoders.
    pub max_subtitle_frames: usize,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            max_video_frames: 4,
            max_audio_frames: 32,
            max_subtitle_frames: 16,
        }
    }
}

impl DecoderSettings {
    /// Frame queue bound for a decoder of `kind`.
    pub fn max_frames(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Video => self.max_video_frames,
            MediaKind::Audio => self.max_audio_frames,
            MediaKind::Subtitle => self.max_subtitle_frames,
        }
    }
}

/// Audio settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// User-adjustable audio delay.
    pub delay: Ticks,
    /// Output device latency.
    pub latency: Ticks,
    /// ISO 639 language to prefer when picking the default audio stream.
    pub preferred_language: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Ticks::ZERO,
            latency: Ticks::ZERO,
            preferred_language: None,
        }
    }
}

impl AudioConfig {
    /// Total offset subtracted from audio seek targets.
    pub fn seek_offset(&self) -> Ticks {
        self.delay + self.latency
    }
}

/// Subtitle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub enabled: bool,
    /// User-adjustable subtitle delay.
    pub delay: Ticks,
    pub preferred_language: Option<String>,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Ticks::ZERO,
            preferred_language: None,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub demuxer: DemuxerConfig,
    pub decoder: DecoderSettings,
    pub audio: AudioConfig,
    pub subtitles: SubtitleConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(|e| PipelineError::Other(format!("Invalid config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Other(format!("Config serialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "audio": { "delay": 500000, "preferred_language": "eng" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.audio.delay, Ticks::from_millis(50));
        assert_eq!(cfg.audio.preferred_language.as_deref(), Some("eng"));
        assert!(cfg.audio.enabled);
        assert_eq!(cfg.demuxer, DemuxerConfig::default());
        assert_eq!(cfg.decoder.max_frames(MediaKind::Video), 4);
    }

    #[test]
    fn seek_offset_sums_delay_and_latency() {
        let audio = AudioConfig {
            delay: Ticks::from_millis(20),
            latency: Ticks::from_millis(30),
            ..Default::default()
        };
        assert_eq!(audio.seek_offset(), Ticks::from_millis(50));
    }

    #[test]
    fn round_trips_through_json() {
        let mut cfg = PipelineConfig::default();
        cfg.subtitles.enabled = false;
        cfg.demuxer.max_queue_packets = 64;
        let json = cfg.to_json_pretty().unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), cfg);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(PipelineConfig::from_json_str("{ not json").is_err());
    }
}
