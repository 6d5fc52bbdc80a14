//! Builders describing synthetic containers.

use std::collections::BTreeMap;
use std::time::Duration;

use vela_common::{CodecId, CodecParameters, MediaKind, Rational, StreamDescriptor, Ticks};

/// Metadata key carrying the packet count after which a codec session breaks.
pub(crate) const FAIL_SESSION_KEY: &str = "synthetic.fail_session_after";

/// One generated elementary stream.
#[derive(Clone, Debug)]
pub struct StreamSpec {
    pub descriptor: StreamDescriptor,
    /// Spacing between packets, in the stream timebase.
    pub interval: i64,
    /// Duration stamped on each packet, in the stream timebase.
    pub packet_duration: i64,
    /// Keyframe every `gop` packets.
    pub gop: u32,
    /// Every n-th packet carries no payload (rejected by the codec).
    pub empty_packet_every: Option<usize>,
}

impl StreamSpec {
    fn new(index: usize, kind: MediaKind, codec: CodecId, time_base: Rational) -> StreamDescriptor {
        StreamDescriptor {
            index,
            kind,
            codec,
            time_base,
            start_time: Ticks::ZERO,
            duration: Ticks::ZERO,
            bitrate: 0,
            language: None,
            metadata: BTreeMap::new(),
            params: CodecParameters::default(),
        }
    }

    /// 25 fps H.264, 90 kHz timebase, keyframe every 12 frames.
    pub fn video(index: usize, width: u32, height: u32) -> Self {
        let mut descriptor = Self::new(index, MediaKind::Video, CodecId::H264, Rational::MPEG);
        descriptor.bitrate = 4_000_000;
        descriptor.params = CodecParameters {
            width,
            height,
            frame_rate: Some(Rational::FPS_25),
            extra_data: vec![0x67, 0x64, 0x00, 0x28],
            ..Default::default()
        };
        Self {
            descriptor,
            interval: 3_600,
            packet_duration: 3_600,
            gop: 12,
            empty_packet_every: None,
        }
    }

    /// Stereo 48 kHz AAC, 1024 samples per packet.
    pub fn audio(index: usize, language: &str) -> Self {
        let mut descriptor =
            Self::new(index, MediaKind::Audio, CodecId::Aac, Rational::new(1, 48_000));
        descriptor.bitrate = 128_000;
        descriptor.language = Some(language.to_string());
        descriptor.params = CodecParameters {
            sample_rate: 48_000,
            channels: 2,
            extra_data: vec![0x11, 0x90],
            ..Default::default()
        };
        Self {
            descriptor,
            interval: 1_024,
            packet_duration: 1_024,
            gop: 1,
            empty_packet_every: None,
        }
    }

    /// SubRip cue every two seconds, each shown for 1.5 s.
    pub fn subtitle(index: usize, language: &str) -> Self {
        let mut descriptor =
            Self::new(index, MediaKind::Subtitle, CodecId::SubRip, Rational::MILLIS);
        descriptor.language = Some(language.to_string());
        Self {
            descriptor,
            interval: 2_000,
            packet_duration: 1_500,
            gop: 1,
            empty_packet_every: None,
        }
    }

    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.descriptor.codec = codec;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.descriptor.language = Some(language.to_string());
        self
    }

    pub fn with_gop(mut self, gop: u32) -> Self {
        self.gop = gop.max(1);
        self
    }

    /// The codec created for this stream reports an invalid session after
    /// decoding `packets` packets.
    pub fn failing_session_after(mut self, packets: usize) -> Self {
        self.descriptor
            .metadata
            .insert(FAIL_SESSION_KEY.to_string(), packets.to_string());
        self
    }

    pub fn with_empty_packets_every(mut self, n: usize) -> Self {
        self.empty_packet_every = Some(n.max(1));
        self
    }

    pub fn interval_ticks(&self) -> i64 {
        Ticks::from_timestamp(self.interval, self.descriptor.time_base).0.max(1)
    }
}

/// A whole synthetic container.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    /// Input format name as reported to the demuxer.
    pub format_name: String,
    pub streams: Vec<StreamSpec>,
    /// Length of generated content (a live source reports zero but still
    /// ends gracefully after this much).
    pub content_length: Ticks,
    pub start_time: Ticks,
    pub live: bool,
    /// Seeks land on the exact packet instead of a keyframe.
    pub imprecise_seek: bool,
    /// After this many packets every read blocks until interrupted.
    pub block_after: Option<usize>,
    /// After this many packets reads fail with an I/O error.
    pub fail_after: Option<usize>,
    /// After this many packets reads report corrupt data.
    pub corrupt_after: Option<usize>,
    /// Simulated latency per read.
    pub read_delay: Option<Duration>,
    /// Simulated latency of opening the container.
    pub open_delay: Option<Duration>,
}

impl SourceSpec {
    /// MP4 container without streams.
    pub fn empty(duration_ms: i64) -> Self {
        Self {
            format_name: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            streams: Vec::new(),
            content_length: Ticks::from_millis(duration_ms),
            start_time: Ticks::ZERO,
            live: false,
            imprecise_seek: false,
            block_after: None,
            fail_after: None,
            corrupt_after: None,
            read_delay: None,
            open_delay: None,
        }
    }

    /// 1080p video, English and French audio, English subtitles.
    pub fn movie(duration_ms: i64) -> Self {
        Self::empty(duration_ms)
            .with_stream(StreamSpec::video(0, 1920, 1080))
            .with_stream(StreamSpec::audio(1, "eng"))
            .with_stream(StreamSpec::audio(2, "fre"))
            .with_stream(StreamSpec::subtitle(3, "eng"))
    }

    /// HLS-like live source with 720p video and English audio.
    pub fn live(content_ms: i64) -> Self {
        let mut spec = Self::empty(content_ms)
            .with_format_name("hls")
            .with_stream(StreamSpec::video(0, 1280, 720))
            .with_stream(StreamSpec::audio(1, "eng"));
        spec.live = true;
        spec
    }

    /// Append a stream; its index becomes its position.
    pub fn with_stream(mut self, mut stream: StreamSpec) -> Self {
        stream.descriptor.index = self.streams.len();
        self.streams.push(stream);
        self
    }

    pub fn with_format_name(mut self, name: &str) -> Self {
        self.format_name = name.to_string();
        self
    }

    pub fn with_start_time(mut self, start: Ticks) -> Self {
        self.start_time = start;
        self
    }

    pub fn with_imprecise_seek(mut self) -> Self {
        self.imprecise_seek = true;
        self
    }

    pub fn blocking_after(mut self, packets: usize) -> Self {
        self.block_after = Some(packets);
        self
    }

    pub fn failing_after(mut self, packets: usize) -> Self {
        self.fail_after = Some(packets);
        self
    }

    pub fn corrupt_after(mut self, packets: usize) -> Self {
        self.corrupt_after = Some(packets);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Duration the container reports (zero for live sources).
    pub fn reported_duration(&self) -> Ticks {
        if self.live {
            Ticks::ZERO
        } else {
            self.content_length
        }
    }

    /// Stream descriptors as the container reports them.
    pub fn descriptors(&self) -> Vec<StreamDescriptor> {
        self.streams
            .iter()
            .map(|s| {
                let mut d = s.descriptor.clone();
                d.start_time = self.start_time;
                d.duration = self.reported_duration();
                d
            })
            .collect()
    }
}
