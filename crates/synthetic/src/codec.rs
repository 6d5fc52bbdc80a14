//! Pass-through codec: every packet becomes exactly one frame.

use vela_common::{
    AudioSamples, CodecContext, CodecFrame, CodecParameters, DecodeError, EncodedPacket,
    FramePayload, MediaKind, PictureType, PixelFormat, StreamDescriptor, SubtitleText, TextSpan,
    VideoPicture,
};

use crate::source::FAIL_SESSION_KEY;

pub struct PassthroughCodec {
    kind: MediaKind,
    params: CodecParameters,
    fail_after: Option<usize>,
    decoded: usize,
    broken: bool,
}

impl PassthroughCodec {
    pub fn new(stream: &StreamDescriptor) -> Result<Self, DecodeError> {
        let kind = stream
            .codec
            .kind()
            .ok_or_else(|| DecodeError::UnsupportedCodec(stream.codec.clone()))?;
        if kind != stream.kind {
            return Err(DecodeError::Init {
                codec: stream.codec.clone(),
                reason: format!("codec produces {kind}, stream is {}", stream.kind),
            });
        }
        let fail_after = stream
            .metadata
            .get(FAIL_SESSION_KEY)
            .and_then(|v| v.parse().ok());
        Ok(Self {
            kind,
            params: stream.params.clone(),
            fail_after,
            decoded: 0,
            broken: false,
        })
    }

    fn payload(&self, packet: &EncodedPacket) -> FramePayload {
        match self.kind {
            MediaKind::Video => FramePayload::Video(VideoPicture {
                picture_type: if packet.is_keyframe {
                    PictureType::I
                } else {
                    PictureType::P
                },
                width: self.params.width,
                height: self.params.height,
                format: PixelFormat::Yuv420p,
                planes: vec![packet.data.clone(), Vec::new(), Vec::new()],
            }),
            MediaKind::Audio => {
                let frames = packet.duration.max(0) as usize;
                FramePayload::Audio(AudioSamples {
                    sample_rate: self.params.sample_rate,
                    channels: self.params.channels,
                    samples: vec![0.0; frames * self.params.channels as usize],
                })
            }
            MediaKind::Subtitle => FramePayload::Subtitle(SubtitleText {
                spans: vec![TextSpan {
                    text: String::from_utf8_lossy(&packet.data).into_owned(),
                    ..Default::default()
                }],
            }),
        }
    }
}

impl CodecContext for PassthroughCodec {
    fn decode(&mut self, packet: &EncodedPacket) -> Result<Vec<CodecFrame>, DecodeError> {
        if self.broken {
            return Err(DecodeError::InvalidSession);
        }
        if self.fail_after.is_some_and(|n| self.decoded >= n) {
            self.broken = true;
            return Err(DecodeError::InvalidSession);
        }
        if packet.data.is_empty() {
            return Err(DecodeError::DecodeFailed {
                pts: packet.pts,
                reason: "empty packet".into(),
            });
        }
        self.decoded += 1;

        // Subtitle codecs leave the display time to the packet.
        let duration = if self.kind == MediaKind::Subtitle {
            0
        } else {
            packet.duration
        };
        Ok(vec![CodecFrame {
            pts: packet.pts,
            duration,
            payload: self.payload(packet),
        }])
    }

    fn drain(&mut self) -> Result<Vec<CodecFrame>, DecodeError> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamSpec;
    use vela_common::CodecId;

    fn packet(data: &[u8], keyframe: bool) -> EncodedPacket {
        EncodedPacket {
            stream_index: 0,
            data: data.to_vec(),
            pts: Some(0),
            dts: Some(0),
            duration: 1_024,
            is_keyframe: keyframe,
        }
    }

    #[test]
    fn picture_type_follows_keyframe_flag() {
        let mut codec = PassthroughCodec::new(&StreamSpec::video(0, 4, 4).descriptor).unwrap();
        let frames = codec.decode(&packet(b"x", true)).unwrap();
        assert!(matches!(&frames[0].payload, FramePayload::Video(v) if v.is_intra()));
        let frames = codec.decode(&packet(b"x", false)).unwrap();
        assert!(matches!(&frames[0].payload, FramePayload::Video(v) if !v.is_intra()));
    }

    #[test]
    fn audio_sample_count_matches_duration() {
        let mut codec = PassthroughCodec::new(&StreamSpec::audio(0, "eng").descriptor).unwrap();
        let frames = codec.decode(&packet(b"a", true)).unwrap();
        match &frames[0].payload {
            FramePayload::Audio(a) => assert_eq!(a.frame_count(), 1_024),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn empty_packet_is_rejected() {
        let mut codec = PassthroughCodec::new(&StreamSpec::audio(0, "eng").descriptor).unwrap();
        let err = codec.decode(&packet(b"", true)).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn session_breaks_after_limit() {
        let spec = StreamSpec::video(0, 4, 4).failing_session_after(1);
        let mut codec = PassthroughCodec::new(&spec.descriptor).unwrap();
        codec.decode(&packet(b"x", true)).unwrap();
        assert!(codec.decode(&packet(b"x", false)).unwrap_err().is_fatal());
        assert!(codec.decode(&packet(b"x", true)).unwrap_err().is_fatal());
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let spec = StreamSpec::video(0, 4, 4).with_codec(CodecId::Other("prores".into()));
        assert!(matches!(
            PassthroughCodec::new(&spec.descriptor),
            Err(DecodeError::UnsupportedCodec(_))
        ));
    }
}
