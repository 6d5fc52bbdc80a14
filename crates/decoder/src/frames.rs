//! Frame post-processing between the codec and the frame queue.

use vela_common::{CodecFrame, DecodedFrame, FramePayload, Rational, Ticks};

/// Converts codec frames (stream timebase) into frames timestamped in ticks
/// relative to the container start.
#[derive(Clone, Debug)]
pub struct FrameNormalizer {
    time_base: Rational,
    container_start: Ticks,
    /// End of the previous frame, used for frames without a timestamp.
    next_expected: Ticks,
}

impl FrameNormalizer {
    pub fn new(time_base: Rational, container_start: Ticks) -> Self {
        Self {
            time_base,
            container_start,
            next_expected: Ticks::ZERO,
        }
    }

    /// `fallback_duration` (stream timebase) is used when the codec did not
    /// report one, e.g. for subtitle events whose length only the packet
    /// carries.
    pub fn normalize(&mut self, frame: CodecFrame, fallback_duration: i64) -> DecodedFrame {
        let timestamp = match frame.pts {
            Some(pts) => Ticks::from_timestamp(pts, self.time_base) - self.container_start,
            None => self.next_expected,
        };
        let raw_duration = if frame.duration > 0 {
            frame.duration
        } else {
            fallback_duration
        };
        let duration = Ticks::from_timestamp(raw_duration.max(0), self.time_base);
        self.next_expected = timestamp + duration;

        DecodedFrame {
            timestamp,
            duration,
            payload: frame.payload,
        }
    }

    /// Forget the running position (after a flush).
    pub fn reset(&mut self) {
        self.next_expected = Ticks::ZERO;
    }
}

/// Drops video frames until an intra-coded picture arrives.
///
/// Armed on open and after every flush so consumers never see a picture that
/// references frames from before a seek.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyframeGate {
    armed: bool,
}

impl KeyframeGate {
    pub fn new(armed: bool) -> Self {
        Self { armed }
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether `payload` may pass. Non-video payloads always pass.
    pub fn admit(&mut self, payload: &FramePayload) -> bool {
        if !self.armed {
            return true;
        }
        match payload {
            FramePayload::Video(picture) if picture.is_intra() => {
                self.armed = false;
                true
            }
            FramePayload::Video(_) => false,
            _ => true,
        }
    }
}
