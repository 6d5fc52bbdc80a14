//! Synthetic input container.

use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use vela_common::{
    DemuxError, EncodedPacket, InputContainer, Interrupter, ReadError, StreamDescriptor, Ticks,
};

use crate::source::{SourceSpec, StreamSpec};

/// Poll interval while a read is parked.
const POLL: Duration = Duration::from_millis(2);

struct Cursor {
    stream: StreamSpec,
    /// Next packet number.
    next: i64,
    /// Container start in stream timebase units.
    start_ts: i64,
}

impl Cursor {
    fn timestamp(&self, n: i64) -> i64 {
        self.start_ts + n * self.stream.interval
    }

    fn ticks(&self, n: i64) -> Ticks {
        Ticks::from_timestamp(self.timestamp(n), self.stream.descriptor.time_base)
    }
}

/// Container generated from a [`SourceSpec`].
pub struct SyntheticInput {
    spec: SourceSpec,
    descriptors: Vec<StreamDescriptor>,
    cursors: Vec<Cursor>,
    interrupter: Interrupter,
    packets_read: usize,
}

impl SyntheticInput {
    pub fn new(spec: SourceSpec, interrupter: Interrupter) -> Self {
        let descriptors = spec.descriptors();
        let cursors = spec
            .streams
            .iter()
            .map(|s| {
                let mut stream = s.clone();
                stream.gop = stream.gop.max(1);
                stream.interval = stream.interval.max(1);
                stream.empty_packet_every = stream.empty_packet_every.map(|n| n.max(1));
                Cursor {
                    stream,
                    next: 0,
                    start_ts: spec.start_time.to_timestamp(s.descriptor.time_base),
                }
            })
            .collect();
        Self {
            spec,
            descriptors,
            cursors,
            interrupter,
            packets_read: 0,
        }
    }

    fn end(&self) -> Ticks {
        self.spec.start_time + self.spec.content_length
    }

    /// Sleep `total`, returning early with `Interrupted` on request.
    fn wait(&self, total: Duration) -> Result<(), ReadError> {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.interrupter.is_interrupted() {
                return Err(ReadError::Interrupted);
            }
            thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        Ok(())
    }

    fn check_injected_failures(&self) -> Result<(), ReadError> {
        if self.spec.block_after.is_some_and(|n| self.packets_read >= n) {
            trace!("Synthetic read blocking until interrupted");
            loop {
                if self.interrupter.is_interrupted() {
                    return Err(ReadError::Interrupted);
                }
                thread::sleep(POLL);
            }
        }
        if self.spec.fail_after.is_some_and(|n| self.packets_read >= n) {
            return Err(ReadError::Io("connection reset by peer".into()));
        }
        if self.spec.corrupt_after.is_some_and(|n| self.packets_read >= n) {
            return Err(ReadError::Corrupt("invalid packet header".into()));
        }
        Ok(())
    }
}

impl InputContainer for SyntheticInput {
    fn format_name(&self) -> &str {
        &self.spec.format_name
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.descriptors
    }

    fn duration(&self) -> Ticks {
        self.spec.reported_duration()
    }

    fn start_time(&self) -> Ticks {
        self.spec.start_time
    }

    fn is_live(&self) -> bool {
        self.spec.live
    }

    fn read_packet(&mut self) -> Result<EncodedPacket, ReadError> {
        if self.interrupter.is_interrupted() {
            return Err(ReadError::Interrupted);
        }
        if let Some(delay) = self.spec.read_delay {
            self.wait(delay)?;
        }
        self.check_injected_failures()?;

        let end = self.end();
        let Some(cursor) = self
            .cursors
            .iter_mut()
            .filter(|c| c.ticks(c.next) < end)
            .min_by_key(|c| (c.ticks(c.next), c.stream.descriptor.index))
        else {
            return Err(ReadError::EndOfStream);
        };

        let n = cursor.next;
        cursor.next += 1;
        let stream = &cursor.stream;
        let ts = cursor.start_ts + n * stream.interval;
        let empty = stream
            .empty_packet_every
            .is_some_and(|every| (n as usize) % every == every - 1);
        let data = if empty {
            Vec::new()
        } else {
            format!("{}:{}", stream.descriptor.index, n).into_bytes()
        };

        self.packets_read += 1;
        Ok(EncodedPacket {
            stream_index: stream.descriptor.index,
            data,
            pts: Some(ts),
            dts: Some(ts),
            duration: stream.packet_duration,
            is_keyframe: n % stream.gop as i64 == 0,
        })
    }

    fn seek(&mut self, target: Ticks, forward: bool) -> Result<(), DemuxError> {
        let relative = (target - self.spec.start_time).0.max(0);
        for cursor in &mut self.cursors {
            let interval = cursor.stream.interval_ticks();
            let floor = relative / interval;
            let ceil = floor + i64::from(relative % interval != 0);
            let gop = cursor.stream.gop as i64;

            cursor.next = if self.spec.imprecise_seek {
                floor
            } else if forward {
                (ceil + gop - 1) / gop * gop
            } else {
                floor / gop * gop
            };
        }
        trace!(target = %target, forward, "Synthetic seek");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_common::InterruptRequest;

    fn read_all(input: &mut SyntheticInput) -> Vec<EncodedPacket> {
        let mut out = Vec::new();
        while let Ok(p) = input.read_packet() {
            out.push(p);
        }
        out
    }

    #[test]
    fn packets_interleave_by_time() {
        let mut input = SyntheticInput::new(SourceSpec::movie(1_000), Interrupter::new());
        let packets = read_all(&mut input);
        let video = packets.iter().filter(|p| p.stream_index == 0).count();
        let subs = packets.iter().filter(|p| p.stream_index == 3).count();
        assert_eq!(video, 25);
        assert_eq!(subs, 1);
        assert_eq!(input.read_packet(), Err(ReadError::EndOfStream));
    }

    #[test]
    fn keyframes_follow_gop() {
        let mut input = SyntheticInput::new(
            SourceSpec::empty(1_000).with_stream(StreamSpec::video(0, 2, 2)),
            Interrupter::new(),
        );
        let keys: Vec<bool> = read_all(&mut input).iter().map(|p| p.is_keyframe).collect();
        assert!(keys[0] && keys[12] && keys[24]);
        assert!(!keys[1] && !keys[13]);
    }

    #[test]
    fn zero_gop_means_all_keyframes() {
        let mut video = StreamSpec::video(0, 2, 2);
        video.gop = 0;
        let mut input = SyntheticInput::new(SourceSpec::empty(400).with_stream(video), Interrupter::new());
        let packets = read_all(&mut input);
        assert_eq!(packets.len(), 10);
        assert!(packets.iter().all(|p| p.is_keyframe));
        input.seek(Ticks::from_millis(100), true).unwrap();
        assert!(input.read_packet().unwrap().is_keyframe);
    }

    #[test]
    fn seek_lands_on_keyframes() {
        let spec = SourceSpec::empty(5_000).with_stream(StreamSpec::video(0, 2, 2));
        let mut input = SyntheticInput::new(spec, Interrupter::new());

        input.seek(Ticks::from_millis(700), true).unwrap();
        let p = input.read_packet().unwrap();
        assert!(p.is_keyframe);
        assert_eq!(p.pts, Some(24 * 3_600));

        input.seek(Ticks::from_millis(700), false).unwrap();
        let p = input.read_packet().unwrap();
        assert_eq!(p.pts, Some(12 * 3_600));
    }

    #[test]
    fn imprecise_seek_lands_mid_gop() {
        let spec = SourceSpec::empty(5_000)
            .with_stream(StreamSpec::video(0, 2, 2))
            .with_imprecise_seek();
        let mut input = SyntheticInput::new(spec, Interrupter::new());
        input.seek(Ticks::from_millis(700), true).unwrap();
        let p = input.read_packet().unwrap();
        assert!(!p.is_keyframe);
        assert_eq!(p.pts, Some(17 * 3_600));
    }

    #[test]
    fn blocked_read_returns_on_interrupt() {
        let irq = Interrupter::new();
        let mut input = SyntheticInput::new(SourceSpec::live(5_000).blocking_after(0), irq.clone());
        let trigger = irq.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.request(InterruptRequest::Stop);
        });
        assert_eq!(input.read_packet(), Err(ReadError::Interrupted));
        handle.join().unwrap();
    }

    #[test]
    fn start_time_offsets_timestamps() {
        let spec = SourceSpec::empty(1_000)
            .with_stream(StreamSpec::subtitle(0, "eng"))
            .with_start_time(Ticks::from_millis(10_000));
        let mut input = SyntheticInput::new(spec, Interrupter::new());
        assert_eq!(input.read_packet().unwrap().pts, Some(10_000));
    }
}
