//! In-memory output containers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use vela_common::{
    ContainerFormat, EncodedPacket, MuxError, OutputContainer, Rational, StreamDescriptor,
};

/// One stream of a recorded output.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputStream {
    pub descriptor: StreamDescriptor,
    pub time_base: Rational,
}

/// Everything written to one output path.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRecord {
    pub format: ContainerFormat,
    pub streams: Vec<OutputStream>,
    pub header_written: bool,
    pub packets: Vec<EncodedPacket>,
    pub trailer_written: bool,
    /// How many times the trailer was written (more than one is a bug).
    pub trailer_count: u32,
}

impl OutputRecord {
    fn new(format: ContainerFormat) -> Self {
        Self {
            format,
            streams: Vec::new(),
            header_written: false,
            packets: Vec::new(),
            trailer_written: false,
            trailer_count: 0,
        }
    }
}

pub(crate) type OutputStore = Arc<Mutex<HashMap<PathBuf, OutputRecord>>>;

/// Timebase a real muxer of `format` would pick for a stream that asked for
/// `requested`.
fn settled_time_base(format: ContainerFormat, requested: Rational) -> Rational {
    match format {
        ContainerFormat::Mkv | ContainerFormat::WebM | ContainerFormat::Flv => Rational::MILLIS,
        ContainerFormat::MpegTs => Rational::MPEG,
        ContainerFormat::Mp4 | ContainerFormat::Mov => requested,
    }
}

/// Output container writing into the backend's shared store.
pub struct MemoryOutput {
    path: PathBuf,
    format: ContainerFormat,
    store: OutputStore,
    fail_header: bool,
}

impl MemoryOutput {
    pub(crate) fn create(
        path: PathBuf,
        format: ContainerFormat,
        store: OutputStore,
        fail_header: bool,
    ) -> Self {
        store.lock().insert(path.clone(), OutputRecord::new(format));
        Self {
            path,
            format,
            store,
            fail_header,
        }
    }

    fn with_record<T>(
        &self,
        f: impl FnOnce(&mut OutputRecord) -> Result<T, MuxError>,
    ) -> Result<T, MuxError> {
        let mut store = self.store.lock();
        let record = store
            .get_mut(&self.path)
            .ok_or_else(|| MuxError::InvalidState("output record vanished".into()))?;
        f(record)
    }
}

impl OutputContainer for MemoryOutput {
    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn add_stream(&mut self, input: &StreamDescriptor) -> Result<(usize, Rational), MuxError> {
        self.with_record(|record| {
            if record.header_written {
                return Err(MuxError::InvalidState("header already written".into()));
            }
            record.streams.push(OutputStream {
                descriptor: input.clone(),
                time_base: input.time_base,
            });
            Ok((record.streams.len() - 1, input.time_base))
        })
    }

    fn write_header(&mut self) -> Result<(), MuxError> {
        let format = self.format;
        let fail = self.fail_header;
        self.with_record(|record| {
            if fail {
                return Err(MuxError::Header("simulated header failure".into()));
            }
            if record.streams.is_empty() {
                return Err(MuxError::Header("no streams".into()));
            }
            for stream in &mut record.streams {
                stream.time_base = settled_time_base(format, stream.time_base);
            }
            record.header_written = true;
            Ok(())
        })
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        let store = self.store.lock();
        store
            .get(&self.path)
            .and_then(|r| r.streams.get(index))
            .map(|s| s.time_base)
    }

    fn write_packet(&mut self, packet: EncodedPacket) -> Result<(), MuxError> {
        self.with_record(|record| {
            if !record.header_written || record.trailer_written {
                return Err(MuxError::Write("output not accepting packets".into()));
            }
            if packet.stream_index >= record.streams.len() {
                return Err(MuxError::TrackError(format!(
                    "no output stream {}",
                    packet.stream_index
                )));
            }
            record.packets.push(packet);
            Ok(())
        })
    }

    fn write_trailer(&mut self) -> Result<(), MuxError> {
        self.with_record(|record| {
            if !record.header_written {
                return Err(MuxError::Trailer("header not written".into()));
            }
            record.trailer_written = true;
            record.trailer_count += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamSpec;

    #[test]
    fn matroska_settles_on_milliseconds() {
        let store = OutputStore::default();
        let mut out = MemoryOutput::create("/o.mkv".into(), ContainerFormat::Mkv, store.clone(), false);
        let (idx, requested) = out.add_stream(&StreamSpec::video(0, 2, 2).descriptor).unwrap();
        assert_eq!(requested, Rational::MPEG);
        out.write_header().unwrap();
        assert_eq!(out.stream_time_base(idx), Some(Rational::MILLIS));
    }

    #[test]
    fn packets_require_header() {
        let store = OutputStore::default();
        let mut out = MemoryOutput::create("/o.mp4".into(), ContainerFormat::Mp4, store, false);
        out.add_stream(&StreamSpec::audio(0, "eng").descriptor).unwrap();
        let pkt = EncodedPacket {
            stream_index: 0,
            data: vec![1],
            pts: Some(0),
            dts: Some(0),
            duration: 1,
            is_keyframe: true,
        };
        assert!(out.write_packet(pkt.clone()).is_err());
        out.write_header().unwrap();
        out.write_packet(pkt).unwrap();
        out.write_trailer().unwrap();
    }

    #[test]
    fn header_failure_can_be_simulated() {
        let store = OutputStore::default();
        let mut out = MemoryOutput::create("/o.ts".into(), ContainerFormat::MpegTs, store, true);
        out.add_stream(&StreamSpec::video(0, 2, 2).descriptor).unwrap();
        assert!(matches!(out.write_header(), Err(MuxError::Header(_))));
    }
}
