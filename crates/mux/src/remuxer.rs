//! Remuxer: rebases and rescales packet timestamps into an output container.
//!
//! Usage:
//! ```ignore
//! let remuxer = Remuxer::new(backend);
//! remuxer.open(Path::new("clip.mkv"), None)?;
//! remuxer.add_stream(&video, false)?;
//! remuxer.add_stream(&dub, true)?; // from the secondary (audio) container
//! remuxer.write_header()?;
//! remuxer.write(packet, false)?;
//! remuxer.write_trailer()?;
//! ```
//!
//! All state sits behind one mutex: the primary and secondary sources may
//! write from different threads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use vela_common::{
    rescale, rescale_opt, ContainerFormat, EncodedPacket, MediaBackend, OutputContainer, Rational,
    StreamDescriptor,
};

use crate::error::{MuxError, MuxResult};

/// How one input stream maps onto an output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemuxStreamMapping {
    pub input_index: usize,
    pub output_index: usize,
    pub input_time_base: Rational,
    /// Requested on `add_stream`, replaced by the container's choice once the
    /// header is written.
    pub output_time_base: Rational,
    /// First DTS seen on this stream; the rebase origin.
    pub first_dts: Option<i64>,
}

impl RemuxStreamMapping {
    /// Rebase and rescale `packet` in place.
    fn apply(&mut self, packet: &mut EncodedPacket) {
        if let Some(dts) = packet.dts {
            let origin = *self.first_dts.get_or_insert(dts);
            packet.dts = Some(dts.saturating_sub(origin));
            packet.pts = packet.pts.map(|pts| pts.saturating_sub(origin));
        }
        packet.pts = rescale_opt(packet.pts, self.input_time_base, self.output_time_base);
        packet.dts = rescale_opt(packet.dts, self.input_time_base, self.output_time_base);
        packet.duration = rescale(packet.duration, self.input_time_base, self.output_time_base);
        packet.stream_index = self.output_index;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Open,
    HeaderWritten,
    Finished,
}

struct RemuxState {
    phase: Phase,
    output: Option<Box<dyn OutputContainer>>,
    destination: Option<PathBuf>,
    format: Option<ContainerFormat>,
    primary: BTreeMap<usize, RemuxStreamMapping>,
    secondary: BTreeMap<usize, RemuxStreamMapping>,
    packets_written: u64,
}

impl RemuxState {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            output: None,
            destination: None,
            format: None,
            primary: BTreeMap::new(),
            secondary: BTreeMap::new(),
            packets_written: 0,
        }
    }

    fn output_mut(&mut self) -> MuxResult<&mut Box<dyn OutputContainer>> {
        self.output
            .as_mut()
            .ok_or_else(|| MuxError::InvalidState("no output container open".into()))
    }

    fn map(&mut self, from_secondary: bool) -> &mut BTreeMap<usize, RemuxStreamMapping> {
        if from_secondary {
            &mut self.secondary
        } else {
            &mut self.primary
        }
    }

    fn finish(&mut self) -> MuxResult<()> {
        if self.phase != Phase::HeaderWritten {
            return Ok(());
        }
        self.phase = Phase::Finished;
        self.output_mut()?.write_trailer()?;
        info!(
            destination = ?self.destination,
            packets = self.packets_written,
            "Remux finalized"
        );
        Ok(())
    }
}

/// Copies packets from one or two input containers into an output file.
pub struct Remuxer {
    backend: Arc<dyn MediaBackend>,
    state: Mutex<RemuxState>,
}

impl Remuxer {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(RemuxState::idle()),
        }
    }

    /// Create the output container. The format comes from `format_hint` (a
    /// short name or extension) or else from the destination's extension.
    pub fn open(&self, destination: &Path, format_hint: Option<&str>) -> MuxResult<ContainerFormat> {
        let format = match format_hint {
            Some(hint) => ContainerFormat::from_name(hint)
                .ok_or_else(|| MuxError::UnknownFormat(hint.to_string()))?,
            None => ContainerFormat::from_path(destination)
                .ok_or_else(|| MuxError::UnknownFormat(destination.display().to_string()))?,
        };

        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            return Err(MuxError::InvalidState("remuxer already open".into()));
        }
        let output = self.backend.create_output(destination, format)?;

        state.output = Some(output);
        state.destination = Some(destination.to_path_buf());
        state.format = Some(format);
        state.phase = Phase::Open;
        info!(destination = %destination.display(), format = format.short_name(), "Remux output created");
        Ok(format)
    }

    /// Add an output stream copying `input`'s codec parameters. Returns the
    /// output stream index.
    pub fn add_stream(&self, input: &StreamDescriptor, from_secondary: bool) -> MuxResult<usize> {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            return Err(MuxError::InvalidState(
                "streams must be added after open and before the header".into(),
            ));
        }
        if state.map(from_secondary).contains_key(&input.index) {
            return Err(MuxError::TrackError(format!(
                "input stream {} already mapped",
                input.index
            )));
        }

        let format = state
            .format
            .ok_or_else(|| MuxError::InvalidState("no output format".into()))?;
        let mut descriptor = input.clone();
        descriptor.params.global_header = format.needs_global_header();

        let (output_index, output_time_base) = state.output_mut()?.add_stream(&descriptor)?;
        state.map(from_secondary).insert(
            input.index,
            RemuxStreamMapping {
                input_index: input.index,
                output_index,
                input_time_base: input.time_base,
                output_time_base,
                first_dts: None,
            },
        );
        debug!(input = %input, output_index, from_secondary, "Output stream added");
        Ok(output_index)
    }

    /// Write the container header. Must be called exactly once, after every
    /// stream was added.
    pub fn write_header(&self) -> MuxResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase != Phase::Open {
            return Err(MuxError::InvalidState("header already written or output not open".into()));
        }
        if state.primary.is_empty() && state.secondary.is_empty() {
            return Err(MuxError::Header("no output streams".into()));
        }

        let output = state
            .output
            .as_mut()
            .ok_or_else(|| MuxError::InvalidState("no output container open".into()))?;
        output.write_header()?;

        let settled: Vec<(usize, Rational)> = (0..state.primary.len() + state.secondary.len())
            .filter_map(|i| output.stream_time_base(i).map(|tb| (i, tb)))
            .collect();
        for mapping in state.primary.values_mut().chain(state.secondary.values_mut()) {
            if let Some(&(_, tb)) = settled.iter().find(|(i, _)| *i == mapping.output_index) {
                mapping.output_time_base = tb;
            }
        }
        state.phase = Phase::HeaderWritten;
        debug!(streams = settled.len(), "Remux header written");
        Ok(())
    }

    /// Rebase, rescale and write one packet.
    pub fn write(&self, mut packet: EncodedPacket, from_secondary: bool) -> MuxResult<()> {
        let mut state = self.state.lock();
        if state.phase != Phase::HeaderWritten {
            return Err(MuxError::InvalidState("header not written".into()));
        }
        let input_index = packet.stream_index;
        let mapping = state.map(from_secondary).get_mut(&input_index).ok_or_else(|| {
            MuxError::TrackError(format!("input stream {input_index} not mapped"))
        })?;
        mapping.apply(&mut packet);

        state.output_mut()?.write_packet(packet)?;
        state.packets_written += 1;
        Ok(())
    }

    /// Finalize the output. No-op unless the header was written and the
    /// trailer was not.
    pub fn write_trailer(&self) -> MuxResult<()> {
        self.state.lock().finish()
    }

    /// Finalize a started output, release it and forget all mappings. Safe to
    /// call repeatedly.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if let Err(e) = state.finish() {
            warn!(error = %e, "Failed to finalize output on dispose");
        }
        let had_output = state.output.is_some();
        *state = RemuxState::idle();
        if had_output {
            debug!("Remuxer disposed");
        }
    }

    pub fn format(&self) -> Option<ContainerFormat> {
        self.state.lock().format
    }

    pub fn mapping(&self, input_index: usize, from_secondary: bool) -> Option<RemuxStreamMapping> {
        self.state.lock().map(from_secondary).get(&input_index).cloned()
    }

    pub fn packets_written(&self) -> u64 {
        self.state.lock().packets_written
    }
}

impl Drop for Remuxer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use vela_common::{CodecId, CodecParameters, MediaKind, Ticks};
    use vela_synthetic::SyntheticBackend;

    fn stream(index: usize, kind: MediaKind, time_base: Rational) -> StreamDescriptor {
        StreamDescriptor {
            index,
            kind,
            codec: match kind {
                MediaKind::Video => CodecId::H264,
                MediaKind::Audio => CodecId::Aac,
                MediaKind::Subtitle => CodecId::SubRip,
            },
            time_base,
            start_time: Ticks::ZERO,
            duration: Ticks::from_millis(10_000),
            bitrate: 0,
            language: None,
            metadata: Default::default(),
            params: CodecParameters::default(),
        }
    }

    fn packet(stream_index: usize, pts: Option<i64>, dts: Option<i64>, duration: i64) -> EncodedPacket {
        EncodedPacket {
            stream_index,
            data: vec![0xAB; 4],
            pts,
            dts,
            duration,
            is_keyframe: true,
        }
    }

    #[test]
    fn rebases_first_dts_to_zero_and_rescales() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Remuxer::new(backend.clone());
        let dest = Path::new("/out/rebase.mkv");
        assert_eq!(remuxer.open(dest, None).unwrap(), ContainerFormat::Mkv);
        remuxer
            .add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        remuxer.write_header().unwrap();

        // Matroska settles on millisecond timestamps.
        let mapping = remuxer.mapping(0, false).unwrap();
        assert_eq!(mapping.output_time_base, Rational::MILLIS);

        remuxer
            .write(packet(0, Some(900_000 + 3_600), Some(900_000), 3_600), false)
            .unwrap();
        remuxer
            .write(packet(0, Some(907_200), Some(903_600), 3_600), false)
            .unwrap();
        remuxer.write_trailer().unwrap();

        let out = backend.output(dest).unwrap();
        assert!(out.trailer_written);
        assert_eq!(out.packets[0].dts, Some(0));
        assert_eq!(out.packets[0].pts, Some(40));
        assert_eq!(out.packets[0].duration, 40);
        assert_eq!(out.packets[1].dts, Some(40));
        assert_eq!(out.packets[1].pts, Some(80));
    }

    #[test]
    fn missing_dts_passes_through_unrebased() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Remuxer::new(backend.clone());
        let dest = Path::new("/out/nodts.mp4");
        remuxer.open(dest, None).unwrap();
        remuxer
            .add_stream(&stream(0, MediaKind::Subtitle, Rational::MILLIS), false)
            .unwrap();
        remuxer.write_header().unwrap();
        remuxer.write(packet(0, Some(5_000), None, 1_000), false).unwrap();
        assert_eq!(remuxer.mapping(0, false).unwrap().first_dts, None);

        let out = backend.output(dest).unwrap();
        assert_eq!(out.packets[0].pts, Some(5_000));
        assert_eq!(out.packets[0].dts, None);
    }

    #[test]
    fn secondary_source_has_its_own_mapping() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Remuxer::new(backend.clone());
        let dest = Path::new("/out/dub.mp4");
        remuxer.open(dest, None).unwrap();
        let video_out = remuxer
            .add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        // Same input index, different container.
        let dub_out = remuxer
            .add_stream(&stream(0, MediaKind::Audio, Rational::new(1, 48_000)), true)
            .unwrap();
        assert_ne!(video_out, dub_out);
        remuxer.write_header().unwrap();

        remuxer.write(packet(0, Some(48_000), Some(48_000), 1_024), true).unwrap();
        remuxer.write(packet(0, Some(9_000), Some(9_000), 3_600), false).unwrap();

        let out = backend.output(dest).unwrap();
        assert_eq!(out.packets[0].stream_index, dub_out);
        assert_eq!(out.packets[0].dts, Some(0));
        assert_eq!(out.packets[1].stream_index, video_out);
        assert_eq!(out.packets[1].dts, Some(0));
    }

    #[test]
    fn global_header_follows_format() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Remuxer::new(backend.clone());
        remuxer.open(Path::new("/out/a.mp4"), None).unwrap();
        remuxer
            .add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        let out = backend.output(Path::new("/out/a.mp4")).unwrap();
        assert!(out.streams[0].descriptor.params.global_header);

        let ts = Remuxer::new(backend.clone());
        ts.open(Path::new("/out/a.bin"), Some("mpegts")).unwrap();
        ts.add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        let out = backend.output(Path::new("/out/a.bin")).unwrap();
        assert!(!out.streams[0].descriptor.params.global_header);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let remuxer = Remuxer::new(Arc::new(SyntheticBackend::new()));
        assert!(matches!(
            remuxer.open(Path::new("/out/clip.xyz"), None),
            Err(MuxError::UnknownFormat(_))
        ));
        assert!(matches!(
            remuxer.open(Path::new("/out/clip.mp4"), Some("bogus")),
            Err(MuxError::UnknownFormat(_))
        ));
    }

    #[test]
    fn ordering_is_enforced() {
        let remuxer = Remuxer::new(Arc::new(SyntheticBackend::new()));
        remuxer.open(Path::new("/out/order.mkv"), None).unwrap();
        assert!(matches!(remuxer.write_header(), Err(MuxError::Header(_))));
        remuxer
            .add_stream(&stream(0, MediaKind::Audio, Rational::new(1, 48_000)), false)
            .unwrap();
        assert!(remuxer
            .write(packet(0, Some(0), Some(0), 1_024), false)
            .is_err());
        remuxer.write_header().unwrap();
        assert!(remuxer.write_header().is_err());
        assert!(remuxer
            .add_stream(&stream(1, MediaKind::Audio, Rational::new(1, 48_000)), false)
            .is_err());
        assert!(matches!(
            remuxer.write(packet(7, Some(0), Some(0), 1), false),
            Err(MuxError::TrackError(_))
        ));
    }

    #[test]
    fn dispose_finalizes_once() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Remuxer::new(backend.clone());
        let dest = Path::new("/out/dispose.mkv");
        remuxer.open(dest, None).unwrap();
        remuxer
            .add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        remuxer.write_header().unwrap();
        remuxer.dispose();
        remuxer.dispose();
        assert!(remuxer.format().is_none());
        let out = backend.output(dest).unwrap();
        assert!(out.trailer_written);
        assert_eq!(out.trailer_count, 1);
    }

    #[test]
    fn concurrent_sources_share_one_output() {
        let backend = Arc::new(SyntheticBackend::new());
        let remuxer = Arc::new(Remuxer::new(backend.clone()));
        let dest = Path::new("/out/concurrent.mp4");
        remuxer.open(dest, None).unwrap();
        remuxer
            .add_stream(&stream(0, MediaKind::Video, Rational::MPEG), false)
            .unwrap();
        remuxer
            .add_stream(&stream(0, MediaKind::Audio, Rational::new(1, 48_000)), true)
            .unwrap();
        remuxer.write_header().unwrap();

        let handles: Vec<_> = [false, true]
            .into_iter()
            .map(|secondary| {
                let remuxer = Arc::clone(&remuxer);
                thread::spawn(move || {
                    for i in 0..100 {
                        remuxer
                            .write(packet(0, Some(i * 10), Some(i * 10), 10), secondary)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(remuxer.packets_written(), 200);
        assert_eq!(backend.output(dest).unwrap().packets.len(), 200);
    }
}
