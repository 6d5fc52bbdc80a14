//! The synthetic [`MediaBackend`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use vela_common::{
    CodecContext, CodecId, CodecOptions, ContainerFormat, DecodeError, DemuxError, InputContainer,
    Interrupter, MediaBackend, MediaSource, MuxError, OutputContainer, StreamDescriptor,
};

use crate::codec::PassthroughCodec;
use crate::input::SyntheticInput;
use crate::output::{MemoryOutput, OutputRecord, OutputStore};
use crate::source::{SourceSpec, StreamSpec};

/// One minute movie: 1080p video, English and French audio, English subtitles.
pub const DEMO_MOVIE: &str = "synth://movie";
/// Ten seconds of live video and audio.
pub const DEMO_LIVE: &str = "synth://live";
/// One minute Spanish audio track in Matroska.
pub const DEMO_DUB: &str = "synth://dub";
/// One minute of German subtitles.
pub const DEMO_SUBTITLES: &str = "synth://subtitles";

pub struct SyntheticBackend {
    sources: RwLock<HashMap<String, SourceSpec>>,
    outputs: OutputStore,
    reject_outputs: AtomicBool,
    fail_headers: AtomicBool,
}

impl SyntheticBackend {
    /// Backend with the demo sources registered.
    pub fn new() -> Self {
        let backend = Self {
            sources: RwLock::new(HashMap::new()),
            outputs: OutputStore::default(),
            reject_outputs: AtomicBool::new(false),
            fail_headers: AtomicBool::new(false),
        };
        backend.register(DEMO_MOVIE, SourceSpec::movie(60_000));
        backend.register(DEMO_LIVE, SourceSpec::live(10_000));
        backend.register(
            DEMO_DUB,
            SourceSpec::empty(60_000)
                .with_format_name("matroska,webm")
                .with_stream(StreamSpec::audio(0, "spa").with_codec(CodecId::Opus)),
        );
        backend.register(
            DEMO_SUBTITLES,
            SourceSpec::empty(60_000)
                .with_format_name("srt")
                .with_stream(StreamSpec::subtitle(0, "ger")),
        );
        backend
    }

    /// Make `name` (a URL or path, as displayed) openable.
    pub fn register(&self, name: impl Into<String>, spec: SourceSpec) {
        self.sources.write().insert(name.into(), spec);
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of what was written to `path`.
    pub fn output(&self, path: &Path) -> Option<OutputRecord> {
        self.outputs.lock().get(path).cloned()
    }

    /// Make every subsequent `create_output` fail.
    pub fn set_reject_outputs(&self, reject: bool) {
        self.reject_outputs.store(reject, Ordering::Relaxed);
    }

    /// Make every subsequently created output fail to write its header.
    pub fn set_fail_headers(&self, fail: bool) {
        self.fail_headers.store(fail, Ordering::Relaxed);
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open_input(
        &self,
        source: &MediaSource,
        interrupter: Interrupter,
    ) -> Result<Box<dyn InputContainer>, DemuxError> {
        let key = source.to_string();
        let spec = self
            .sources
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| DemuxError::NotFound(key.clone()))?;
        if spec.format_name.is_empty() {
            return Err(DemuxError::UnsupportedContainer(key));
        }

        if let Some(delay) = spec.open_delay {
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if interrupter.is_interrupted() {
                    return Err(DemuxError::Io(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "open interrupted",
                    )));
                }
                thread::sleep(Duration::from_millis(2));
            }
        }

        debug!(source = %key, streams = spec.streams.len(), "Opening synthetic input");
        Ok(Box::new(SyntheticInput::new(spec, interrupter)))
    }

    fn create_codec(
        &self,
        stream: &StreamDescriptor,
        _options: &CodecOptions,
    ) -> Result<Box<dyn CodecContext>, DecodeError> {
        Ok(Box::new(PassthroughCodec::new(stream)?))
    }

    fn create_output(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<Box<dyn OutputContainer>, MuxError> {
        if self.reject_outputs.load(Ordering::Relaxed) || path.file_name().is_none() {
            return Err(MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot create {}", path.display()),
            )));
        }
        Ok(Box::new(MemoryOutput::create(
            path.to_path_buf(),
            format,
            self.outputs.clone(),
            self.fail_headers.load(Ordering::Relaxed),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_sources_are_registered() {
        let backend = SyntheticBackend::new();
        let names = backend.source_names();
        for demo in [DEMO_MOVIE, DEMO_LIVE, DEMO_DUB, DEMO_SUBTITLES] {
            assert!(names.iter().any(|n| n == demo), "{demo} missing");
        }
    }

    #[test]
    fn unknown_source_is_not_found() {
        let backend = SyntheticBackend::new();
        let err = backend
            .open_input(&MediaSource::parse("/media/missing.mp4"), Interrupter::new())
            .err()
            .unwrap();
        assert!(matches!(err, DemuxError::NotFound(_)));
    }

    #[test]
    fn paths_can_be_registered() {
        let backend = SyntheticBackend::new();
        backend.register("/media/clip.mkv", SourceSpec::movie(1_000));
        let input = backend
            .open_input(&MediaSource::parse("/media/clip.mkv"), Interrupter::new())
            .unwrap();
        assert_eq!(input.streams().len(), 4);
    }

    #[test]
    fn rejected_outputs_fail() {
        let backend = SyntheticBackend::new();
        backend.set_reject_outputs(true);
        assert!(backend
            .create_output(Path::new("/out/x.mp4"), ContainerFormat::Mp4)
            .is_err());
    }
}
