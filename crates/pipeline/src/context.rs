//! DecoderContext: coordinates the video, audio and subtitle pipelines.
//!
//! Each pipeline is a [`Decoder`] bound to a [`Demuxer`]. The main demuxer
//! reads the container passed to [`DecoderContext::open`] and may feed all
//! three decoders. Audio and subtitles can instead come from independent
//! containers ([`DecoderContext::open_audio`], [`DecoderContext::open_subtitles`])
//! with their own clocks, start times and durations.
//!
//! ```text
//!            main demuxer ──┬── video decoder ── video frames
//!                           ├── audio decoder ── audio frames
//!                           └── subs decoder ─── subtitle frames
//!   audio demuxer (opt.) ───┘        │
//!   subs demuxer (opt.) ─────────────┘
//! ```
//!
//! Control calls are serialized by one control mutex. Operations touching
//! more than one decoder take the codec locks through [`CodecLocks`].

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use vela_common::{
    AtomicStatus, DemuxError, FrameQueue, MediaBackend, MediaKind, MediaSource, PipelineConfig,
    PipelineError, PipelineResult, ReadError, Status, StreamDescriptor, Ticks,
};
use vela_decoder::Decoder;
use vela_demux::{Demuxer, QueueLayout};

use crate::locks::CodecLocks;
use crate::seek::{seek_target, SeekTarget};

/// What [`DecoderContext::open`] found and bound.
#[derive(Clone, Debug)]
pub struct OpenReport {
    pub format_name: String,
    pub duration: Ticks,
    pub start_time: Ticks,
    pub live: bool,
    /// Every stream of the container.
    pub streams: Vec<StreamDescriptor>,
    pub video: Option<StreamDescriptor>,
    pub audio: Option<StreamDescriptor>,
    pub subtitles: Option<StreamDescriptor>,
    /// Default streams whose decoder could not be opened, with the reason.
    pub failed: Vec<(StreamDescriptor, String)>,
}

impl OpenReport {
    fn bound_mut(&mut self, kind: MediaKind) -> &mut Option<StreamDescriptor> {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
            MediaKind::Subtitle => &mut self.subtitles,
        }
    }

    pub fn bound(&self, kind: MediaKind) -> Option<&StreamDescriptor> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Subtitle => self.subtitles.as_ref(),
        }
    }
}

/// Targets a [`DecoderContext::seek`] repositioned each open demuxer to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SeekReport {
    pub main: Option<SeekTarget>,
    pub audio: Option<SeekTarget>,
    pub subtitles: Option<SeekTarget>,
}

/// Pick the video stream with the most pixels (first one on ties).
fn select_video(streams: &[StreamDescriptor]) -> Option<StreamDescriptor> {
    streams
        .iter()
        .filter(|s| s.kind == MediaKind::Video)
        .min_by_key(|s| Reverse(s.pixel_count()))
        .cloned()
}

/// Pick the first stream of `kind` in `language`, falling back to the first
/// stream of `kind` when `fallback` is set.
fn select_by_language(
    streams: &[StreamDescriptor],
    kind: MediaKind,
    language: Option<&str>,
    fallback: bool,
) -> Option<StreamDescriptor> {
    let mut of_kind = streams.iter().filter(|s| s.kind == kind);
    let matched = language.and_then(|lang| of_kind.clone().find(|s| s.has_language(lang)));
    match matched {
        Some(stream) => Some(stream.clone()),
        None if fallback => of_kind.next().cloned(),
        None => None,
    }
}

pub struct DecoderContext {
    config: PipelineConfig,
    main: Arc<Demuxer>,
    audio_source: Arc<Demuxer>,
    subtitle_source: Arc<Demuxer>,
    video: Decoder,
    audio: Decoder,
    subtitles: Decoder,
    status: AtomicStatus,
    control: Mutex<()>,
}

impl DecoderContext {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PipelineConfig) -> Self {
        let demuxer = |role| {
            Arc::new(Demuxer::new(
                role,
                backend.clone(),
                &config.demuxer,
                QueueLayout::PerKind,
            ))
        };
        let decoder = |kind| Decoder::new(kind, backend.clone(), &config.decoder);

        Self {
            main: demuxer(MediaKind::Video),
            audio_source: demuxer(MediaKind::Audio),
            subtitle_source: demuxer(MediaKind::Subtitle),
            video: decoder(MediaKind::Video),
            audio: decoder(MediaKind::Audio),
            subtitles: decoder(MediaKind::Subtitle),
            status: AtomicStatus::default(),
            control: Mutex::new(()),
            config,
        }
    }

    // ---------------------------------------------------------------------
    // Opening
    // ---------------------------------------------------------------------

    /// Open `source` as the main container and bind its default streams.
    ///
    /// Anything opened before, independent containers included, is stopped
    /// and released first.
    pub fn open(&self, source: &MediaSource) -> PipelineResult<OpenReport> {
        let _control = self.control.lock();
        self.stop_all();
        self.status.set(Status::Opening);

        if let Err(e) = self.main.open(source) {
            self.status.set(Status::Stopped);
            return Err(e.into());
        }

        let streams = self.main.streams();
        let mut report = OpenReport {
            format_name: self.main.format_name(),
            duration: self.main.duration(),
            start_time: self.main.start_time(),
            live: self.main.is_live(),
            streams: streams.clone(),
            video: None,
            audio: None,
            subtitles: None,
            failed: Vec::new(),
        };

        let audio_cfg = &self.config.audio;
        let subs_cfg = &self.config.subtitles;
        let defaults = [
            select_video(&streams),
            audio_cfg
                .enabled
                .then(|| {
                    select_by_language(
                        &streams,
                        MediaKind::Audio,
                        audio_cfg.preferred_language.as_deref(),
                        true,
                    )
                })
                .flatten(),
            subs_cfg
                .enabled
                .then(|| {
                    select_by_language(
                        &streams,
                        MediaKind::Subtitle,
                        subs_cfg.preferred_language.as_deref(),
                        subs_cfg.preferred_language.is_none(),
                    )
                })
                .flatten(),
        ];

        for stream in defaults.into_iter().flatten() {
            match self.bind(&stream, &self.main) {
                Ok(()) => {
                    let kind = stream.kind;
                    *report.bound_mut(kind) = Some(stream);
                }
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Default stream not bound");
                    report.failed.push((stream, e.to_string()));
                }
            }
        }

        if MediaKind::ALL.iter().all(|&k| report.bound(k).is_none()) {
            self.main.dispose();
            self.status.set(Status::Stopped);
            return Err(PipelineError::NoStreamsEnabled);
        }

        self.status.set(Status::Stopped);
        info!(
            %source,
            format = %report.format_name,
            duration = %report.duration,
            live = report.live,
            video = report.video.is_some(),
            audio = report.audio.is_some(),
            subtitles = report.subtitles.is_some(),
            "Context opened"
        );
        Ok(report)
    }

    /// Play audio from an independent container. With `at_ms` the new
    /// container is pre-seeked to that position, plus the time spent opening
    /// it while playing. Returns the bound stream.
    pub fn open_audio(&self, source: &MediaSource, at_ms: Option<i64>) -> PipelineResult<StreamDescriptor> {
        let _control = self.control.lock();
        self.open_independent(MediaKind::Audio, source, at_ms)
    }

    /// Show subtitles from an independent container. See
    /// [`open_audio`](Self::open_audio).
    pub fn open_subtitles(
        &self,
        source: &MediaSource,
        at_ms: Option<i64>,
    ) -> PipelineResult<StreamDescriptor> {
        let _control = self.control.lock();
        self.open_independent(MediaKind::Subtitle, source, at_ms)
    }

    /// Switch the active stream of `stream.kind` to another stream of the
    /// main container. An independent container of that kind is dropped.
    /// Playback state is preserved; the switched pipeline is flushed.
    pub fn open_stream(&self, stream: &StreamDescriptor) -> PipelineResult<()> {
        let _control = self.control.lock();
        let target = self
            .main
            .stream(stream.index)
            .ok_or(DemuxError::InvalidStream(stream.index))?;
        if target.kind != stream.kind {
            return Err(PipelineError::StreamKindMismatch {
                index: stream.index,
                expected: stream.kind,
            });
        }

        let running = self.is_running();
        self.unbind(target.kind);
        self.bind(&target, &self.main)?;

        let decoder = self.decoder(target.kind);
        decoder.flush();
        if running {
            self.main.start()?;
            decoder.start()?;
        }
        info!(stream = %target, running, "Active stream switched");
        Ok(())
    }

    fn open_independent(
        &self,
        kind: MediaKind,
        source: &MediaSource,
        at_ms: Option<i64>,
    ) -> PipelineResult<StreamDescriptor> {
        let begun = Instant::now();
        let demuxer = self.independent(kind).ok_or(PipelineError::NotOpened(kind))?;
        let running = self.is_running();

        self.unbind(kind);
        demuxer.open(source)?;

        let language = match kind {
            MediaKind::Audio => self.config.audio.preferred_language.as_deref(),
            _ => self.config.subtitles.preferred_language.as_deref(),
        };
        let bound = select_by_language(&demuxer.streams(), kind, language, true)
            .ok_or_else(|| PipelineError::from(DemuxError::NoStreams))
            .and_then(|stream| self.bind(&stream, demuxer).map(|()| stream));
        let stream = match bound {
            Ok(stream) => stream,
            Err(e) => {
                demuxer.dispose();
                return Err(e);
            }
        };

        if let Some(ms) = at_ms {
            let elapsed = if running {
                i64::try_from(begun.elapsed().as_millis()).unwrap_or(i64::MAX)
            } else {
                0
            };
            let target = self.seek_independent(kind, ms.saturating_add(elapsed), false)?;
            debug!(%kind, target = %target, elapsed_ms = elapsed, "Independent container aligned");
        }

        if running {
            demuxer.start()?;
            self.decoder(kind).start()?;
        }
        info!(%kind, %source, stream = %stream, "Independent container opened");
        Ok(stream)
    }

    /// Enable `stream` on `demuxer` and open the matching decoder on it.
    fn bind(&self, stream: &StreamDescriptor, demuxer: &Arc<Demuxer>) -> PipelineResult<()> {
        demuxer.enable_stream(stream.index)?;
        if let Err(e) = self.decoder(stream.kind).open(stream, demuxer) {
            let _ = demuxer.disable_stream(stream.index);
            return Err(e.into());
        }
        Ok(())
    }

    /// Release the pipeline of `kind`: dispose its decoder and either
    /// disable its stream on the main demuxer or drop its independent
    /// container.
    fn unbind(&self, kind: MediaKind) {
        let decoder = self.decoder(kind);
        let previous = decoder.stream();
        let on_main = self.is_on_main(decoder);
        decoder.dispose();

        if let (Some(stream), true) = (previous, on_main) {
            let _ = self.main.disable_stream(stream.index);
        }
        if let Some(independent) = self.independent(kind) {
            independent.dispose();
        }
    }

    // ---------------------------------------------------------------------
    // Seeking
    // ---------------------------------------------------------------------

    /// Reposition every open container to `ms` and flush every bound
    /// decoder, resuming afterwards if playing.
    pub fn seek(&self, ms: i64, forward: bool) -> PipelineResult<SeekReport> {
        let _control = self.control.lock();
        if !self.main.is_open() && !self.audio_source.is_open() && !self.subtitle_source.is_open() {
            return Err(PipelineError::NotOpened(MediaKind::Video));
        }
        let running = self.is_running();
        let main_offset = self.main_offset();

        let mut report = SeekReport::default();
        let mut first_error = None;
        {
            let mut locks = CodecLocks::acquire(&self.video, &self.audio, &self.subtitles);
            let demuxers = [
                (&mut report.main, &self.main, main_offset),
                (&mut report.audio, &self.audio_source, self.offset_for(MediaKind::Audio)),
                (
                    &mut report.subtitles,
                    &self.subtitle_source,
                    self.offset_for(MediaKind::Subtitle),
                ),
            ];
            for (slot, demuxer, offset) in demuxers {
                if !demuxer.is_open() {
                    continue;
                }
                let target = seek_target(
                    ms,
                    forward,
                    demuxer.start_time(),
                    demuxer.duration(),
                    offset,
                );
                match demuxer.seek(target.ticks, target.forward) {
                    Ok(()) => *slot = Some(target),
                    Err(e) => {
                        warn!(role = %demuxer.role(), target = %target, error = %e, "Seek failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            for kind in MediaKind::ALL {
                let decoder = self.decoder(kind);
                if decoder.stream().is_some() {
                    decoder.flush_locked(locks.guard(kind));
                }
            }
        }

        if running {
            self.resume_all();
        } else {
            // Seeking clears container errors, so a failed context is
            // playable again too.
            if !self.status.transition(Status::Ended, Status::Paused) {
                self.status.transition(Status::Stopping, Status::Paused);
            }
        }

        debug!(ms, forward, ?report, "Context seeked");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Reposition only the independent audio container.
    pub fn seek_audio(&self, ms: i64, forward: bool) -> PipelineResult<SeekTarget> {
        let _control = self.control.lock();
        self.seek_independent(MediaKind::Audio, ms, forward)
    }

    /// Reposition only the independent subtitle container.
    pub fn seek_subtitles(&self, ms: i64, forward: bool) -> PipelineResult<SeekTarget> {
        let _control = self.control.lock();
        self.seek_independent(MediaKind::Subtitle, ms, forward)
    }

    fn seek_independent(&self, kind: MediaKind, ms: i64, forward: bool) -> PipelineResult<SeekTarget> {
        let demuxer = self
            .independent(kind)
            .filter(|d| d.is_open())
            .ok_or(PipelineError::NotOpened(kind))?;
        let decoder = self.decoder(kind);
        let target = seek_target(
            ms,
            forward,
            demuxer.start_time(),
            demuxer.duration(),
            self.offset_for(kind),
        );

        let result = {
            let mut guard = decoder.lock_codec();
            let result = demuxer.seek(target.ticks, target.forward);
            if decoder.stream().is_some() {
                decoder.flush_locked(&mut guard);
            }
            result
        };

        if self.is_running() {
            if let Err(e) = demuxer.start() {
                warn!(%kind, error = %e, "Failed to resume demuxer after seek");
            }
            if let Err(e) = decoder.start() {
                warn!(%kind, error = %e, "Failed to resume decoder after seek");
            }
        }
        result?;
        debug!(%kind, target = %target, "Independent container seeked");
        Ok(target)
    }

    /// Compensation subtracted from seek targets of a pipeline.
    fn offset_for(&self, kind: MediaKind) -> Ticks {
        match kind {
            MediaKind::Video => Ticks::ZERO,
            MediaKind::Audio => self.config.audio.seek_offset(),
            MediaKind::Subtitle => self.config.subtitles.delay,
        }
    }

    /// The main container is positioned for video when it drives video,
    /// otherwise for whichever pipeline it drives.
    fn main_offset(&self) -> Ticks {
        MediaKind::ALL
            .into_iter()
            .find(|&kind| {
                let decoder = self.decoder(kind);
                decoder.stream().is_some() && self.is_on_main(decoder)
            })
            .map_or(Ticks::ZERO, |kind| self.offset_for(kind))
    }

    // ---------------------------------------------------------------------
    // Playback control
    // ---------------------------------------------------------------------

    /// Start every open demuxer, then every bound decoder.
    pub fn play(&self) {
        let _control = self.control.lock();
        if self.bound_decoders().is_empty() {
            warn!("Play requested with nothing bound");
            return;
        }
        self.resume_all();
        info!("Playback started");
    }

    /// Pause every demuxer and decoder.
    pub fn pause(&self) {
        let _control = self.control.lock();
        self.pause_all();
        self.status.transition(Status::Running, Status::Paused);
        info!("Playback paused");
    }

    /// Abort blocked reads, dispose decoders, then demuxers.
    pub fn stop(&self) {
        let _control = self.control.lock();
        self.stop_all();
        info!("Playback stopped");
    }

    /// Drop every queued packet and frame and reset all codecs. Running or
    /// paused state is preserved.
    pub fn flush(&self) {
        let _control = self.control.lock();
        let running = self.is_running();
        self.pause_all();

        let dropped: usize = self.open_demuxers().iter().map(|d| d.clear_queues()).sum();
        {
            let mut locks = CodecLocks::acquire(&self.video, &self.audio, &self.subtitles);
            for kind in MediaKind::ALL {
                let decoder = self.decoder(kind);
                if decoder.stream().is_some() {
                    decoder.flush_locked(locks.guard(kind));
                }
            }
        }

        if running {
            self.resume_all();
        }
        debug!(dropped, running, "Context flushed");
    }

    fn resume_all(&self) {
        for demuxer in self.open_demuxers() {
            if let Err(e) = demuxer.start() {
                warn!(role = %demuxer.role(), error = %e, "Failed to start demuxer");
            }
        }
        for decoder in self.bound_decoders() {
            if let Err(e) = decoder.start() {
                warn!(kind = %decoder.kind(), error = %e, "Failed to start decoder");
            }
        }
        self.status.set(Status::Running);
    }

    fn pause_all(&self) {
        for demuxer in self.open_demuxers() {
            demuxer.pause();
        }
        for decoder in [&self.video, &self.audio, &self.subtitles] {
            decoder.pause();
        }
    }

    fn stop_all(&self) {
        let demuxers = [&self.main, &self.audio_source, &self.subtitle_source];
        if self.status.get() != Status::Stopped || demuxers.iter().any(|d| d.is_open()) {
            self.status.set(Status::Stopping);
        }
        for demuxer in demuxers {
            demuxer.interrupt();
        }
        for decoder in [&self.video, &self.audio, &self.subtitles] {
            decoder.dispose();
        }
        for demuxer in demuxers {
            demuxer.dispose();
            demuxer.clear_interrupt();
        }
        self.status.set(Status::Stopped);
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Overall status. Once every bound decoder has ended this is `Ended`,
    /// or `Stopping` when a container feeding them failed (see
    /// [`last_error`](Self::last_error)).
    pub fn status(&self) -> Status {
        let status = self.status.get();
        if status == Status::Running {
            let bound = self.bound_decoders();
            if !bound.is_empty() && bound.iter().all(|d| d.status() == Status::Ended) {
                let outcome = if self.last_error().is_some() {
                    Status::Stopping
                } else {
                    Status::Ended
                };
                if self.status.transition(Status::Running, outcome) {
                    return outcome;
                }
                return self.status.get();
            }
        }
        status
    }

    /// Read failure of a container feeding a bound pipeline. Cleared by the
    /// next seek or open.
    pub fn last_error(&self) -> Option<ReadError> {
        self.bound_decoders()
            .iter()
            .filter_map(|d| d.demuxer())
            .find_map(|d| d.last_error())
    }

    pub fn is_running(&self) -> bool {
        self.status.get() == Status::Running
    }

    /// Decoded frames of one pipeline.
    pub fn frames(&self, kind: MediaKind) -> FrameQueue {
        self.decoder(kind).frames()
    }

    pub fn video_frames(&self) -> FrameQueue {
        self.video.frames()
    }

    pub fn audio_frames(&self) -> FrameQueue {
        self.audio.frames()
    }

    pub fn subtitle_frames(&self) -> FrameQueue {
        self.subtitles.frames()
    }

    /// Stream currently decoded by the pipeline of `kind`.
    pub fn stream(&self, kind: MediaKind) -> Option<StreamDescriptor> {
        self.decoder(kind).stream()
    }

    /// Streams of the main container.
    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.main.streams()
    }

    pub fn decoder(&self, kind: MediaKind) -> &Decoder {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
            MediaKind::Subtitle => &self.subtitles,
        }
    }

    pub fn main_demuxer(&self) -> &Arc<Demuxer> {
        &self.main
    }

    /// Demuxer currently feeding the pipeline of `kind`.
    pub fn demuxer(&self, kind: MediaKind) -> Option<Arc<Demuxer>> {
        self.decoder(kind).demuxer()
    }

    pub fn duration(&self) -> Ticks {
        self.main.duration()
    }

    pub fn start_time(&self) -> Ticks {
        self.main.start_time()
    }

    pub fn is_live(&self) -> bool {
        self.main.is_live()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn independent(&self, kind: MediaKind) -> Option<&Arc<Demuxer>> {
        match kind {
            MediaKind::Video => None,
            MediaKind::Audio => Some(&self.audio_source),
            MediaKind::Subtitle => Some(&self.subtitle_source),
        }
    }

    fn is_on_main(&self, decoder: &Decoder) -> bool {
        decoder
            .demuxer()
            .is_some_and(|d| Arc::ptr_eq(&d, &self.main))
    }

    fn open_demuxers(&self) -> Vec<&Arc<Demuxer>> {
        [&self.main, &self.audio_source, &self.subtitle_source]
            .into_iter()
            .filter(|d| d.is_open())
            .collect()
    }

    fn bound_decoders(&self) -> Vec<&Decoder> {
        [&self.video, &self.audio, &self.subtitles]
            .into_iter()
            .filter(|d| d.stream().is_some())
            .collect()
    }
}

impl Drop for DecoderContext {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_common::{CodecId, CodecParameters};

    fn stream(index: usize, kind: MediaKind, lang: Option<&str>, width: u32) -> StreamDescriptor {
        StreamDescriptor {
            index,
            kind,
            codec: CodecId::H264,
            time_base: vela_common::Rational::MPEG,
            start_time: Ticks::ZERO,
            duration: Ticks::ZERO,
            bitrate: 0,
            language: lang.map(str::to_string),
            metadata: Default::default(),
            params: CodecParameters {
                width,
                height: width,
                ..Default::default()
            },
        }
    }

    #[test]
    fn largest_video_wins_first_on_ties() {
        let streams = [
            stream(0, MediaKind::Video, None, 640),
            stream(1, MediaKind::Video, None, 1920),
            stream(2, MediaKind::Video, None, 1920),
        ];
        assert_eq!(select_video(&streams).unwrap().index, 1);
    }

    #[test]
    fn language_selection() {
        let streams = [
            stream(0, MediaKind::Audio, Some("eng"), 0),
            stream(1, MediaKind::Audio, Some("fre"), 0),
            stream(2, MediaKind::Subtitle, Some("eng"), 0),
        ];
        let pick = |kind, lang, fallback| {
            select_by_language(&streams, kind, lang, fallback).map(|s| s.index)
        };
        assert_eq!(pick(MediaKind::Audio, Some("FRE"), true), Some(1));
        assert_eq!(pick(MediaKind::Audio, Some("ger"), true), Some(0));
        assert_eq!(pick(MediaKind::Audio, None, true), Some(0));
        assert_eq!(pick(MediaKind::Subtitle, Some("ger"), false), None);
        assert_eq!(pick(MediaKind::Subtitle, Some("eng"), false), Some(2));
    }
}
