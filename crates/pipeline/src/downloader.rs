//! Downloader: copies the enabled streams of one container into an output
//! file without decoding.
//!
//! ```text
//! Downloader::download()
//!   |
//!   +-- Remuxer: open output, add enabled streams, write header
//!   +-- Demuxer: start read loop (single queue, container order)
//!   +-- Spawn copy thread
//!         |
//!         +-- pop packet -> track progress -> remuxer.write()
//!         +-- queue empty:
//!               demuxer ended    -> write trailer, Completed { success: true }
//!               demuxer failed   -> Completed { success: false }
//!               pause requested  -> park, resumable
//! ```
//!
//! Progress and completion are reported through a crossbeam channel.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use vela_common::{
    AtomicStatus, DemuxerConfig, EncodedPacket, InterruptRequest, Interrupter, MediaBackend,
    MediaKind, MediaSource, PacketQueue, PipelineError, PipelineResult, Rational, Status,
    StreamDescriptor, Ticks,
};
use vela_demux::{probe, Demuxer, QueueLayout};
use vela_mux::Remuxer;

/// How long the copy loop parks on an empty queue before re-checking.
const QUEUE_WAIT: Duration = Duration::from_millis(20);

/// Update from a running download.
#[derive(Clone, Debug, PartialEq)]
pub enum DownloadEvent {
    /// Percentage of the container copied so far (0..=100).
    Progress(f64),
    /// The download finished. Sent exactly once per download.
    Completed { success: bool },
}

impl DownloadEvent {
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

struct Shared {
    demuxer: Demuxer,
    remuxer: Remuxer,
    status: AtomicStatus,
    interrupter: Interrupter,
    /// `f64` bits.
    percentage: AtomicU64,
    completed: AtomicBool,
    events: Sender<DownloadEvent>,
    /// Timebase of every input stream, by index.
    time_bases: RwLock<Vec<Rational>>,
}

impl Shared {
    fn packets(&self) -> PacketQueue {
        self.demuxer.packets(MediaKind::Video)
    }

    /// Total duration, zero when unknown or live.
    fn duration(&self) -> Ticks {
        if self.demuxer.is_live() {
            Ticks::ZERO
        } else {
            self.demuxer.duration()
        }
    }

    fn percentage(&self) -> f64 {
        f64::from_bits(self.percentage.load(Ordering::Acquire))
    }

    fn set_percentage(&self, value: f64) {
        self.percentage.store(value.to_bits(), Ordering::Release);
    }

    /// Advance the percentage from the timestamp of `packet`. Never moves
    /// backwards; stays 0 without a known duration.
    fn track_progress(&self, packet: &EncodedPacket, start: Ticks, duration: Ticks) {
        if duration <= Ticks::ZERO {
            return;
        }
        let Some(ts) = packet.dts.or(packet.pts) else {
            return;
        };
        let Some(time_base) = self.time_bases.read().get(packet.stream_index).copied() else {
            return;
        };

        let elapsed = Ticks::from_timestamp(ts, time_base) - start;
        let percentage = (elapsed.0 as f64 / (duration.0 as f64 / 100.0)).clamp(0.0, 100.0);
        let previous = self.percentage();
        if percentage > previous {
            self.set_percentage(percentage);
            if percentage.floor() > previous.floor() {
                let _ = self.events.send(DownloadEvent::Progress(percentage));
            }
        }
    }

    fn complete(&self, success: bool) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        if success {
            self.set_percentage(100.0);
            let _ = self.events.send(DownloadEvent::Progress(100.0));
        }
        let _ = self.events.send(DownloadEvent::Completed { success });
        info!(success, percentage = self.percentage(), "Download completed");
    }
}

/// Headless copy of one container's enabled streams into a file.
pub struct Downloader {
    shared: Arc<Shared>,
    events: Receiver<DownloadEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
    destination: Mutex<Option<PathBuf>>,
}

impl Downloader {
    pub fn new(backend: Arc<dyn MediaBackend>, config: &DemuxerConfig) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                demuxer: Demuxer::new(MediaKind::Video, backend.clone(), config, QueueLayout::Single),
                remuxer: Remuxer::new(backend),
                status: AtomicStatus::default(),
                interrupter: Interrupter::new(),
                percentage: AtomicU64::new(0f64.to_bits()),
                completed: AtomicBool::new(false),
                events: tx,
                time_bases: RwLock::new(Vec::new()),
            }),
            events: rx,
            worker: Mutex::new(None),
            destination: Mutex::new(None),
        }
    }

    /// Open `source` for enumeration. No stream is enabled afterwards.
    pub fn open(&self, source: &MediaSource) -> PipelineResult<Vec<StreamDescriptor>> {
        self.dispose();
        let shared = &self.shared;
        shared.demuxer.open(source)?;
        shared.set_percentage(0.0);
        shared.completed.store(false, Ordering::Release);
        *shared.time_bases.write() = shared.demuxer.streams().iter().map(|s| s.time_base).collect();

        let streams = shared.demuxer.streams();
        info!(
            %source,
            streams = streams.len(),
            duration = %shared.duration(),
            live = shared.demuxer.is_live(),
            "Download source opened"
        );
        Ok(streams)
    }

    pub fn enable_stream(&self, index: usize) -> PipelineResult<()> {
        Ok(self.shared.demuxer.enable_stream(index)?)
    }

    pub fn disable_stream(&self, index: usize) -> PipelineResult<()> {
        Ok(self.shared.demuxer.disable_stream(index)?)
    }

    /// Start copying the enabled streams into `destination`, appending the
    /// recommended extension for the input format when asked. Returns the
    /// final destination path.
    ///
    /// Failing to set up the output also reports `Completed { success:
    /// false }`.
    pub fn download(&self, destination: &Path, use_recommended_extension: bool) -> PipelineResult<PathBuf> {
        let shared = &self.shared;
        if !shared.demuxer.is_open() {
            return Err(PipelineError::NotOpened(MediaKind::Video));
        }
        if self.worker.lock().is_some() || shared.remuxer.format().is_some() {
            return Err(PipelineError::Other("download already started".into()));
        }
        shared.completed.store(false, Ordering::Release);
        shared.set_percentage(0.0);

        let mut dest = destination.to_path_buf();
        if use_recommended_extension {
            if let Some(ext) = probe::recommended_extension(&shared.demuxer.format_name()) {
                let mut name = OsString::from(dest);
                name.push(".");
                name.push(ext);
                dest = PathBuf::from(name);
            }
        }

        let streams = shared.demuxer.enabled_streams();
        if streams.is_empty() {
            warn!(destination = %dest.display(), "Download requested with no enabled stream");
            shared.complete(false);
            return Err(PipelineError::NoStreamsEnabled);
        }

        if let Err(e) = self.prepare_output(&dest, &streams) {
            error!(destination = %dest.display(), error = %e, "Failed to prepare download output");
            shared.remuxer.dispose();
            shared.complete(false);
            return Err(e);
        }

        if let Err(e) = self.start_copy() {
            error!(destination = %dest.display(), error = %e, "Failed to start download");
            self.abandon_output();
            return Err(e);
        }
        *self.destination.lock() = Some(dest.clone());
        info!(
            destination = %dest.display(),
            streams = streams.len(),
            "Download started"
        );
        Ok(dest)
    }

    fn prepare_output(&self, dest: &Path, streams: &[StreamDescriptor]) -> PipelineResult<()> {
        let remuxer = &self.shared.remuxer;
        remuxer.open(dest, None)?;
        for stream in streams {
            remuxer.add_stream(stream, false)?;
        }
        remuxer.write_header()?;
        Ok(())
    }

    fn start_copy(&self) -> PipelineResult<()> {
        self.shared.demuxer.start()?;
        self.spawn_copy()
    }

    /// Tear down an output whose copy loop never ran: rewind the source,
    /// finalize what was written and report the failure.
    fn abandon_output(&self) {
        let shared = &self.shared;
        if let Err(e) = shared.demuxer.seek(shared.demuxer.start_time(), false) {
            warn!(error = %e, "Failed to rewind source after aborted download");
        }
        shared.remuxer.dispose();
        shared.status.set(Status::Stopped);
        shared.complete(false);
    }

    fn spawn_copy(&self) -> PipelineResult<()> {
        let shared = &self.shared;
        shared.interrupter.clear();
        shared.status.set(Status::Running);
        let thread_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("download-copy".to_string())
            .spawn(move || copy_loop(&thread_shared))
            .map_err(|e| {
                shared.status.set(Status::Stopped);
                PipelineError::Other(format!("failed to spawn copy thread: {e}"))
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Suspend copying without finalizing the output.
    pub fn pause(&self) {
        let shared = &self.shared;
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        shared.status.transition(Status::Running, Status::Pausing);
        shared.interrupter.request(InterruptRequest::Pause);
        shared.packets().wake();
        if handle.join().is_err() {
            error!("Copy thread panicked");
            shared.status.set(Status::Stopping);
        }
        shared.demuxer.pause();
        if shared.interrupter.current() == InterruptRequest::Pause {
            shared.interrupter.clear();
        }
        debug!(percentage = shared.percentage(), "Download paused");
    }

    /// Continue a paused download.
    pub fn resume(&self) -> PipelineResult<()> {
        let shared = &self.shared;
        if shared.status.get() != Status::Paused || self.worker.lock().is_some() {
            return Ok(());
        }
        shared.demuxer.start()?;
        self.spawn_copy()?;
        debug!(percentage = shared.percentage(), "Download resumed");
        Ok(())
    }

    /// Stop copying, finalize a started output and release everything. Safe
    /// to call repeatedly.
    pub fn dispose(&self) {
        let shared = &self.shared;
        // The copy loop goes first so it never mistakes the stopped demuxer
        // for a failed source.
        if let Some(handle) = self.worker.lock().take() {
            shared.interrupter.request(InterruptRequest::Stop);
            shared.packets().wake();
            if handle.join().is_err() {
                error!("Copy thread panicked");
            }
        }
        shared.demuxer.interrupt();
        shared.demuxer.dispose();
        shared.demuxer.clear_interrupt();
        shared.remuxer.dispose();
        shared.interrupter.clear();
        shared.time_bases.write().clear();
        shared.status.set(Status::Stopped);
        *self.destination.lock() = None;
    }

    pub fn status(&self) -> Status {
        self.shared.status.get()
    }

    pub fn percentage(&self) -> f64 {
        self.shared.percentage()
    }

    /// Total duration of the source; zero when live.
    pub fn duration(&self) -> Ticks {
        self.shared.duration()
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.shared.demuxer.streams()
    }

    pub fn destination(&self) -> Option<PathBuf> {
        self.destination.lock().clone()
    }

    /// Next event, if one is pending.
    pub fn try_recv_event(&self) -> Option<DownloadEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<DownloadEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Every pending event.
    pub fn drain_events(&self) -> Vec<DownloadEvent> {
        self.events.try_iter().collect()
    }

    /// A receiver for consumers on other threads.
    pub fn events(&self) -> Receiver<DownloadEvent> {
        self.events.clone()
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn copy_loop(shared: &Shared) {
    let packets = shared.packets();
    let start = shared.demuxer.start_time();
    let duration = shared.duration();
    debug!(duration = %duration, "Copy loop started");
    let mut written = 0u64;

    // Final status, plus the completion to report once it is published.
    let (outcome, completion) = loop {
        match shared.interrupter.current() {
            InterruptRequest::Pause => break (Status::Paused, None),
            InterruptRequest::Stop => break (Status::Stopped, None),
            InterruptRequest::None => {}
        }

        if let Some(packet) = packets.pop() {
            shared.track_progress(&packet, start, duration);
            match shared.remuxer.write(packet, false) {
                Ok(()) => written += 1,
                Err(e) => warn!(error = %e, "Dropping packet that could not be written"),
            }
            continue;
        }

        match shared.demuxer.status() {
            Status::Ended if packets.is_empty() => match shared.remuxer.write_trailer() {
                Ok(()) => break (Status::Ended, Some(true)),
                Err(e) => {
                    error!(error = %e, "Failed to finalize download");
                    break (Status::Stopping, Some(false));
                }
            },
            Status::Stopping | Status::Stopped => {
                let reason = shared
                    .demuxer
                    .last_error()
                    .map_or_else(|| "source stopped".to_string(), |e| e.to_string());
                error!(%reason, written, "Download source failed");
                break (Status::Stopping, Some(false));
            }
            _ => {
                packets.wait_for_item(QUEUE_WAIT);
            }
        }
    };

    shared.status.set(outcome);
    if let Some(success) = completion {
        shared.complete(success);
    }
    debug!(status = %outcome, written, "Copy loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vela_common::MediaSource;
    use vela_synthetic::{SourceSpec, SyntheticBackend};

    #[test]
    fn aborted_start_reports_failure_and_allows_retry() {
        let backend = Arc::new(SyntheticBackend::new());
        backend.register("synth://short", SourceSpec::movie(2_000));
        let downloader = Downloader::new(backend.clone(), &DemuxerConfig::default());
        downloader.open(&MediaSource::parse("synth://short")).unwrap();
        downloader.enable_stream(0).unwrap();

        // Header written and reading started, but no copy loop.
        let first = PathBuf::from("/downloads/first.mkv");
        let streams = downloader.shared.demuxer.enabled_streams();
        downloader.prepare_output(&first, &streams).unwrap();
        downloader.shared.demuxer.start().unwrap();
        downloader.abandon_output();

        assert_eq!(
            downloader.drain_events(),
            vec![DownloadEvent::Completed { success: false }]
        );
        assert_eq!(downloader.status(), Status::Stopped);
        assert!(downloader.shared.remuxer.format().is_none());
        let out = backend.output(&first).unwrap();
        assert_eq!(out.trailer_count, 1);

        let second = downloader
            .download(Path::new("/downloads/second.mkv"), false)
            .unwrap();
        let mut success = None;
        while success.is_none() {
            match downloader.recv_event_timeout(Duration::from_secs(10)) {
                Some(DownloadEvent::Completed { success: ok }) => success = Some(ok),
                Some(DownloadEvent::Progress(_)) => {}
                None => break,
            }
        }
        assert_eq!(success, Some(true));
        // The rewind keeps the retry complete.
        assert_eq!(backend.output(&second).unwrap().packets.len(), 50);
    }
}
