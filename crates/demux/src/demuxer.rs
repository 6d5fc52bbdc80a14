//! Demuxer: one opened input container plus its background read loop.
//!
//! The read loop pulls packets from the container in container order and
//! routes them into bounded packet queues. Packets of streams that are not
//! enabled are dropped on the spot. When a queue an enabled stream feeds is
//! full the loop parks on that queue's condvar until a consumer makes room
//! or a pause/stop request wakes it.
//!
//! Control calls (`start`, `pause`, `stop`, `seek`) are synchronous: a pause
//! raises the request on the shared [`Interrupter`], wakes the loop and
//! joins the read thread, so when it returns nothing touches the container
//! any more and it can be repositioned safely.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use vela_common::{
    AtomicStatus, DemuxError, DemuxerConfig, EncodedPacket, InputContainer, InterruptRequest,
    Interrupter, MediaBackend, MediaKind, MediaSource, PacketQueue, ReadError, Status,
    StreamDescriptor, Ticks,
};

/// How long the read loop parks on a full queue before re-checking requests.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(20);

/// How packets are split into queues.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueLayout {
    /// One queue per media kind (playback).
    PerKind,
    /// One queue in container order (remuxing).
    Single,
}

/// Container facts captured once on open.
#[derive(Clone, Debug, Default)]
struct ContainerInfo {
    source: Option<MediaSource>,
    format_name: String,
    streams: Vec<StreamDescriptor>,
    duration: Ticks,
    start_time: Ticks,
    live: bool,
}

/// State shared between the control side and the read thread.
struct Shared {
    role: MediaKind,
    layout: QueueLayout,
    /// Container lock. Held by the read loop for the duration of each read.
    container: Mutex<Option<Box<dyn InputContainer>>>,
    info: RwLock<ContainerInfo>,
    enabled: RwLock<BTreeSet<usize>>,
    /// Indexed by [`MediaKind::index`]. With [`QueueLayout::Single`] all
    /// three handles share the same queue.
    queues: [PacketQueue; 3],
    status: AtomicStatus,
    interrupter: Interrupter,
    last_error: Mutex<Option<ReadError>>,
}

impl Shared {
    fn queue_for(&self, kind: MediaKind) -> &PacketQueue {
        &self.queues[kind.index()]
    }

    fn distinct_queues(&self) -> &[PacketQueue] {
        match self.layout {
            QueueLayout::Single => &self.queues[..1],
            QueueLayout::PerKind => &self.queues[..],
        }
    }

    fn wake_queues(&self) {
        for queue in self.distinct_queues() {
            queue.wake();
        }
    }

    fn clear_queues(&self) -> usize {
        self.distinct_queues().iter().map(PacketQueue::clear).sum()
    }

    /// First queue that an enabled stream feeds and that is at its bound.
    fn full_queue(&self) -> Option<&PacketQueue> {
        let info = self.info.read();
        let enabled = self.enabled.read();
        let full = enabled
            .iter()
            .filter_map(|&index| info.streams.get(index))
            .map(|stream| self.queue_for(stream.kind))
            .find(|queue| queue.is_full());
        full
    }

    fn route(&self, packet: EncodedPacket) {
        if !self.enabled.read().contains(&packet.stream_index) {
            trace!(stream = packet.stream_index, "Dropping packet of disabled stream");
            return;
        }
        let kind = self
            .info
            .read()
            .streams
            .get(packet.stream_index)
            .map(|s| s.kind);
        match kind {
            Some(kind) => self.queue_for(kind).push(packet),
            None => warn!(stream = packet.stream_index, "Packet for unknown stream"),
        }
    }
}

/// Reads one input container on a background thread.
pub struct Demuxer {
    shared: Arc<Shared>,
    backend: Arc<dyn MediaBackend>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Demuxer {
    /// Create an idle demuxer. `role` names the pipeline it belongs to (used
    /// for thread names and logs).
    pub fn new(
        role: MediaKind,
        backend: Arc<dyn MediaBackend>,
        config: &DemuxerConfig,
        layout: QueueLayout,
    ) -> Self {
        let cap = config.max_queue_packets;
        let queues = match layout {
            QueueLayout::PerKind => [
                PacketQueue::bounded(cap),
                PacketQueue::bounded(cap),
                PacketQueue::bounded(cap),
            ],
            QueueLayout::Single => {
                let queue = PacketQueue::bounded(cap);
                [queue.clone(), queue.clone(), queue]
            }
        };

        Self {
            shared: Arc::new(Shared {
                role,
                layout,
                container: Mutex::new(None),
                info: RwLock::new(ContainerInfo::default()),
                enabled: RwLock::new(BTreeSet::new()),
                queues,
                status: AtomicStatus::default(),
                interrupter: Interrupter::new(),
                last_error: Mutex::new(None),
            }),
            backend,
            worker: Mutex::new(None),
        }
    }

    /// Open `source`, replacing any container opened before. No stream is
    /// enabled afterwards.
    pub fn open(&self, source: &MediaSource) -> Result<(), DemuxError> {
        self.dispose();
        let shared = &self.shared;
        shared.interrupter.clear();
        shared.status.set(Status::Opening);

        let container = match self
            .backend
            .open_input(source, shared.interrupter.clone())
        {
            Ok(container) => container,
            Err(e) => {
                shared.status.set(Status::Stopped);
                warn!(role = %shared.role, %source, error = %e, "Failed to open container");
                return Err(e);
            }
        };

        let streams = container.streams().to_vec();
        if streams.is_empty() {
            shared.status.set(Status::Stopped);
            return Err(DemuxError::NoStreams);
        }

        let info = ContainerInfo {
            source: Some(source.clone()),
            format_name: container.format_name().to_string(),
            streams,
            duration: container.duration(),
            start_time: container.start_time(),
            live: container.is_live(),
        };
        info!(
            role = %shared.role,
            %source,
            format = %info.format_name,
            streams = info.streams.len(),
            duration = %info.duration,
            start = %info.start_time,
            live = info.live,
            "Demuxer opened"
        );

        *shared.container.lock() = Some(container);
        *shared.info.write() = info;
        shared.enabled.write().clear();
        *shared.last_error.lock() = None;
        shared.status.set(Status::Stopped);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.info.read().source.is_some()
    }

    /// Every stream of the open container.
    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.shared.info.read().streams.clone()
    }

    pub fn stream(&self, index: usize) -> Option<StreamDescriptor> {
        self.shared.info.read().streams.get(index).cloned()
    }

    /// Add a stream to the active set.
    pub fn enable_stream(&self, index: usize) -> Result<(), DemuxError> {
        let stream = self.stream(index).ok_or(DemuxError::InvalidStream(index))?;
        if self.shared.enabled.write().insert(index) {
            debug!(role = %self.shared.role, stream = %stream, "Stream enabled");
        }
        Ok(())
    }

    /// Remove a stream from the active set and drop its queued packets.
    pub fn disable_stream(&self, index: usize) -> Result<(), DemuxError> {
        let stream = self.stream(index).ok_or(DemuxError::InvalidStream(index))?;
        if self.shared.enabled.write().remove(&index) {
            let dropped = self
                .shared
                .queue_for(stream.kind)
                .retain(|p| p.stream_index != index);
            debug!(role = %self.shared.role, stream = %stream, dropped, "Stream disabled");
        }
        Ok(())
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.shared.enabled.read().contains(&index)
    }

    /// Enabled streams in index order.
    pub fn enabled_streams(&self) -> Vec<StreamDescriptor> {
        let info = self.shared.info.read();
        let enabled = self.shared.enabled.read();
        let streams = enabled
            .iter()
            .filter_map(|&i| info.streams.get(i).cloned())
            .collect();
        streams
    }

    /// First enabled stream of `kind`.
    pub fn enabled_stream_of(&self, kind: MediaKind) -> Option<StreamDescriptor> {
        self.enabled_streams().into_iter().find(|s| s.kind == kind)
    }

    /// Spawn the read loop. No-op while it is already running or after the
    /// container ended.
    pub fn start(&self) -> Result<(), DemuxError> {
        if !self.is_open() {
            return Err(DemuxError::NotOpened);
        }
        let shared = &self.shared;
        let mut worker = self.worker.lock();
        if worker.is_some() && shared.status.get().is_active() {
            return Ok(());
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }
        if shared.status.get() == Status::Ended {
            debug!(role = %shared.role, "Container already ended, not starting");
            return Ok(());
        }

        shared.interrupter.clear();
        shared.status.set(Status::Running);
        let thread_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(format!("demux-{}", shared.role.label()))
            .spawn(move || read_loop(&thread_shared))
            .map_err(|e| {
                shared.status.set(Status::Stopped);
                DemuxError::Thread(e.to_string())
            })?;
        *worker = Some(handle);
        debug!(role = %shared.role, "Read loop spawned");
        Ok(())
    }

    /// Ask the read loop to pause and wait for it to exit.
    pub fn pause(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let shared = &self.shared;
        shared.status.transition(Status::Running, Status::Pausing);
        shared.interrupter.request(InterruptRequest::Pause);
        shared.wake_queues();
        if handle.join().is_err() {
            error!(role = %shared.role, "Read thread panicked");
            shared.status.set(Status::Stopping);
        }
        if shared.interrupter.current() == InterruptRequest::Pause {
            shared.interrupter.clear();
        }
    }

    /// Stop the read loop, wait for it and drop every queued packet.
    pub fn stop(&self) {
        let shared = &self.shared;
        if let Some(handle) = self.worker.lock().take() {
            shared.interrupter.request(InterruptRequest::Stop);
            shared.wake_queues();
            if handle.join().is_err() {
                error!(role = %shared.role, "Read thread panicked");
            }
        }
        shared.clear_queues();
        if shared.status.get() != Status::Stopped {
            shared.status.set(Status::Stopped);
        }
    }

    /// Reposition the container at `target` and drop every queued packet.
    /// Leaves the demuxer Paused, including one that had ended.
    pub fn seek(&self, target: Ticks, forward: bool) -> Result<(), DemuxError> {
        if !self.is_open() {
            return Err(DemuxError::NotOpened);
        }
        self.pause();

        let shared = &self.shared;
        {
            let mut container = shared.container.lock();
            container
                .as_mut()
                .ok_or(DemuxError::NotOpened)?
                .seek(target, forward)?;
        }
        let dropped = shared.clear_queues();
        *shared.last_error.lock() = None;
        shared.status.set(Status::Paused);
        debug!(role = %shared.role, target = %target, forward, dropped, "Demuxer seeked");
        Ok(())
    }

    /// Stop, release the container and forget its streams. Safe to call
    /// repeatedly.
    pub fn dispose(&self) {
        self.stop();
        let shared = &self.shared;
        let released = shared.container.lock().take().is_some();
        *shared.info.write() = ContainerInfo::default();
        shared.enabled.write().clear();
        shared.clear_queues();
        shared.status.set(Status::Stopped);
        if released {
            info!(role = %shared.role, "Demuxer disposed");
        }
    }

    /// Raise a stop request so a read blocked inside the backend returns.
    pub fn interrupt(&self) {
        self.shared.interrupter.request(InterruptRequest::Stop);
        self.shared.wake_queues();
    }

    pub fn clear_interrupt(&self) {
        self.shared.interrupter.clear();
    }

    /// Queue holding packets of `kind`. With [`QueueLayout::Single`] every
    /// kind maps to the same queue.
    pub fn packets(&self, kind: MediaKind) -> PacketQueue {
        self.shared.queue_for(kind).clone()
    }

    /// Total packets currently buffered.
    pub fn queued_packets(&self) -> usize {
        self.shared.distinct_queues().iter().map(PacketQueue::len).sum()
    }

    /// Drop every queued packet without touching the read loop.
    pub fn clear_queues(&self) -> usize {
        self.shared.clear_queues()
    }

    pub fn status(&self) -> Status {
        self.shared.status.get()
    }

    /// I/O error that stopped the read loop, if any.
    pub fn last_error(&self) -> Option<ReadError> {
        self.shared.last_error.lock().clone()
    }

    pub fn has_failed(&self) -> bool {
        self.shared.last_error.lock().is_some()
    }

    /// No more packets will arrive until the next seek or open.
    pub fn is_exhausted(&self) -> bool {
        self.status() == Status::Ended || self.has_failed()
    }

    pub fn role(&self) -> MediaKind {
        self.shared.role
    }

    pub fn layout(&self) -> QueueLayout {
        self.shared.layout
    }

    pub fn source(&self) -> Option<MediaSource> {
        self.shared.info.read().source.clone()
    }

    pub fn format_name(&self) -> String {
        self.shared.info.read().format_name.clone()
    }

    pub fn duration(&self) -> Ticks {
        self.shared.info.read().duration
    }

    pub fn start_time(&self) -> Ticks {
        self.shared.info.read().start_time
    }

    pub fn is_live(&self) -> bool {
        self.shared.info.read().live
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_loop(shared: &Shared) {
    debug!(role = %shared.role, "Read loop started");
    let mut packets = 0u64;

    let outcome = loop {
        match shared.interrupter.current() {
            InterruptRequest::Pause => break Status::Paused,
            InterruptRequest::Stop => break Status::Stopped,
            InterruptRequest::None => {}
        }

        if let Some(full) = shared.full_queue() {
            full.wait_for_space(BACKPRESSURE_WAIT);
            continue;
        }

        let result = match shared.container.lock().as_mut() {
            Some(container) => container.read_packet(),
            None => break Status::Stopped,
        };

        match result {
            Ok(packet) => {
                packets += 1;
                shared.route(packet);
            }
            Err(ReadError::EndOfStream) => {
                info!(role = %shared.role, packets, "End of container reached");
                break Status::Ended;
            }
            Err(ReadError::Interrupted) => {
                break match shared.interrupter.current() {
                    InterruptRequest::Pause => Status::Paused,
                    InterruptRequest::Stop => Status::Stopped,
                    InterruptRequest::None => Status::Ended,
                };
            }
            Err(ReadError::Corrupt(reason)) => {
                warn!(role = %shared.role, %reason, "Corrupt container data, ending");
                break Status::Ended;
            }
            Err(err @ ReadError::Io(_)) => {
                error!(role = %shared.role, error = %err, "Read failed");
                *shared.last_error.lock() = Some(err);
                break Status::Stopping;
            }
        }
    };

    shared.status.set(outcome);
    shared.wake_queues();
    debug!(role = %shared.role, status = %outcome, packets, "Read loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use vela_synthetic::{SourceSpec, SyntheticBackend, DEMO_MOVIE};

    fn backend_with(name: &str, spec: SourceSpec) -> Arc<SyntheticBackend> {
        let backend = Arc::new(SyntheticBackend::new());
        backend.register(name, spec);
        backend
    }

    fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn demuxer(backend: Arc<SyntheticBackend>, layout: QueueLayout) -> Demuxer {
        Demuxer::new(
            MediaKind::Video,
            backend,
            &DemuxerConfig::default(),
            layout,
        )
    }

    #[test]
    fn open_reports_container_facts() {
        let demux = demuxer(Arc::new(SyntheticBackend::new()), QueueLayout::PerKind);
        demux.open(&MediaSource::parse(DEMO_MOVIE)).unwrap();
        assert!(demux.is_open());
        assert_eq!(demux.status(), Status::Stopped);
        assert_eq!(demux.duration(), Ticks::from_millis(60_000));
        assert!(!demux.is_live());
        assert!(demux.streams().len() >= 3);
        assert!(demux.enabled_streams().is_empty());
    }

    #[test]
    fn open_missing_source_fails() {
        let demux = demuxer(Arc::new(SyntheticBackend::new()), QueueLayout::PerKind);
        let err = demux
            .open(&MediaSource::parse("synth://nope"))
            .unwrap_err();
        assert!(matches!(err, DemuxError::NotFound(_)));
        assert!(!demux.is_open());
        assert_eq!(demux.status(), Status::Stopped);
    }

    #[test]
    fn start_requires_open_container() {
        let demux = demuxer(Arc::new(SyntheticBackend::new()), QueueLayout::PerKind);
        assert!(matches!(demux.start(), Err(DemuxError::NotOpened)));
    }

    #[test]
    fn reads_enabled_streams_to_end() {
        let backend = backend_with("synth://short", SourceSpec::movie(1_000));
        let demux = demuxer(backend, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://short")).unwrap();
        let video = demux.streams().into_iter().find(|s| s.kind == MediaKind::Video).unwrap();
        demux.enable_stream(video.index).unwrap();
        demux.start().unwrap();

        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));
        // 1 s at 25 fps
        assert_eq!(demux.packets(MediaKind::Video).len(), 25);
        assert!(demux.packets(MediaKind::Audio).is_empty());
        assert!(demux.packets(MediaKind::Subtitle).is_empty());
    }

    #[test]
    fn enable_unknown_stream_is_rejected() {
        let demux = demuxer(Arc::new(SyntheticBackend::new()), QueueLayout::PerKind);
        demux.open(&MediaSource::parse(DEMO_MOVIE)).unwrap();
        assert!(matches!(
            demux.enable_stream(99),
            Err(DemuxError::InvalidStream(99))
        ));
    }

    #[test]
    fn backpressure_bounds_queue() {
        let backend = backend_with("synth://long", SourceSpec::movie(60_000));
        let config = DemuxerConfig {
            max_queue_packets: 8,
        };
        let demux = Demuxer::new(MediaKind::Video, backend, &config, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://long")).unwrap();
        demux.enable_stream(0).unwrap();
        demux.start().unwrap();

        let queue = demux.packets(MediaKind::Video);
        assert!(wait_for(Duration::from_secs(5), || queue.is_full()));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 8);
        assert_eq!(demux.status(), Status::Running);

        demux.pause();
        assert_eq!(demux.status(), Status::Paused);
    }

    #[test]
    fn seek_clears_queues_and_pauses() {
        let backend = backend_with("synth://short", SourceSpec::movie(2_000));
        let demux = demuxer(backend, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://short")).unwrap();
        for stream in demux.streams() {
            demux.enable_stream(stream.index).unwrap();
        }
        demux.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));
        assert!(demux.queued_packets() > 0);

        demux.seek(Ticks::from_millis(500), false).unwrap();
        assert_eq!(demux.status(), Status::Paused);
        assert_eq!(demux.queued_packets(), 0);

        demux.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));
        let first = demux.packets(MediaKind::Video).pop().unwrap();
        assert!(first.is_keyframe);
    }

    #[test]
    fn disable_drops_queued_packets_of_stream() {
        let backend = backend_with("synth://short", SourceSpec::movie(1_000));
        let demux = demuxer(backend, QueueLayout::Single);
        demux.open(&MediaSource::parse("synth://short")).unwrap();
        for stream in demux.streams() {
            demux.enable_stream(stream.index).unwrap();
        }
        demux.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));

        let before = demux.queued_packets();
        demux.disable_stream(0).unwrap();
        let queue = demux.packets(MediaKind::Audio);
        assert_eq!(queue.len(), before - 25);
        assert!(queue.drain().iter().all(|p| p.stream_index != 0));
    }

    #[test]
    fn single_layout_keeps_container_order() {
        let backend = backend_with("synth://short", SourceSpec::movie(1_000));
        let demux = demuxer(backend, QueueLayout::Single);
        demux.open(&MediaSource::parse("synth://short")).unwrap();
        let streams = demux.streams();
        for stream in &streams {
            demux.enable_stream(stream.index).unwrap();
        }
        demux.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));

        let queue = demux.packets(MediaKind::Video);
        assert!(queue.same_queue(&demux.packets(MediaKind::Subtitle)));
        let ticks: Vec<Ticks> = queue
            .drain()
            .iter()
            .map(|p| {
                let tb = streams[p.stream_index].time_base;
                Ticks::from_timestamp(p.timestamp().unwrap(), tb)
            })
            .collect();
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn stop_unblocks_read_stuck_in_backend() {
        let backend = backend_with(
            "synth://stall",
            SourceSpec::live(10_000).blocking_after(5),
        );
        let demux = demuxer(backend, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://stall")).unwrap();
        for stream in demux.streams() {
            demux.enable_stream(stream.index).unwrap();
        }
        demux.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || demux.queued_packets() >= 5));

        let started = Instant::now();
        demux.interrupt();
        demux.dispose();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(demux.status(), Status::Stopped);
        assert!(!demux.is_open());
    }

    #[test]
    fn io_failure_keeps_error() {
        let backend = backend_with("synth://flaky", SourceSpec::movie(5_000).failing_after(10));
        let demux = demuxer(backend, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://flaky")).unwrap();
        demux.enable_stream(0).unwrap();
        demux.start().unwrap();

        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Stopping));
        assert!(matches!(demux.last_error(), Some(ReadError::Io(_))));
        assert!(demux.is_exhausted());
    }

    #[test]
    fn corrupt_data_ends_gracefully() {
        let backend = backend_with("synth://bad", SourceSpec::movie(5_000).corrupt_after(3));
        let demux = demuxer(backend, QueueLayout::PerKind);
        demux.open(&MediaSource::parse("synth://bad")).unwrap();
        demux.enable_stream(0).unwrap();
        demux.start().unwrap();

        assert!(wait_for(Duration::from_secs(5), || demux.status() == Status::Ended));
        assert!(demux.last_error().is_none());
    }

    #[test]
    fn dispose_is_idempotent() {
        let demux = demuxer(Arc::new(SyntheticBackend::new()), QueueLayout::PerKind);
        demux.open(&MediaSource::parse(DEMO_MOVIE)).unwrap();
        demux.dispose();
        demux.dispose();
        assert!(!demux.is_open());
        assert!(demux.streams().is_empty());
    }
}
