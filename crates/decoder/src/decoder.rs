//! Decoder: codec context plus background decode loop for one stream.
//!
//! Every kind (video, audio, subtitles) uses the same type; behavior that
//! differs per kind is keyed off [`MediaKind`]:
//!
//! - video arms a [`KeyframeGate`] on open and on every flush,
//! - subtitle events take their duration from the packet when the codec
//!   reports none.
//!
//! The codec lives behind the codec lock ([`Decoder::lock_codec`]). The
//! decode loop pops each packet and decodes it while holding that lock, so a
//! flush performed under the same lock can never interleave with a decode.
//! The loop releases the lock before it waits on any queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, trace, warn};

use vela_common::{
    AtomicStatus, CodecContext, CodecFrame, CodecOptions, DecodeError, DecodedFrame, DecoderSettings,
    FrameQueue, InterruptRequest, Interrupter, MediaBackend, MediaKind, PacketQueue, Status,
    StreamDescriptor,
};
use vela_demux::Demuxer;

use crate::frames::{FrameNormalizer, KeyframeGate};

/// How long the decode loop parks on an empty or full queue before
/// re-checking requests.
const QUEUE_WAIT: Duration = Duration::from_millis(20);

/// Everything the codec lock protects.
pub struct CodecSlot {
    codec: Option<Box<dyn CodecContext>>,
    gate: KeyframeGate,
    normalizer: Option<FrameNormalizer>,
}

impl CodecSlot {
    fn empty() -> Self {
        Self {
            codec: None,
            gate: KeyframeGate::new(false),
            normalizer: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.codec.is_some()
    }

    /// Whether video frames are currently being dropped until an I-frame.
    pub fn awaiting_keyframe(&self) -> bool {
        self.gate.is_armed()
    }
}

/// Held codec lock of one decoder.
pub type CodecGuard<'a> = MutexGuard<'a, CodecSlot>;

/// Stream and demuxer a decoder reads from.
#[derive(Clone)]
struct Binding {
    stream: StreamDescriptor,
    demuxer: Arc<Demuxer>,
    packets: PacketQueue,
}

struct Shared {
    kind: MediaKind,
    codec: Mutex<CodecSlot>,
    binding: RwLock<Option<Binding>>,
    frames: FrameQueue,
    status: AtomicStatus,
    interrupter: Interrupter,
    frames_dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn wake(&self) {
        self.frames.wake();
        if let Some(binding) = self.binding.read().as_ref() {
            binding.packets.wake();
        }
    }

    /// Clear queues, reset the codec and re-arm the gate. Caller holds the
    /// codec lock.
    fn flush_slot(&self, slot: &mut CodecSlot) -> usize {
        let mut dropped = 0;
        if let Some(binding) = self.binding.read().as_ref() {
            dropped += binding.packets.clear();
        }
        dropped += self.frames.clear();
        if let Some(codec) = slot.codec.as_mut() {
            codec.reset();
        }
        if let Some(normalizer) = slot.normalizer.as_mut() {
            normalizer.reset();
        }
        if self.kind == MediaKind::Video {
            slot.gate.arm();
        }
        dropped
    }

    /// Normalize, gate and queue the frames one decode call produced.
    fn deliver(&self, slot: &mut CodecSlot, frames: Vec<CodecFrame>, fallback: i64) {
        for frame in frames {
            if !slot.gate.admit(&frame.payload) {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %self.kind, pts = ?frame.pts, "Dropping frame before keyframe");
                continue;
            }
            let Some(normalizer) = slot.normalizer.as_mut() else {
                continue;
            };
            let decoded: DecodedFrame = normalizer.normalize(frame, fallback);
            self.frames.push(decoded);
        }
    }
}

/// Decodes the packets of one stream on a background thread.
pub struct Decoder {
    shared: Arc<Shared>,
    backend: Arc<dyn MediaBackend>,
    options: CodecOptions,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Decoder {
    pub fn new(kind: MediaKind, backend: Arc<dyn MediaBackend>, settings: &DecoderSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                codec: Mutex::new(CodecSlot::empty()),
                binding: RwLock::new(None),
                frames: FrameQueue::bounded(settings.max_frames(kind)),
                status: AtomicStatus::default(),
                interrupter: Interrupter::new(),
                frames_dropped: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            backend,
            options: CodecOptions {
                threads: settings.threads,
            },
            worker: Mutex::new(None),
        }
    }

    /// Create a codec for `stream` and bind to the queue `demuxer` fills for
    /// this decoder's kind. Replaces any previous binding.
    pub fn open(&self, stream: &StreamDescriptor, demuxer: &Arc<Demuxer>) -> Result<(), DecodeError> {
        let shared = &self.shared;
        if stream.kind != shared.kind {
            return Err(DecodeError::Init {
                codec: stream.codec.clone(),
                reason: format!("{} decoder cannot decode a {} stream", shared.kind, stream.kind),
            });
        }
        self.dispose();
        shared.status.set(Status::Opening);

        let codec = match self.backend.create_codec(stream, &self.options) {
            Ok(codec) => codec,
            Err(e) => {
                shared.status.set(Status::Stopped);
                warn!(kind = %shared.kind, stream = %stream, error = %e, "Failed to open codec");
                return Err(e);
            }
        };

        {
            let mut slot = shared.codec.lock();
            slot.codec = Some(codec);
            slot.gate = KeyframeGate::new(shared.kind == MediaKind::Video);
            slot.normalizer = Some(FrameNormalizer::new(stream.time_base, demuxer.start_time()));
        }
        *shared.binding.write() = Some(Binding {
            stream: stream.clone(),
            demuxer: Arc::clone(demuxer),
            packets: demuxer.packets(shared.kind),
        });
        shared.frames_dropped.store(0, Ordering::Relaxed);
        *shared.last_error.lock() = None;
        shared.status.set(Status::Stopped);

        info!(
            kind = %shared.kind,
            stream = %stream,
            threads = self.options.threads,
            on_video_demuxer = demuxer.role() == MediaKind::Video,
            "Decoder opened"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.codec.lock().is_open()
    }

    /// Spawn the decode loop. No-op while it is already running or after it
    /// ended.
    pub fn start(&self) -> Result<(), DecodeError> {
        let shared = &self.shared;
        if shared.binding.read().is_none() || !self.is_open() {
            return Err(DecodeError::NotOpened);
        }
        let mut worker = self.worker.lock();
        if worker.is_some() && shared.status.get().is_active() {
            return Ok(());
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }
        if shared.status.get() == Status::Ended {
            return Ok(());
        }

        shared.interrupter.clear();
        shared.status.set(Status::Running);
        let thread_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(format!("decode-{}", shared.kind.label()))
            .spawn(move || decode_loop(&thread_shared))
            .map_err(|e| {
                shared.status.set(Status::Stopped);
                DecodeError::Thread(e.to_string())
            })?;
        *worker = Some(handle);
        debug!(kind = %shared.kind, "Decode loop spawned");
        Ok(())
    }

    /// Ask the decode loop to pause and wait for it to exit.
    pub fn pause(&self) {
        let shared = &self.shared;
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        shared.status.transition(Status::Running, Status::Pausing);
        shared.interrupter.request(InterruptRequest::Pause);
        shared.wake();
        join_worker(shared.kind, handle);
        if shared.interrupter.current() == InterruptRequest::Pause {
            shared.interrupter.clear();
        }
    }

    /// Acquire the codec lock. While held, the decode loop cannot pop or
    /// decode a packet.
    pub fn lock_codec(&self) -> CodecGuard<'_> {
        self.shared.codec.lock()
    }

    /// Drop queued packets and frames, reset the codec and re-arm the
    /// keyframe gate. Running or paused state is preserved.
    pub fn flush(&self) {
        let mut guard = self.lock_codec();
        self.flush_locked(&mut guard);
    }

    /// [`flush`](Self::flush) under a codec lock the caller already holds.
    pub fn flush_locked(&self, guard: &mut CodecGuard<'_>) {
        let shared = &self.shared;
        let dropped = shared.flush_slot(guard);
        // An ended decoder has work again after a flush (it follows a seek).
        shared.status.transition(Status::Ended, Status::Paused);
        debug!(kind = %shared.kind, dropped, "Decoder flushed");
    }

    /// Stop the decode loop, release the codec and drop queued frames.
    pub fn stop(&self) {
        let shared = &self.shared;
        if let Some(handle) = self.worker.lock().take() {
            shared.interrupter.request(InterruptRequest::Stop);
            shared.wake();
            join_worker(shared.kind, handle);
        }
        let released = shared.codec.lock().codec.take().is_some();
        shared.frames.clear();
        shared.status.set(Status::Stopped);
        if released {
            debug!(kind = %shared.kind, "Codec released");
        }
    }

    /// Stop and unbind from the demuxer. Safe to call repeatedly and from
    /// any thread.
    pub fn dispose(&self) {
        self.stop();
        let unbound = self.shared.binding.write().take().is_some();
        {
            let mut slot = self.shared.codec.lock();
            slot.normalizer = None;
            slot.gate = KeyframeGate::new(false);
        }
        if unbound {
            info!(kind = %self.shared.kind, "Decoder disposed");
        }
    }

    /// Decoded frames ready for presentation.
    pub fn frames(&self) -> FrameQueue {
        self.shared.frames.clone()
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    pub fn status(&self) -> Status {
        self.shared.status.get()
    }

    pub fn stream(&self) -> Option<StreamDescriptor> {
        self.shared.binding.read().as_ref().map(|b| b.stream.clone())
    }

    pub fn demuxer(&self) -> Option<Arc<Demuxer>> {
        self.shared
            .binding
            .read()
            .as_ref()
            .map(|b| Arc::clone(&b.demuxer))
    }

    /// Whether the bound demuxer is the main (video) container's.
    pub fn on_video_demuxer(&self) -> bool {
        self.shared
            .binding
            .read()
            .as_ref()
            .is_some_and(|b| b.demuxer.role() == MediaKind::Video)
    }

    /// Frames discarded by the keyframe gate since open.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }

    /// Fatal codec error that ended the decoder, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn has_failed(&self) -> bool {
        self.shared.last_error.lock().is_some()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn join_worker(kind: MediaKind, handle: JoinHandle<()>) {
    // Disposal may be triggered from the decode thread itself.
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!(kind = %kind, "Decode thread panicked");
    }
}

fn decode_loop(shared: &Shared) {
    let Some(binding) = shared.binding.read().clone() else {
        shared.status.set(Status::Stopped);
        return;
    };
    let packets = &binding.packets;
    debug!(kind = %shared.kind, stream = binding.stream.index, "Decode loop started");
    let mut decoded = 0u64;

    let outcome = loop {
        match shared.interrupter.current() {
            InterruptRequest::Pause => break Status::Paused,
            InterruptRequest::Stop => break Status::Stopped,
            InterruptRequest::None => {}
        }

        if shared.frames.is_full() {
            shared.frames.wait_for_space(QUEUE_WAIT);
            continue;
        }

        let mut slot = shared.codec.lock();
        let Some(packet) = packets.pop() else {
            if binding.demuxer.is_exhausted() && packets.is_empty() {
                drain_codec(shared, &mut slot);
                // Published under the codec lock so a flush that follows
                // sees the end and re-arms the decoder.
                shared.status.set(Status::Ended);
                break Status::Ended;
            }
            drop(slot);
            packets.wait_for_item(QUEUE_WAIT);
            continue;
        };
        if packet.stream_index != binding.stream.index {
            continue;
        }

        let Some(codec) = slot.codec.as_mut() else {
            break Status::Stopped;
        };
        match codec.decode(&packet) {
            Ok(frames) => {
                decoded += 1;
                shared.deliver(&mut slot, frames, packet.duration);
            }
            Err(e) if e.is_fatal() => {
                error!(kind = %shared.kind, error = %e, "Codec failed, ending decoder");
                slot.codec = None;
                *shared.last_error.lock() = Some(e.to_string());
                shared.status.set(Status::Ended);
                break Status::Ended;
            }
            Err(e) => {
                warn!(kind = %shared.kind, error = %e, "Skipping undecodable packet");
            }
        }
    };

    if outcome != Status::Ended {
        shared.status.set(outcome);
    }
    shared.frames.wake();
    debug!(kind = %shared.kind, status = %outcome, decoded, "Decode loop exited");
}

fn drain_codec(shared: &Shared, slot: &mut CodecSlot) {
    let Some(codec) = slot.codec.as_mut() else {
        return;
    };
    match codec.drain() {
        Ok(frames) => {
            let count = frames.len();
            shared.deliver(slot, frames, 0);
            debug!(kind = %shared.kind, frames = count, "Codec drained");
        }
        Err(e) => warn!(kind = %shared.kind, error = %e, "Codec drain failed"),
    }
}
