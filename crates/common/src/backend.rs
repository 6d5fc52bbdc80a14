//! Media backend abstraction traits.
//!
//! These traits define the interface between the pipeline and whatever
//! library actually parses containers and runs codecs. The demuxer, decoder
//! and remuxer crates program against these traits, never against a concrete
//! backend implementation.

use std::path::Path;

use crate::codec::ContainerFormat;
use crate::error::{DecodeError, DemuxError, MuxError, ReadError};
use crate::frame::CodecFrame;
use crate::interrupt::Interrupter;
use crate::packet::{EncodedPacket, MediaSource, StreamDescriptor};
use crate::types::{Rational, Ticks};

/// Options handed to a codec on creation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CodecOptions {
    /// Decode threads (0 = let the codec decide).
    pub threads: u32,
}

/// Factory for containers and codecs. Shared between every pipeline
/// component, so it must be thread-safe.
pub trait MediaBackend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Open an input container. `interrupter` is polled by every blocking
    /// operation of the returned container (open included) and must abort
    /// it with [`ReadError::Interrupted`] once a request is raised.
    fn open_input(
        &self,
        source: &MediaSource,
        interrupter: Interrupter,
    ) -> Result<Box<dyn InputContainer>, DemuxError>;

    /// Create a codec context for `stream`.
    fn create_codec(
        &self,
        stream: &StreamDescriptor,
        options: &CodecOptions,
    ) -> Result<Box<dyn CodecContext>, DecodeError>;

    /// Create an output container at `path`.
    fn create_output(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<Box<dyn OutputContainer>, MuxError>;
}

/// An opened input container.
pub trait InputContainer: Send {
    /// Input format name, possibly a comma separated alias list
    /// (`"mov,mp4,m4a"`).
    fn format_name(&self) -> &str;

    /// Every stream of the container, in container order.
    fn streams(&self) -> &[StreamDescriptor];

    /// Total duration (zero when unknown or live).
    fn duration(&self) -> Ticks;

    /// Container start-time offset.
    fn start_time(&self) -> Ticks;

    /// Whether the source is a live stream without a fixed end.
    fn is_live(&self) -> bool;

    /// Read the next packet in container order. Blocks until data is
    /// available, the container ends, or the interrupter fires.
    fn read_packet(&mut self) -> Result<EncodedPacket, ReadError>;

    /// Reposition to `target`. With `forward` the container lands on the
    /// first keyframe at or after the target, otherwise on the last one at
    /// or before it. Imprecise backends may land anywhere nearby.
    fn seek(&mut self, target: Ticks, forward: bool) -> Result<(), DemuxError>;
}

/// A codec context turning packets into frames.
pub trait CodecContext: Send {
    /// Feed one packet and collect every frame it completes.
    fn decode(&mut self, packet: &EncodedPacket) -> Result<Vec<CodecFrame>, DecodeError>;

    /// Signal end of input and collect every buffered frame.
    fn drain(&mut self) -> Result<Vec<CodecFrame>, DecodeError>;

    /// Discard all internal state (after a seek).
    fn reset(&mut self);
}

/// An output container being written.
pub trait OutputContainer: Send {
    fn format(&self) -> ContainerFormat;

    /// Add a stream copying `input`'s codec parameters. Returns the output
    /// stream index and the timebase requested for it.
    fn add_stream(&mut self, input: &StreamDescriptor) -> Result<(usize, Rational), MuxError>;

    /// Write the container header. The container may settle on different
    /// timebases than requested; read them back with
    /// [`stream_time_base`](Self::stream_time_base).
    fn write_header(&mut self) -> Result<(), MuxError>;

    /// Timebase of output stream `index`, if it exists.
    fn stream_time_base(&self, index: usize) -> Option<Rational>;

    /// Write one packet (timestamps already in the output stream timebase).
    fn write_packet(&mut self, packet: EncodedPacket) -> Result<(), MuxError>;

    /// Finalize the file.
    fn write_trailer(&mut self) -> Result<(), MuxError>;
}
