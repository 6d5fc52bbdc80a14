//! `vela-common` — Shared types, traits, queues and errors for the Vela media
//! pipeline.
//!
//! This crate is the foundation that all other pipeline crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `Ticks`, `Rational` and timebase rescaling
//! - **Backend traits**: `MediaBackend`, `InputContainer`, `CodecContext`,
//!   `OutputContainer` (container/codec library abstraction)
//! - **Packets & frames**: `StreamDescriptor`, `EncodedPacket`, `DecodedFrame`
//! - **Queues**: `PacketQueue`, `FrameQueue` (bounded, condvar-backed)
//! - **Control**: `Status`, `AtomicStatus`, `Interrupter`
//! - **Errors**: `PipelineError`, `DemuxError`, `DecodeError`, `MuxError`
//! - **Config**: `PipelineConfig` and its sections

pub mod backend;
pub mod codec;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod interrupt;
pub mod packet;
pub mod queue;
pub mod status;
pub mod types;

// Re-export commonly used items at crate root
pub use backend::{CodecContext, CodecOptions, InputContainer, MediaBackend, OutputContainer};
pub use codec::{CodecId, ContainerFormat, MediaKind};
pub use color::PixelFormat;
pub use config::{AudioConfig, DecoderSettings, DemuxerConfig, PipelineConfig, SubtitleConfig};
pub use error::{DecodeError, DemuxError, MuxError, PipelineError, PipelineResult, ReadError};
pub use frame::{
    AudioSamples, CodecFrame, DecodedFrame, FramePayload, PictureType, SubtitleText, TextSpan,
    VideoPicture,
};
pub use interrupt::{InterruptRequest, Interrupter};
pub use packet::{CodecParameters, EncodedPacket, MediaSource, StreamDescriptor};
pub use queue::{FrameQueue, MediaQueue, PacketQueue};
pub use status::{AtomicStatus, Status};
pub use types::{rescale, rescale_opt, Rational, Ticks, TICKS_PER_MS, TICKS_PER_SECOND};
