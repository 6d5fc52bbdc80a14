//! `vela-decoder` — Decode loops for the Vela media pipeline.
//!
//! A [`Decoder`] is bound to one stream of a [`Demuxer`](vela_demux::Demuxer).
//! Its background thread pops packets from the demuxer's queue for that
//! stream's kind, runs them through a backend codec under the codec lock and
//! pushes normalized frames into a bounded frame queue.
//!
//! ## Module Overview
//!
//! - [`decoder`]: `Decoder` lifecycle (open/start/pause/flush/stop/dispose)
//! - [`frames`]: timestamp normalization and the video keyframe gate
//!
//! ## Usage
//!
//! ```ignore
//! use vela_decoder::Decoder;
//! use vela_common::{DecoderSettings, MediaKind};
//!
//! let decoder = Decoder::new(MediaKind::Video, backend, &DecoderSettings::default());
//! decoder.open(&stream, &demuxer)?;
//! decoder.start()?;
//! while let Some(frame) = decoder.frames().pop_timeout(timeout) {
//!     // Present the frame...
//! }
//! ```

pub mod decoder;
pub mod frames;

pub use decoder::{CodecGuard, CodecSlot, Decoder};
pub use frames::{FrameNormalizer, KeyframeGate};
