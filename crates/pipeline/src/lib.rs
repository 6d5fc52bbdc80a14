//! `vela-pipeline` — Orchestration for the Vela media pipeline.
//!
//! Two entry points compose the lower crates:
//!
//! - [`DecoderContext`] drives three demuxer/decoder pipelines (video, audio,
//!   subtitles) for playback, with synchronized seeking across containers
//!   that run on independent clocks.
//! - [`Downloader`] copies the enabled streams of one container into an
//!   output file through a [`Remuxer`](vela_mux::Remuxer).
//!
//! ## Module Overview
//!
//! - [`context`]: `DecoderContext` open/seek/play/pause/stop/flush
//! - [`downloader`]: headless remux copy loop with progress events
//! - [`locks`]: canonical-order acquisition of codec locks
//! - [`seek`]: seek target computation and range clamping

pub mod context;
pub mod downloader;
pub mod locks;
pub mod seek;

pub use context::{DecoderContext, OpenReport, SeekReport};
pub use downloader::{DownloadEvent, Downloader};
pub use locks::CodecLocks;
pub use seek::{seek_target, SeekTarget, END_MARGIN};
