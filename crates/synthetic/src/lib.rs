//! `vela-synthetic` — In-process implementation of the media backend traits.
//!
//! Containers are generated from a [`SourceSpec`]: evenly spaced packets per
//! stream, interleaved by timestamp, with keyframes every `gop` packets.
//! Specs can inject the failure modes a real backend exhibits (blocking
//! network reads, I/O errors, corrupt data, imprecise seeks, broken codec
//! sessions). Codecs pass packet payloads through, and output containers
//! are recorded in memory where tests can inspect them.
//!
//! Registered sources are looked up by the display form of the
//! [`MediaSource`](vela_common::MediaSource), so both `synth://` URLs and
//! plain paths work.

pub mod backend;
pub mod codec;
pub mod input;
pub mod output;
pub mod source;

pub use backend::{SyntheticBackend, DEMO_DUB, DEMO_LIVE, DEMO_MOVIE, DEMO_SUBTITLES};
pub use output::{OutputRecord, OutputStream};
pub use source::{SourceSpec, StreamSpec};
