//! `vela-mux` — Remuxing for the Vela media pipeline.
//!
//! This crate copies already-encoded packets into a new output container.
//! No transcoding takes place: codec parameters are copied verbatim and only
//! timestamps are touched.
//!
//! # Architecture
//!
//! - **Two sources**: packets arrive from a primary container and optionally
//!   a secondary (audio) container, each with its own stream mapping
//! - **Rebasing**: every input stream is shifted so its first decode
//!   timestamp becomes zero
//! - **Rescaling**: timestamps are converted into the timebase the output
//!   container settled on when its header was written
//!
//! # Usage
//!
//! ```ignore
//! use vela_mux::Remuxer;
//!
//! let remuxer = Remuxer::new(backend);
//! remuxer.open(Path::new("out.mkv"), None)?;
//! for stream in &streams {
//!     remuxer.add_stream(stream, false)?;
//! }
//! remuxer.write_header()?;
//! remuxer.write(packet, false)?;
//! remuxer.write_trailer()?;
//! ```

pub mod error;
pub mod remuxer;

// Re-export primary API types
pub use error::{MuxError, MuxResult};
pub use remuxer::{RemuxStreamMapping, Remuxer};
