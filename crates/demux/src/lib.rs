//! `vela-demux` — Container reading for the Vela media pipeline.
//!
//! A [`Demuxer`] owns one opened input container and a background read
//! thread that splits its packets into bounded per-kind queues (or a single
//! ordered queue for remuxing). [`probe`] detects container formats from
//! names and magic bytes.

pub mod demuxer;
pub mod probe;

pub use demuxer::{Demuxer, QueueLayout};
