//! Lifecycle status shared between control calls and worker threads.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Status of a demuxer, decoder, downloader or the whole decoder context.
///
/// ```text
/// Stopped -> Opening -> Running <-> Paused -> Ended | Stopping -> Stopped
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Nothing running (also the state of a freshly opened component).
    Stopped = 0,
    /// A container or codec is being opened.
    Opening = 1,
    /// Worker thread active.
    Running = 2,
    /// Pause requested, worker still winding down.
    Pausing = 3,
    /// Worker parked; can be resumed.
    Paused = 4,
    /// Natural completion (end of stream reached and drained).
    Ended = 5,
    /// Stop requested, or the worker hit a failure it could not absorb.
    Stopping = 6,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Opening,
            2 => Self::Running,
            3 => Self::Pausing,
            4 => Self::Paused,
            5 => Self::Ended,
            6 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Running or about to pause: the worker may still touch shared state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Pausing)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Opening => "Opening",
            Self::Running => "Running",
            Self::Pausing => "Pausing",
            Self::Paused => "Paused",
            Self::Ended => "Ended",
            Self::Stopping => "Stopping",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lock-free status cell, written by control calls and worker threads.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Set `to` only if the current status is `from`.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new(Status::Stopped)
    }
}
