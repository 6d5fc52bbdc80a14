//! Cooperative interruption of blocking reads.
//!
//! Every demuxer owns an [`Interrupter`]. Backends must poll
//! [`Interrupter::is_interrupted`] inside any call that may block (network
//! reads, device waits) and return [`ReadError::Interrupted`](crate::ReadError)
//! promptly once it is raised.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a worker is being interrupted. Stronger requests win over weaker ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum InterruptRequest {
    None = 0,
    Pause = 1,
    Stop = 2,
}

/// Shared interrupt flag.
#[derive(Clone, Debug, Default)]
pub struct Interrupter {
    request: Arc<AtomicU8>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a request. A pending `Stop` is never downgraded to `Pause`.
    pub fn request(&self, request: InterruptRequest) {
        self.request.fetch_max(request as u8, Ordering::AcqRel);
    }

    /// Lower any pending request.
    pub fn clear(&self) {
        self.request.store(InterruptRequest::None as u8, Ordering::Release);
    }

    pub fn current(&self) -> InterruptRequest {
        match self.request.load(Ordering::Acquire) {
            1 => InterruptRequest::Pause,
            2 => InterruptRequest::Stop,
            _ => InterruptRequest::None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.current() != InterruptRequest::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_not_downgraded() {
        let irq = Interrupter::new();
        assert!(!irq.is_interrupted());
        irq.request(InterruptRequest::Stop);
        irq.request(InterruptRequest::Pause);
        assert_eq!(irq.current(), InterruptRequest::Stop);
        irq.clear();
        assert_eq!(irq.current(), InterruptRequest::None);
    }

    #[test]
    fn clones_share_state() {
        let irq = Interrupter::new();
        let seen_by_backend = irq.clone();
        irq.request(InterruptRequest::Pause);
        assert!(seen_by_backend.is_interrupted());
    }
}
