//! Seek target policy.
//!
//! A requested position in milliseconds is turned into a container
//! timestamp per demuxer, then clamped into the seekable range. Targets
//! before the start snap to the start and seek forward; targets at or past
//! the end snap just before the end and seek backward, so both land on
//! decodable content.

use std::fmt;

use vela_common::{Ticks, TICKS_PER_MS};

/// Distance kept from the end of the container when clamping.
pub const END_MARGIN: Ticks = Ticks(100);

/// Where a demuxer will be repositioned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekTarget {
    pub ticks: Ticks,
    /// Seek to the first keyframe at or after `ticks` (else at or before).
    pub forward: bool,
}

impl fmt::Display for SeekTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.forward { "forward" } else { "backward" };
        write!(f, "{} ({dir})", self.ticks)
    }
}

/// Compute the target for a container starting at `start` and lasting
/// `duration` (zero for live). `offset` is subtracted after the start is
/// applied (audio delay plus latency, or subtitle delay).
pub fn seek_target(ms: i64, forward: bool, start: Ticks, duration: Ticks, offset: Ticks) -> SeekTarget {
    let requested = Ticks(ms.saturating_mul(TICKS_PER_MS)) + start - offset;

    if requested < start {
        return SeekTarget {
            ticks: start,
            forward: true,
        };
    }

    if duration > Ticks::ZERO {
        let end = start + duration;
        if requested >= end {
            return SeekTarget {
                ticks: (end - END_MARGIN).max(start),
                forward: false,
            };
        }
    }

    SeekTarget {
        ticks: requested,
        forward,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Ticks = Ticks(60_000 * TICKS_PER_MS);

    #[test]
    fn in_range_keeps_direction() {
        let t = seek_target(45_000, false, Ticks::ZERO, MINUTE, Ticks::ZERO);
        assert_eq!(t.ticks, Ticks::from_millis(45_000));
        assert!(!t.forward);
    }

    #[test]
    fn start_offset_is_added() {
        let start = Ticks::from_millis(10_000);
        let t = seek_target(1_000, false, start, MINUTE, Ticks::ZERO);
        assert_eq!(t.ticks, Ticks::from_millis(11_000));
    }

    #[test]
    fn below_start_clamps_forward() {
        let t = seek_target(-5, false, Ticks::ZERO, MINUTE, Ticks::ZERO);
        assert_eq!(t, SeekTarget { ticks: Ticks::ZERO, forward: true });

        // Audio compensation can push an in-range request below the start.
        let t = seek_target(100, false, Ticks::ZERO, MINUTE, Ticks::from_millis(300));
        assert_eq!(t, SeekTarget { ticks: Ticks::ZERO, forward: true });
    }

    #[test]
    fn past_end_clamps_backward() {
        let t = seek_target(60_000, true, Ticks::ZERO, MINUTE, Ticks::ZERO);
        assert_eq!(t, SeekTarget { ticks: MINUTE - END_MARGIN, forward: false });

        let t = seek_target(90_000, true, Ticks::from_millis(500), MINUTE, Ticks::ZERO);
        assert_eq!(t.ticks, Ticks::from_millis(500) + MINUTE - END_MARGIN);
        assert!(!t.forward);
    }

    #[test]
    fn tiny_duration_never_goes_below_start() {
        let t = seek_target(1, true, Ticks(1_000), Ticks(50), Ticks::ZERO);
        assert_eq!(t, SeekTarget { ticks: Ticks(1_000), forward: false });
    }

    #[test]
    fn live_has_no_upper_bound() {
        let t = seek_target(3_600_000, true, Ticks::ZERO, Ticks::ZERO, Ticks::ZERO);
        assert_eq!(t.ticks, Ticks::from_millis(3_600_000));
        assert!(t.forward);
    }

    #[test]
    fn offset_is_subtracted() {
        let t = seek_target(2_000, true, Ticks::ZERO, MINUTE, Ticks::from_millis(250));
        assert_eq!(t.ticks, Ticks::from_millis(1_750));
    }
}
