//! Core time types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Number of ticks in one second (1 tick = 100 ns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Number of ticks in one millisecond.
pub const TICKS_PER_MS: i64 = 10_000;

/// Pipeline-wide time unit: 100 ns ticks.
///
/// Every stream timestamp is converted into ticks before it is compared
/// against timestamps of another stream or container.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const ZERO: Self = Self(0);

    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(TICKS_PER_MS))
    }

    pub fn as_millis(self) -> i64 {
        self.0 / TICKS_PER_MS
    }

    /// Convert a timestamp expressed in `time_base` units into ticks.
    pub fn from_timestamp(ts: i64, time_base: Rational) -> Self {
        Self(rescale(ts, time_base, Rational::TICKS))
    }

    /// Convert these ticks into `time_base` units.
    pub fn to_timestamp(self, time_base: Rational) -> i64 {
        rescale(self.0, Rational::TICKS, time_base)
    }
}

impl Add for Ticks {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Ticks {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let total_ms = (self.0 / TICKS_PER_MS).unsigned_abs();
        let hours = total_ms / 3_600_000;
        let mins = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1000;
        let millis = total_ms % 1000;
        write!(f, "{sign}{hours:02}:{mins:02}:{secs:02}.{millis:03}")
    }
}

/// Rational number used for timebases and frame rates
/// (e.g. 1/90000 for MPEG-TS, 30000/1001 for 29.97fps).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    /// Timebase of [`Ticks`].
    pub const TICKS: Self = Self {
        num: 1,
        den: TICKS_PER_SECOND as u32,
    };
    pub const MILLIS: Self = Self { num: 1, den: 1000 };
    pub const MPEG: Self = Self { num: 1, den: 90_000 };

    pub const FPS_25: Self = Self { num: 25, den: 1 };

    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "Rational denominator must be > 0");
        Self { num, den }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Rescale `value` from timebase `from` to timebase `to`.
///
/// Rounds half away from zero and saturates at the `i64` range. A zero
/// target numerator has no meaningful scale and yields 0.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }

    let quotient = num / den;
    let remainder = num % den;
    let rounded = if remainder.abs() * 2 >= den {
        quotient + num.signum()
    } else {
        quotient
    };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Rescale an optional timestamp; `None` ("no timestamp") passes through.
pub fn rescale_opt(value: Option<i64>, from: Rational, to: Rational) -> Option<i64> {
    value.map(|v| rescale(v, from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_to_ticks() {
        assert_eq!(Ticks::from_millis(45_000).0, 450_000_000);
        assert_eq!(Ticks(450_000_000).as_millis(), 45_000);
    }

    #[test]
    fn rescale_mpeg_to_ticks() {
        // 1 second at 90 kHz
        assert_eq!(rescale(90_000, Rational::MPEG, Rational::TICKS), TICKS_PER_SECOND);
        let ticks = Ticks::from_timestamp(45_000, Rational::MPEG);
        assert_eq!(ticks.as_millis(), 500);
        assert_eq!(ticks.to_timestamp(Rational::MPEG), 45_000);
    }

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let from = Rational::new(1, 2);
        let to = Rational::new(1, 1);
        // 3/2 = 1.5 -> 2, -3/2 = -1.5 -> -2
        assert_eq!(rescale(3, from, to), 2);
        assert_eq!(rescale(-3, from, to), -2);
        // 1/2 = 0.5 -> 1
        assert_eq!(rescale(1, from, to), 1);
        // 5/4 = 1.25 -> 1
        assert_eq!(rescale(5, Rational::new(1, 4), to), 1);
    }

    #[test]
    fn rescale_saturates() {
        let big = rescale(i64::MAX, Rational::new(1, 1), Rational::TICKS);
        assert_eq!(big, i64::MAX);
        let small = rescale(i64::MIN, Rational::new(1, 1), Rational::TICKS);
        assert_eq!(small, i64::MIN);
    }

    #[test]
    fn rescale_opt_passes_none() {
        assert_eq!(rescale_opt(None, Rational::MPEG, Rational::TICKS), None);
        assert_eq!(
            rescale_opt(Some(90_000), Rational::MPEG, Rational::MILLIS),
            Some(1000)
        );
    }

    #[test]
    fn ticks_display() {
        let t = Ticks::from_millis(3_661_500);
        assert_eq!(t.to_string(), "01:01:01.500");
        assert_eq!(Ticks::from_millis(-1500).to_string(), "-00:00:01.500");
    }

    #[test]
    fn rational_display() {
        assert_eq!(Rational::FPS_25.to_string(), "25");
        assert_eq!(Rational::new(30_000, 1001).to_string(), "30000/1001");
    }
}
