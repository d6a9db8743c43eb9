//! The simulator's logical clock.
//!
//! `VirtualTime` never advances on its own: it only moves forward when a
//! task explicitly `delay`s, a [`crate::delayed::DelayedComp`] runs, or the
//! scheduler advances it to the next scheduled wakeup because every task is
//! parked. No wall-clock sleep ever appears on this type's path.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use std::time::Duration;

/// A point in virtual time, measured in microseconds since the start of the
/// simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualTime(u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);

    pub const fn from_micros(micros: u64) -> Self {
        VirtualTime(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        VirtualTime(millis * 1_000)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

impl From<Duration> for VirtualTime {
    fn from(d: Duration) -> Self {
        VirtualTime(d.as_micros() as u64)
    }
}

impl Add for VirtualTime {
    type Output = VirtualTime;
    fn add(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0 + rhs.0)
    }
}

impl AddAssign for VirtualTime {
    fn add_assign(&mut self, rhs: VirtualTime) {
        self.0 += rhs.0;
    }
}

impl Sub for VirtualTime {
    type Output = VirtualTime;
    fn sub(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0 - rhs.0)
    }
}

/// Scaling a duration by a slot count (`settlement_delay × slot_length`).
impl Mul<u64> for VirtualTime {
    type Output = VirtualTime;
    fn mul(self, rhs: u64) -> VirtualTime {
        VirtualTime(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total_and_monotone() {
        let a = VirtualTime::from_micros(10);
        let b = VirtualTime::from_micros(20);
        assert!(a < b);
        assert_eq!(a + VirtualTime::from_micros(10), b);
    }

    #[test]
    fn saturating_sub_never_underflows() {
        let a = VirtualTime::from_micros(5);
        let b = VirtualTime::from_micros(10);
        assert_eq!(a.saturating_sub(b), VirtualTime::ZERO);
    }

    #[test]
    fn mul_scales_by_a_slot_count() {
        let slot = VirtualTime::from_micros(200);
        assert_eq!(slot * 5, VirtualTime::from_micros(1_000));
    }
}
