//! Resolution-agnostic duration type (spec §3 supplement).
//!
//! Every timeout-bearing API (`readTimeout`, `writeTimeout`,
//! `keepAliveTimeout`, `Timer` deadlines) takes a [`Timespan`] rather than
//! scattering `std::time::Duration` directly, keeping "canonical unit:
//! microseconds" explicit at the type level.

use std::time::Duration;

/// A duration in microseconds. Negative values are reserved for sentinels
/// (see [`super::WAIT_INFINITE`]); ordinary durations are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespan(i64);

impl Timespan {
    pub const fn new(microseconds: i64) -> Self {
        Self(microseconds)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000)
    }

    pub const fn from_secs(s: i64) -> Self {
        Self(s * 1_000_000)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl From<Duration> for Timespan {
    fn from(d: Duration) -> Self {
        Self(d.as_micros() as i64)
    }
}

impl From<Timespan> for Duration {
    fn from(t: Timespan) -> Self {
        Duration::from_micros(t.0.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_and_from_duration() {
        let ts = Timespan::from_millis(250);
        let d: Duration = ts.into();
        assert_eq!(d, Duration::from_micros(250_000));
        assert_eq!(Timespan::from(d), ts);
    }

    #[test]
    fn orders_by_magnitude() {
        assert!(Timespan::from_millis(5) < Timespan::from_secs(1));
    }
}
