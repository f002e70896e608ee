//! Deadline timer (spec §4.7 "Timer").
//!
//! Fires when its monotonic deadline has passed. A periodic timer
//! reschedules itself *after* firing, relative to the schedule it was
//! started on rather than to "now" — so a slow handler doesn't compound
//! drift, and a deadline set in the past fires immediately, catching up
//! exactly one tick before realigning to the absolute schedule.

use super::Timespan;
use tokio::time::{sleep_until, Instant};

pub struct Timer {
    /// `None` for a one-shot timer.
    period: Option<Timespan>,
    next_deadline: Instant,
}

impl Timer {
    /// Fires once, `delay` from now.
    pub fn after(delay: Timespan) -> Self {
        Self {
            period: None,
            next_deadline: Instant::now() + delay.into(),
        }
    }

    /// Fires once at the given absolute instant. A deadline already in the
    /// past resolves on the very next `tick()` call.
    pub fn at(deadline: Instant) -> Self {
        Self {
            period: None,
            next_deadline: deadline,
        }
    }

    /// Fires every `period`, starting one `period` from now.
    pub fn every(period: Timespan) -> Self {
        Self {
            period: Some(period),
            next_deadline: Instant::now() + period.into(),
        }
    }

    /// Wait for the timer's `timeout` signal. For a periodic timer, the
    /// next deadline is advanced by exactly one `period` from the deadline
    /// that just fired — never from "now" — so handling latency never
    /// compounds. If more than one period has already elapsed (the caller
    /// was slow, or the schedule started in the past), this call returns
    /// immediately and the deadline catches up by one period per call
    /// rather than firing a burst.
    pub async fn tick(&mut self) {
        sleep_until(self.next_deadline).await;
        if let Some(period) = self.period {
            self.next_deadline += period.into();
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.period.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let mut timer = Timer::after(Timespan::from_millis(10));
        timer.tick().await;
        assert!(!timer.is_periodic());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_deadline_advances_by_exactly_one_period() {
        let mut timer = Timer::every(Timespan::from_millis(10));
        let first = timer.next_deadline;
        timer.tick().await;
        assert_eq!(timer.next_deadline, first + StdDuration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately_and_catches_up_one_tick() {
        let past = Instant::now() - StdDuration::from_secs(60);
        let mut timer = Timer::at(past);
        timer.tick().await; // resolves immediately, no advancing the clock
        assert!(!timer.is_periodic());
    }
}
