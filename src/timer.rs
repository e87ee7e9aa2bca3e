//! Tick-driven repeating timers.
//!
//! Nothing here owns a thread.  The owner calls [`RepeatingTimer::poll`]
//! from its `tick(now)`; a timer fires at most once per poll and re-arms
//! from the poll time, so a late tick never produces a burst of stacked
//! firings.

use core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatingTimer {
    interval: Duration,
    deadline: Option<Duration>,
}

impl RepeatingTimer {
    /// A stopped timer.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Arm the timer; the first firing is one interval after `now`.
    pub fn start(&mut self, now: Duration) {
        self.deadline = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` if the deadline has passed, re-arming for the next
    /// interval.
    pub fn poll(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
