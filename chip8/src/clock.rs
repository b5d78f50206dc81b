//! Loop clocks.
use std::{
    thread,
    time::{Duration, Instant},
};

/// Deadline of the next cycle of a cooperative loop.
///
/// It is designed to work with the yielding cooperative pattern
/// of the scheduler. When a loop yields, time elapses until it is
/// resumed. Once resumed, the next cycle is counted from that moment.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    next: Instant,
    interval: Duration,
}

impl Clock {
    /// Creates a new clock that is due immediately.
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        Self {
            next: now,
            interval,
        }
    }

    /// Make the clock due immediately.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.next = now;
    }

    #[inline]
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.next
    }

    /// Schedule the next cycle one interval from now.
    ///
    /// Resets rather than trying to catch up. If the loop was paused for
    /// debugging, and a large amount of time has elapsed until it is resumed,
    /// it should simply continue at the next cycle running at its usual speed.
    pub(crate) fn advance(&mut self, now: Instant) {
        self.next = now + self.interval;
    }
}

/// Block the current thread until the deadline.
pub(crate) fn wait_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }

        let remaining = deadline - now;
        if remaining > Duration::from_millis(2) {
            // Sleep does not have enough resolution for the final stretch.
            thread::sleep(remaining - Duration::from_millis(1));
        } else {
            // Spinning a loop causes high CPU usage and fan madness.
            //
            // Yielding in a loop is the best alternative.
            thread::yield_now();
        }
    }
}
