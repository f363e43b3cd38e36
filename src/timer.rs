use std::time::{Duration, Instant};

/// Fixed-interval deadline timer. The owner checks `fired` between
/// event-loop iterations and calls `renew` to start the next interval;
/// leaders use one to pace their append rounds. A plain deadline keeps the
/// loop single-threaded, the same shape as the election deadline.
pub struct Timer {
    interval: Duration,
    deadline: Instant,
}

impl Timer {
    pub fn new(interval: Duration) -> Timer {
        Timer {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    /// True once the interval has elapsed since the last arm. Stays true
    /// until the timer is renewed.
    pub fn fired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn renew(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }
}
