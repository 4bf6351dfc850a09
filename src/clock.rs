use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock elapsed time since a fixed starting point.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

/// Lets an action through at most once per interval.
///
/// The first call only succeeds once a full interval has passed since
/// construction, so a freshly started transfer does not report a speed
/// computed over a few microseconds.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Instant,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last) > self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}
