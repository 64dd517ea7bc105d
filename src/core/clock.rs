use std::time::Instant;

/// A monotonic source of "now" in seconds.
pub trait TimeSource {
    fn now(&self) -> f64;
}

/// Seconds elapsed since the clock was created, read from `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Converts an `Instant` captured by an input callback into this clock's timeline.
    pub fn seconds_at(&self, instant: Instant) -> f64 {
        if instant >= self.origin {
            instant.saturating_duration_since(self.origin).as_secs_f64()
        } else {
            -(self.origin.saturating_duration_since(instant).as_secs_f64())
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
