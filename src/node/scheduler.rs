//! Fixed-interval gate driven by a wrapping millisecond clock.

use std::time::Instant;

/// Milliseconds since boot. Wraps after about 49.7 days.
pub type Millis = u32;

/// Level-triggered interval gate.
///
/// `tick` fires when at least `interval` has elapsed since the last firing.
/// A loop that stalls for several intervals gets one firing, not a backlog.
/// Elapsed time is computed with wrapping subtraction, so the gate keeps working
/// across the clock's overflow.
#[derive(Clone, Debug)]
pub struct SampleClock {
    last_fired: Millis,
    interval: Millis,
}

impl SampleClock {
    pub fn new(interval: Millis) -> Self {
        Self {
            last_fired: 0,
            interval,
        }
    }

    #[cfg(test)]
    /// Starts the gate as if it had just fired at `last_fired`.
    pub fn starting_at(interval: Millis, last_fired: Millis) -> Self {
        Self {
            last_fired,
            interval,
        }
    }

    pub fn tick(&mut self, now: Millis) -> bool {
        if now.wrapping_sub(self.last_fired) >= self.interval {
            self.last_fired = now;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn last_fired(&self) -> Millis {
        self.last_fired
    }

    pub fn interval(&self) -> Millis {
        self.interval
    }
}

/// Monotonic millisecond source for the control loop, zero at creation.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }

    /// Truncation to 32 bits is the intended wraparound.
    pub fn now_millis(&self) -> Millis {
        self.boot.elapsed().as_millis() as Millis
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
