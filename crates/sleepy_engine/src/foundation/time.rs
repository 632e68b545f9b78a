//! Frame timing

use std::time::{Duration, Instant};

/// Longest step handed to the simulation; longer stalls are clamped
pub const MAX_DELTA: Duration = Duration::from_millis(250);

/// Measures the interval between engine ticks
#[derive(Debug, Clone)]
pub struct Timer {
    started: Instant,
    last_tick: Instant,
    delta: Duration,
    ticks: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Timer starting now
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_tick: now,
            delta: Duration::ZERO,
            ticks: 0,
        }
    }

    /// Mark the start of a tick
    pub fn update(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed > MAX_DELTA {
            log::debug!("Clamping {:?} tick to {:?}", elapsed, MAX_DELTA);
        }
        self.delta = elapsed.min(MAX_DELTA);
        self.last_tick = now;
        self.ticks += 1;
    }

    /// Seconds covered by the last tick, at most [`MAX_DELTA`]
    pub fn delta_time(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Wall-clock seconds since the timer was created
    pub fn total_time(&self) -> f32 {
        self.last_tick.saturating_duration_since(self.started).as_secs_f32()
    }

    /// Ticks so far
    pub fn frame_count(&self) -> u64 {
        self.ticks
    }

    /// Ticks per wall-clock second since creation
    pub fn average_fps(&self) -> f32 {
        let total = self.total_time();
        if total > 0.0 {
            self.ticks as f32 / total
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ticks_measure_elapsed_time() {
        let mut timer = Timer::new();
        let start = timer.last_tick;
        timer.tick_at(start + Duration::from_millis(16));
        timer.tick_at(start + Duration::from_millis(32));
        assert_eq!(timer.frame_count(), 2);
        assert_relative_eq!(timer.delta_time(), 0.016, epsilon = 1e-6);
        assert_relative_eq!(timer.total_time(), 0.032, epsilon = 1e-6);
        assert_relative_eq!(timer.average_fps(), 62.5, epsilon = 1e-3);
    }

    #[test]
    fn test_stalls_are_clamped() {
        let mut timer = Timer::new();
        let start = timer.last_tick;
        timer.tick_at(start + Duration::from_secs(3));
        assert_relative_eq!(timer.delta_time(), MAX_DELTA.as_secs_f32());
        assert_relative_eq!(timer.total_time(), 3.0, epsilon = 1e-6);
    }
}
