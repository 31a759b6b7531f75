//! Wall-Clock Timing
//!
//! Monotonic stopwatch around a block of work. Wait tasks run for whole
//! seconds, so `std::time::Instant` resolution is far more than enough.

use std::time::{Duration, Instant};

/// Records the wall-clock time of a scoped block of work
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Start timing now
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time elapsed so far, without stopping
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timing and return the elapsed interval
    #[inline(always)]
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }

    /// Run `f` and return its output with the time it took
    pub fn measure<T>(f: impl FnOnce() -> T) -> (T, Duration) {
        let stopwatch = Self::start();
        let output = f();
        (output, stopwatch.stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_elapsed() {
        let stopwatch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(10));
        let elapsed = stopwatch.stop();

        assert!(elapsed >= Duration::from_millis(10));
        // Generous upper bound for loaded CI machines
        assert!(elapsed < Duration::from_millis(100));
    }

    #[test]
    fn test_measure_returns_output() {
        let (value, elapsed) = Stopwatch::measure(|| {
            std::thread::sleep(Duration::from_millis(5));
            42
        });
        assert_eq!(value, 42);
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_empty_block_is_negligible() {
        let ((), elapsed) = Stopwatch::measure(|| {});
        assert!(elapsed < Duration::from_millis(1));
    }
}
