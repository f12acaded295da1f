// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Run-wide monotonic clock used to timestamp telemetry samples.
//!
//! The clock is an explicit value created once per run and handed to every
//! component that needs it. It is `Copy`, so sharing it with a background
//! thread needs no synchronization.

use std::time::{Duration, Instant};

/// Monotonic time source measuring from the moment it was started.
#[derive(Debug, Clone, Copy)]
pub struct BenchClock {
    origin: Instant,
}

impl BenchClock {
    /// Start a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Elapsed microseconds since start.
    pub fn elapsed_us(&self) -> u64 {
        // u64 microseconds overflow after ~584k years
        self.elapsed().as_micros() as u64
    }

    /// Restart the clock from now.
    pub fn reset(&mut self) {
        self.origin = Instant::now();
    }
}

impl Default for BenchClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = BenchClock::start();
        let a = clock.elapsed_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.elapsed_us();
        assert!(b >= a + 1_000);
    }

    #[test]
    fn test_copies_share_origin() {
        let clock = BenchClock::start();
        let copy = clock;
        std::thread::sleep(Duration::from_millis(1));
        let (a, b) = (clock.elapsed_us(), copy.elapsed_us());
        assert!(a.abs_diff(b) < 1_000_000);
    }

    #[test]
    fn test_reset() {
        let mut clock = BenchClock::start();
        std::thread::sleep(Duration::from_millis(5));
        clock.reset();
        assert!(clock.elapsed() < Duration::from_millis(5));
    }
}
