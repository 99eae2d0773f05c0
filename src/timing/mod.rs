//! Session clock for presentation timestamps
//!
//! Timestamps are wall-clock microseconds since the encoder started running.
//! Irregular submission cadence shows up unchanged in the timestamps.

use std::time::Instant;

/// Monotonic clock anchored at the moment the encoder entered `Running`
#[derive(Debug, Clone, Copy)]
pub struct PTSClock {
    start: Instant,
}

impl PTSClock {
    /// Create a clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed microseconds since time zero
    #[inline]
    pub fn pts_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}
