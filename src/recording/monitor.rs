//! Rolling-window frame timing for pipeline diagnostics
//!
//! Collects per-frame conversion, encode and total times. Each full window
//! yields one [`PerformanceReport`] and starts over empty.
//!
//! ## Properties
//!
//! - Observational: nothing in the pipeline reads the reports back
//! - Bounded: never holds more than one window of samples
//! - Per session: every recorder owns its own monitor

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{DEFAULT_MIN_HEALTHY_FPS, DEFAULT_STATS_WINDOW};

/// Timings of one processed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTiming {
    /// Zero on the passthrough path
    pub conversion: Duration,
    pub encode: Duration,
    pub total: Duration,
}

/// Summary of one full window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub frames: usize,
    pub avg_conversion_ms: f64,
    pub avg_encode_ms: f64,
    pub avg_total_ms: f64,
    pub min_total_ms: f64,
    pub max_total_ms: f64,
    /// Throughput implied by the average total time
    pub fps: f64,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    capacity: usize,
    min_healthy_fps: f64,
    samples: Vec<FrameTiming>,
    windows_emitted: u64,
}

impl PerformanceMonitor {
    pub fn new(capacity: usize, min_healthy_fps: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            min_healthy_fps,
            samples: Vec::with_capacity(capacity),
            windows_emitted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in the current, incomplete window
    pub fn pending(&self) -> usize {
        self.samples.len()
    }

    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted
    }

    /// Add one frame. Returns the report when this frame completes a window.
    pub fn record(&mut self, timing: FrameTiming) -> Option<PerformanceReport> {
        self.samples.push(timing);
        if self.samples.len() < self.capacity {
            return None;
        }

        let report = self.summarize();
        self.samples.clear();
        self.windows_emitted += 1;

        log::info!(
            "Pipeline timing over {} frames: avg {:.2} ms (convert {:.2}, encode {:.2}), min {:.2} ms, max {:.2} ms, {:.1} fps",
            report.frames,
            report.avg_total_ms,
            report.avg_conversion_ms,
            report.avg_encode_ms,
            report.min_total_ms,
            report.max_total_ms,
            report.fps
        );
        if report.degraded {
            log::warn!(
                "Pipeline throughput {:.1} fps is below {:.1} fps",
                report.fps,
                self.min_healthy_fps
            );
        }

        Some(report)
    }

    fn summarize(&self) -> PerformanceReport {
        let n = self.samples.len().max(1) as f64;
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;

        let mut conversion = 0.0;
        let mut encode = 0.0;
        let mut total = 0.0;
        let mut min_total = f64::MAX;
        let mut max_total = 0.0f64;
        for sample in &self.samples {
            conversion += ms(sample.conversion);
            encode += ms(sample.encode);
            let t = ms(sample.total);
            total += t;
            min_total = min_total.min(t);
            max_total = max_total.max(t);
        }

        let avg_total_ms = total / n;
        let fps = if avg_total_ms > 0.0 {
            1000.0 / avg_total_ms
        } else {
            f64::INFINITY
        };

        PerformanceReport {
            frames: self.samples.len(),
            avg_conversion_ms: conversion / n,
            avg_encode_ms: encode / n,
            avg_total_ms,
            min_total_ms: if self.samples.is_empty() { 0.0 } else { min_total },
            max_total_ms: max_total,
            fps,
            degraded: fps < self.min_healthy_fps,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW, DEFAULT_MIN_HEALTHY_FPS)
    }
}
