//! Recording configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::codec::ColorLayout;

/// Default target bitrate (2 Mbps)
pub const DEFAULT_BITRATE: u32 = 2_000_000;
/// Frame rate the encoder is configured for. Timestamps still follow the
/// actual submission cadence.
pub const DEFAULT_FRAME_RATE: u32 = 30;
/// Seconds between forced key frames
pub const DEFAULT_KEY_FRAME_INTERVAL_SECS: u32 = 2;
/// Frames per performance window
pub const DEFAULT_STATS_WINDOW: usize = 30;
/// Below this throughput the monitor flags degradation
pub const DEFAULT_MIN_HEALTHY_FPS: f64 = 15.0;

/// Configuration for one recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Frame width in pixels, fixed for the session
    pub width: u32,
    /// Frame height in pixels, fixed for the session
    pub height: u32,
    /// Destination MP4 path. An existing file here is deleted on start.
    pub output_path: PathBuf,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frame rate handed to the encoder and the container
    pub frame_rate: u32,
    /// Seconds between key frames
    pub key_frame_interval_secs: u32,
    /// Write moov before mdat
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
    /// Directory receiving the first few undecodable compressed frames
    pub debug_dump_dir: Option<PathBuf>,
    /// Frames aggregated per performance report
    pub stats_window: usize,
    /// Throughput below which a degradation warning is logged
    pub min_healthy_fps: f64,
    /// Restrict the encoder to one input layout instead of picking by preference
    pub preferred_layout: Option<ColorLayout>,
}

impl RecordingConfig {
    pub fn new(width: u32, height: u32, output_path: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            output_path: output_path.into(),
            bitrate: DEFAULT_BITRATE,
            frame_rate: DEFAULT_FRAME_RATE,
            key_frame_interval_secs: DEFAULT_KEY_FRAME_INTERVAL_SECS,
            fast_start: true,
            title: None,
            debug_dump_dir: None,
            stats_window: DEFAULT_STATS_WINDOW,
            min_healthy_fps: DEFAULT_MIN_HEALTHY_FPS,
            preferred_layout: None,
        }
    }

    /// Set the title metadata
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set fast-start mode
    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }

    /// Set custom bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_key_frame_interval(mut self, secs: u32) -> Self {
        self.key_frame_interval_secs = secs;
        self
    }

    pub fn with_debug_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dump_dir = Some(dir.into());
        self
    }

    pub fn with_stats_window(mut self, frames: usize) -> Self {
        self.stats_window = frames;
        self
    }

    pub fn with_layout(mut self, layout: ColorLayout) -> Self {
        self.preferred_layout = Some(layout);
        self
    }
}

/// Statistics returned by the first effective `stop()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Frame and sample counters at the time of stop
    pub counters: RecorderCounters,
    /// Container duration in seconds (0 when nothing was written)
    pub duration_secs: f64,
    /// Total bytes written to the container
    pub bytes_written: u64,
    /// Wall-clock seconds between start and stop
    pub elapsed_secs: f64,
    /// Output file path
    pub output_path: String,
    /// Whether a finalized container exists at `output_path`
    pub container_written: bool,
    /// Session start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RecordingStats {
    /// Calculate the average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.bytes_written as f64 * 8.0) / self.duration_secs
        } else {
            0.0
        }
    }

    /// Frames that never reached the encoder
    pub fn dropped_frames(&self) -> u64 {
        self.counters.dropped_total()
    }
}

/// Per-session frame and sample counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderCounters {
    pub frames_received: u64,
    pub frames_submitted: u64,
    pub dropped_unrecognized: u64,
    pub dropped_decode: u64,
    pub dropped_backpressure: u64,
    /// Frames whose explicit format tag disagreed with their length
    pub dropped_mismatch: u64,
    pub samples_written: u64,
    pub samples_dropped_not_ready: u64,
}

impl RecorderCounters {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_unrecognized
            + self.dropped_decode
            + self.dropped_backpressure
            + self.dropped_mismatch
    }
}
