//! CrabRecord: raw camera frames to H.264 MP4
//!
//! This crate takes capture frames of unpredictable pixel layout, works out
//! what they are, converts them to the 4:2:0 layout an H.264 encoder wants,
//! drives the encoder's slot protocol and muxes the result into an MP4.
//!
//! # Features
//! - Format detection for NV12, YUYV, I422 and MJPEG frames
//! - Zero-copy NV12 passthrough, scratch-buffer conversion otherwise
//! - Pluggable codec backend, openh264 by default
//! - MP4 muxing with muxide, fast-start enabled
//! - Per-session drop counters and rolling timing reports
//!
//! # Usage
//! ```rust,ignore
//! use crabrecord::Recorder;
//!
//! crabrecord::init_logging();
//! let recorder = Recorder::new(640, 480, "capture.mp4");
//! if recorder.start() {
//!     for frame in camera_frames {
//!         recorder.write_frame(&frame);
//!     }
//!     if let Some(stats) = recorder.stop() {
//!         println!("{} samples written", stats.counters.samples_written);
//!     }
//! }
//! ```
pub mod config;
pub mod errors;
pub mod recording;
pub mod timing;

// Testing utilities - synthetic frames and an in-memory codec
pub mod testing;

// Re-exports for convenience
pub use config::CrabRecordConfig;
pub use errors::RecorderError;
use recording::CodecBackend;
pub use recording::{
    FormatTag, Recorder, RecorderCounters, RecorderState, RecordingConfig, RecordingStats,
    ResourceProbe,
};

/// Initialize logging for the recorder
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabrecord=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        default_backend: CodecBackend::name(&recording::OpenH264Backend::new()).to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub default_backend: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabrecord");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.default_backend, "openh264");
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }
}
