//! Video recording pipeline for CrabRecord
//!
//! Raw capture frames go through:
//! - format classification by length and content ([`format`])
//! - conversion into the encoder's 4:2:0 layout ([`convert`])
//! - H.264 compression behind the [`codec`] seam (openh264 by default)
//! - MP4 muxing with muxide, once the encoder has reported its parameters
//!
//! # Example
//! ```rust,ignore
//! use crabrecord::recording::Recorder;
//!
//! let recorder = Recorder::new(1280, 720, "output.mp4");
//! if recorder.start() {
//!     // In your frame capture loop:
//!     recorder.write_frame(&frame_bytes);
//!
//!     // When done:
//!     let stats = recorder.stop();
//! }
//! ```

pub mod codec;
mod config;
pub mod convert;
pub mod encoder;
pub mod format;
pub mod monitor;
pub mod muxer;
mod recorder;
pub mod software;

pub use codec::{CodecBackend, ColorLayout, EncoderCodec, EncoderSample, SampleFlags, SampleSink};
pub use config::{
    RecorderCounters, RecordingConfig, RecordingStats, DEFAULT_BITRATE, DEFAULT_FRAME_RATE,
    DEFAULT_KEY_FRAME_INTERVAL_SECS, DEFAULT_MIN_HEALTHY_FPS, DEFAULT_STATS_WINDOW,
};
pub use convert::{ConversionScratch, FrameConverter};
pub use encoder::{EncoderSession, EncoderSettings, EncoderState};
pub use format::{classify, classify_with_hint, FormatTag, FrameGeometry};
pub use monitor::{FrameTiming, PerformanceMonitor, PerformanceReport};
pub use muxer::{MuxerSession, MuxerSummary};
pub use recorder::{Recorder, RecorderState, ResourceProbe, MAX_DECODE_DUMPS};
pub use software::OpenH264Backend;

#[cfg(test)]
mod tests;
