//! Codec seam: the buffer-exchange protocol a video encoder exposes
//!
//! An encoder hands out numbered input slots, accepts them back filled with a
//! raw frame, and later offers numbered output slots holding compressed
//! samples. The first output is a format-negotiation event carrying the final
//! codec parameters. [`super::encoder::EncoderSession`] drives this protocol;
//! [`super::software::OpenH264Backend`] is the default implementation.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RecorderError;

/// 4:2:0 input layouts an encoder can be fed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorLayout {
    /// Luma plane followed by interleaved UV (NV12)
    SemiPlanar,
    /// Luma, U, V as separate planes (I420)
    Planar,
}

impl ColorLayout {
    /// Selection order when a codec supports several layouts
    pub const PREFERENCE: [ColorLayout; 2] = [ColorLayout::SemiPlanar, ColorLayout::Planar];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorLayout::SemiPlanar => "NV12",
            ColorLayout::Planar => "I420",
        }
    }
}

impl fmt::Display for ColorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Profile {
    Baseline,
}

/// H.264 levels the encoder session may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum H264Level {
    Level31,
    Level40,
    Level51,
}

impl H264Level {
    /// Smallest supported level whose frame-size limit covers the resolution
    pub fn for_resolution(width: u32, height: u32) -> Self {
        let macroblocks = width.div_ceil(16) as u64 * height.div_ceil(16) as u64;
        if macroblocks <= 3_600 {
            H264Level::Level31
        } else if macroblocks <= 8_192 {
            H264Level::Level40
        } else {
            H264Level::Level51
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    ConstantBitrate,
}

/// Everything a backend needs to allocate an encoder instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderFormat {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub layout: ColorLayout,
    pub profile: H264Profile,
    pub level: H264Level,
    pub rate_control: RateControl,
}

impl EncoderFormat {
    /// Size of one raw input frame in the configured layout
    pub fn input_frame_len(&self) -> usize {
        (self.width as usize * self.height as usize * 3) / 2
    }
}

/// Final bitstream parameters reported by the format-negotiation event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    pub width: u32,
    pub height: u32,
    /// Sequence parameter set, without start code
    pub sps: Vec<u8>,
    /// Picture parameter set, without start code
    pub pps: Vec<u8>,
}

/// Flags attached to input and output slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(1 << 1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: SampleFlags) {
        self.0 |= rhs.0;
    }
}

/// Placement and metadata of a filled output slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleInfo {
    pub offset: usize,
    pub size: usize,
    pub pts_us: u64,
    pub flags: SampleFlags,
}

/// Result of polling for output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing ready within the wait
    TryAgainLater,
    /// Codec parameters are final; read them with `output_format()`
    FormatChanged,
    /// Output slot `index` holds a sample described by `info`
    Buffer { index: usize, info: SampleInfo },
}

/// A compressed sample borrowed from an output slot
#[derive(Debug, Clone, Copy)]
pub struct EncoderSample<'a> {
    /// Whole slot contents; the payload is `data[offset..offset + size]`
    pub data: &'a [u8],
    pub offset: usize,
    pub size: usize,
    pub flags: SampleFlags,
    pub pts_us: u64,
}

impl<'a> EncoderSample<'a> {
    pub fn payload(&self) -> &'a [u8] {
        let end = (self.offset + self.size).min(self.data.len());
        &self.data[self.offset.min(end)..end]
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(SampleFlags::KEY_FRAME)
    }
}

/// Factory and capability query for encoder instances
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Input layouts this backend can be configured for
    fn color_layouts(&self) -> Vec<ColorLayout>;

    /// Allocate and configure an encoder instance
    fn create(&self, format: &EncoderFormat) -> Result<Box<dyn EncoderCodec>, RecorderError>;
}

/// One allocated encoder instance. Dropping it releases it.
pub trait EncoderCodec: Send {
    fn start(&mut self) -> Result<(), RecorderError>;

    /// Claim a free input slot, waiting at most `timeout`
    fn dequeue_input(&mut self, timeout: Duration) -> Option<usize>;

    /// Writable view of a claimed input slot
    fn input_buffer(&mut self, index: usize) -> Option<&mut [u8]>;

    /// Hand a filled input slot back for compression
    fn queue_input(
        &mut self,
        index: usize,
        len: usize,
        pts_us: u64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError>;

    /// Poll for a completed output, waiting at most `timeout`
    fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus;

    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    fn output_format(&self) -> Option<CodecParameters>;

    fn release_output(&mut self, index: usize);

    fn stop(&mut self) -> Result<(), RecorderError>;
}

/// Receiver of the encoder's output: the format event once, then samples
pub trait SampleSink {
    fn on_format(&mut self, params: &CodecParameters) -> Result<(), RecorderError>;

    fn write_sample(&mut self, sample: &EncoderSample<'_>) -> Result<(), RecorderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_resolution() {
        assert_eq!(H264Level::for_resolution(720, 576), H264Level::Level31);
        assert_eq!(H264Level::for_resolution(1280, 720), H264Level::Level31);
        assert_eq!(H264Level::for_resolution(1920, 1080), H264Level::Level40);
        assert_eq!(H264Level::for_resolution(3840, 2160), H264Level::Level51);
    }

    #[test]
    fn test_sample_flags() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(flags.contains(SampleFlags::END_OF_STREAM));
        assert!(!flags.contains(SampleFlags::CODEC_CONFIG));
        assert!(!flags.contains(SampleFlags::NONE));
    }

    #[test]
    fn test_payload_respects_range() {
        let bytes = [0u8, 1, 2, 3, 4, 5];
        let sample = EncoderSample {
            data: &bytes,
            offset: 2,
            size: 3,
            flags: SampleFlags::NONE,
            pts_us: 0,
        };
        assert_eq!(sample.payload(), &[2, 3, 4]);

        let clipped = EncoderSample { size: 100, ..sample };
        assert_eq!(clipped.payload(), &[2, 3, 4, 5]);
    }
}
