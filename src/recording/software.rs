//! Software H.264 backend using openh264
//!
//! openh264 compresses synchronously, so this backend performs the work when
//! an input slot is queued and parks the result in an output slot until the
//! session drains it. Input slots are only handed out while there is room for
//! the result, which is how a caller that stops draining sees backpressure.

use std::collections::VecDeque;
use std::time::Duration;

use openh264::encoder::{
    BitRate, Complexity, Encoder, EncoderConfig, FrameRate, FrameType, IntraFramePeriod, Level,
    Profile, RateControlMode, UsageType,
};
use openh264::formats::YUVSlices;
use openh264::{nal_units, OpenH264API};

use super::codec::{
    CodecBackend, CodecParameters, ColorLayout, EncoderCodec, EncoderFormat, H264Level,
    OutputStatus, SampleFlags, SampleInfo,
};
use crate::errors::RecorderError;

pub const INPUT_SLOTS: usize = 4;
pub const OUTPUT_SLOTS: usize = 8;

// The first access unit yields a config sample and a frame sample.
const OUTPUTS_PER_INPUT: usize = 2;

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Backend creating openh264 encoder instances
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenH264Backend;

impl OpenH264Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CodecBackend for OpenH264Backend {
    fn name(&self) -> &str {
        "openh264"
    }

    fn color_layouts(&self) -> Vec<ColorLayout> {
        vec![ColorLayout::SemiPlanar, ColorLayout::Planar]
    }

    /// Configure an openh264 encoder for `format`.
    ///
    /// Frame skipping stays off, so every queued frame comes back as a sample.
    /// openh264 only holds a bitrate by skipping frames; with skipping off the
    /// configured bitrate is a target and complex scenes overshoot it (the
    /// library logs a warning about this at creation).
    fn create(&self, format: &EncoderFormat) -> Result<Box<dyn EncoderCodec>, RecorderError> {
        if format.width == 0 || format.height == 0 || format.width % 2 != 0 || format.height % 2 != 0
        {
            return Err(RecorderError::Configuration(format!(
                "openh264 needs even, non-zero dimensions, got {}x{}",
                format.width, format.height
            )));
        }

        let key_frame_period = format.frame_rate.max(1) * format.key_frame_interval_secs.max(1);
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(format.bitrate))
            .max_frame_rate(FrameRate::from_hz(format.frame_rate as f32))
            .rate_control_mode(RateControlMode::Bitrate)
            .usage_type(UsageType::CameraVideoRealTime)
            .profile(Profile::Baseline)
            .level(map_level(format.level))
            .complexity(Complexity::Low)
            .intra_frame_period(IntraFramePeriod::from_num_frames(key_frame_period))
            .skip_frames(false);

        let api = OpenH264API::from_source();
        let encoder = Encoder::with_api_config(api, config).map_err(|e| {
            RecorderError::Configuration(format!("Failed to create encoder: {}", e))
        })?;

        log::info!(
            "openh264 encoder created: {}x{} {} {} bps @ {} fps, key frame every {} frames",
            format.width,
            format.height,
            format.layout,
            format.bitrate,
            format.frame_rate,
            key_frame_period
        );

        Ok(Box::new(OpenH264Codec::new(encoder, format.clone())))
    }
}

fn map_level(level: H264Level) -> Level {
    match level {
        H264Level::Level31 => Level::Level_3_1,
        H264Level::Level40 => Level::Level_4_0,
        H264Level::Level51 => Level::Level_5_1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    FormatChanged,
    Buffer(usize),
}

#[derive(Default)]
struct OutputSlot {
    data: Vec<u8>,
    info: SampleInfo,
    in_use: bool,
}

/// One openh264 encoder with its slot pools
pub struct OpenH264Codec {
    encoder: Encoder,
    format: EncoderFormat,
    inputs: Vec<Vec<u8>>,
    claimed: Vec<bool>,
    free_inputs: Vec<usize>,
    outputs: Vec<OutputSlot>,
    pending: VecDeque<Pending>,
    // Deinterleaved U then V for semi-planar input
    staging: Vec<u8>,
    params: Option<CodecParameters>,
    started: bool,
    eos_queued: bool,
}

impl OpenH264Codec {
    fn new(encoder: Encoder, format: EncoderFormat) -> Self {
        let frame_len = format.input_frame_len();
        let chroma_len = (format.width as usize / 2) * (format.height as usize / 2);
        let staging = match format.layout {
            ColorLayout::SemiPlanar => vec![0u8; chroma_len * 2],
            ColorLayout::Planar => Vec::new(),
        };

        Self {
            encoder,
            inputs: (0..INPUT_SLOTS).map(|_| vec![0u8; frame_len]).collect(),
            claimed: vec![false; INPUT_SLOTS],
            free_inputs: (0..INPUT_SLOTS).rev().collect(),
            outputs: (0..OUTPUT_SLOTS).map(|_| OutputSlot::default()).collect(),
            pending: VecDeque::with_capacity(OUTPUT_SLOTS + 1),
            staging,
            params: None,
            started: false,
            eos_queued: false,
            format,
        }
    }

    fn free_output_count(&self) -> usize {
        self.outputs.iter().filter(|slot| !slot.in_use).count()
    }

    fn push_output(&mut self, bytes: &[u8], pts_us: u64, flags: SampleFlags) -> Result<(), RecorderError> {
        let index = self
            .outputs
            .iter()
            .position(|slot| !slot.in_use)
            .ok_or_else(|| RecorderError::Encoding("output slots exhausted".to_string()))?;

        let slot = &mut self.outputs[index];
        slot.data.clear();
        slot.data.extend_from_slice(bytes);
        slot.info = SampleInfo {
            offset: 0,
            size: bytes.len(),
            pts_us,
            flags,
        };
        slot.in_use = true;
        self.pending.push_back(Pending::Buffer(index));
        Ok(())
    }

    fn encode_slot(&mut self, index: usize, pts_us: u64) -> Result<(), RecorderError> {
        let w = self.format.width as usize;
        let h = self.format.height as usize;
        let y_size = w * h;
        let chroma = (w / 2) * (h / 2);
        let input = &self.inputs[index];

        let yuv = match self.format.layout {
            ColorLayout::Planar => YUVSlices::new(
                (
                    &input[..y_size],
                    &input[y_size..y_size + chroma],
                    &input[y_size + chroma..y_size + 2 * chroma],
                ),
                (w, h),
                (w, w / 2, w / 2),
            ),
            ColorLayout::SemiPlanar => {
                let (u, v) = self.staging.split_at_mut(chroma);
                let uv = &input[y_size..y_size + 2 * chroma];
                for (k, pair) in uv.chunks_exact(2).enumerate() {
                    u[k] = pair[0];
                    v[k] = pair[1];
                }
                YUVSlices::new((&input[..y_size], &*u, &*v), (w, h), (w, w / 2, w / 2))
            }
        };

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| RecorderError::Encoding(format!("Encoding failed: {}", e)))?;

        let frame_type = bitstream.frame_type();
        if matches!(frame_type, FrameType::Skip | FrameType::Invalid) {
            log::debug!("Encoder skipped frame at pts={}", pts_us);
            return Ok(());
        }
        let data = bitstream.to_vec();
        if data.is_empty() {
            return Ok(());
        }

        let mut flags = SampleFlags::NONE;
        if matches!(frame_type, FrameType::IDR | FrameType::I) {
            flags |= SampleFlags::KEY_FRAME;
        }

        if self.params.is_none() {
            if let Some(params) = parameter_sets(&data, self.format.width, self.format.height) {
                let mut config = Vec::with_capacity(params.sps.len() + params.pps.len() + 8);
                config.extend_from_slice(&START_CODE);
                config.extend_from_slice(&params.sps);
                config.extend_from_slice(&START_CODE);
                config.extend_from_slice(&params.pps);

                self.params = Some(params);
                self.pending.push_back(Pending::FormatChanged);
                self.push_output(&config, pts_us, SampleFlags::CODEC_CONFIG)?;
            }
        }

        self.push_output(&data, pts_us, flags)
    }
}

impl EncoderCodec for OpenH264Codec {
    fn start(&mut self) -> Result<(), RecorderError> {
        self.started = true;
        Ok(())
    }

    // Work completes inside queue_input, so nothing can free a slot while we
    // wait. An empty pool is reported immediately.
    fn dequeue_input(&mut self, _timeout: Duration) -> Option<usize> {
        if !self.started || self.eos_queued || self.free_output_count() < OUTPUTS_PER_INPUT {
            return None;
        }
        let index = self.free_inputs.pop()?;
        self.claimed[index] = true;
        Some(index)
    }

    fn input_buffer(&mut self, index: usize) -> Option<&mut [u8]> {
        if !*self.claimed.get(index)? {
            return None;
        }
        self.inputs.get_mut(index).map(|buf| buf.as_mut_slice())
    }

    fn queue_input(
        &mut self,
        index: usize,
        len: usize,
        pts_us: u64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError> {
        if !self.claimed.get(index).copied().unwrap_or(false) {
            return Err(RecorderError::InvalidState(format!(
                "input slot {} was not dequeued",
                index
            )));
        }

        let result = if flags.contains(SampleFlags::END_OF_STREAM) {
            self.eos_queued = true;
            self.push_output(&[], pts_us, SampleFlags::END_OF_STREAM)
        } else if len != self.format.input_frame_len() {
            Err(RecorderError::Encoding(format!(
                "Invalid frame size: expected {} bytes, got {}",
                self.format.input_frame_len(),
                len
            )))
        } else {
            self.encode_slot(index, pts_us)
        };

        self.claimed[index] = false;
        self.free_inputs.push(index);
        result
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> OutputStatus {
        match self.pending.pop_front() {
            Some(Pending::FormatChanged) => OutputStatus::FormatChanged,
            Some(Pending::Buffer(index)) => OutputStatus::Buffer {
                index,
                info: self.outputs[index].info,
            },
            None => OutputStatus::TryAgainLater,
        }
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.outputs
            .get(index)
            .filter(|slot| slot.in_use)
            .map(|slot| slot.data.as_slice())
    }

    fn output_format(&self) -> Option<CodecParameters> {
        self.params.clone()
    }

    fn release_output(&mut self, index: usize) {
        if let Some(slot) = self.outputs.get_mut(index) {
            slot.in_use = false;
        }
    }

    fn stop(&mut self) -> Result<(), RecorderError> {
        self.started = false;
        self.pending.clear();
        for slot in &mut self.outputs {
            slot.in_use = false;
        }
        Ok(())
    }
}

fn strip_start_code(nal: &[u8]) -> &[u8] {
    let zeros = nal.iter().take_while(|&&b| b == 0).count();
    if zeros >= 2 && nal.get(zeros) == Some(&1) {
        &nal[zeros + 1..]
    } else {
        nal
    }
}

/// Pull SPS and PPS out of an Annex B access unit
pub fn parameter_sets(annex_b: &[u8], width: u32, height: u32) -> Option<CodecParameters> {
    let mut sps = None;
    let mut pps = None;

    for nal in nal_units(annex_b) {
        let payload = strip_start_code(nal);
        match payload.first().map(|b| b & 0x1F) {
            Some(NAL_SPS) if sps.is_none() => sps = Some(payload.to_vec()),
            Some(NAL_PPS) if pps.is_none() => pps = Some(payload.to_vec()),
            _ => {}
        }
    }

    Some(CodecParameters {
        width,
        height,
        sps: sps?,
        pps: pps?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::codec::{H264Profile, RateControl};

    fn format(layout: ColorLayout) -> EncoderFormat {
        EncoderFormat {
            width: 64,
            height: 48,
            bitrate: 500_000,
            frame_rate: 30,
            key_frame_interval_secs: 2,
            layout,
            profile: H264Profile::Baseline,
            level: H264Level::Level31,
            rate_control: RateControl::ConstantBitrate,
        }
    }

    fn gray_frame(len: usize) -> Vec<u8> {
        vec![128u8; len]
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let mut f = format(ColorLayout::Planar);
        f.width = 65;
        assert!(matches!(
            OpenH264Backend::new().create(&f),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_first_output_is_format_then_config_then_key_frame() {
        let f = format(ColorLayout::SemiPlanar);
        let mut codec = OpenH264Backend::new().create(&f).unwrap();
        codec.start().unwrap();

        let slot = codec.dequeue_input(Duration::from_millis(5)).unwrap();
        let len = f.input_frame_len();
        codec.input_buffer(slot).unwrap().copy_from_slice(&gray_frame(len));
        codec.queue_input(slot, len, 0, SampleFlags::NONE).unwrap();

        assert_eq!(codec.dequeue_output(Duration::ZERO), OutputStatus::FormatChanged);
        let params = codec.output_format().unwrap();
        assert_eq!(params.sps[0] & 0x1F, NAL_SPS);
        assert_eq!(params.pps[0] & 0x1F, NAL_PPS);

        match codec.dequeue_output(Duration::ZERO) {
            OutputStatus::Buffer { index, info } => {
                assert!(info.flags.contains(SampleFlags::CODEC_CONFIG));
                codec.release_output(index);
            }
            other => panic!("expected config buffer, got {:?}", other),
        }
        match codec.dequeue_output(Duration::ZERO) {
            OutputStatus::Buffer { index, info } => {
                assert!(info.flags.contains(SampleFlags::KEY_FRAME));
                assert!(info.size > 0);
                let bytes = codec.output_buffer(index).unwrap();
                assert!(bytes.starts_with(&[0, 0, 0, 1]) || bytes.starts_with(&[0, 0, 1]));
                codec.release_output(index);
            }
            other => panic!("expected frame buffer, got {:?}", other),
        }
        assert_eq!(codec.dequeue_output(Duration::ZERO), OutputStatus::TryAgainLater);
    }

    #[test]
    fn test_undrained_outputs_exhaust_input_slots() {
        let f = format(ColorLayout::Planar);
        let mut codec = OpenH264Backend::new().create(&f).unwrap();
        codec.start().unwrap();
        let len = f.input_frame_len();

        let mut accepted = 0;
        for _ in 0..(OUTPUT_SLOTS * 2) {
            match codec.dequeue_input(Duration::from_millis(5)) {
                Some(slot) => {
                    codec.input_buffer(slot).unwrap().fill(100);
                    codec.queue_input(slot, len, accepted * 33_000, SampleFlags::NONE).unwrap();
                    accepted += 1;
                }
                None => break,
            }
        }
        assert!(accepted < (OUTPUT_SLOTS * 2) as u64);
        assert!(codec.dequeue_input(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_low_bitrate_never_skips_frames() {
        let mut f = format(ColorLayout::Planar);
        f.bitrate = 10_000;
        let mut codec = OpenH264Backend::new().create(&f).unwrap();
        codec.start().unwrap();
        let len = f.input_frame_len();

        let mut encoded = 0;
        for i in 0..30u64 {
            let slot = codec.dequeue_input(Duration::from_millis(5)).unwrap();
            let noise: Vec<u8> = (0..len)
                .map(|k| ((k as u64).wrapping_mul(2_654_435_761).wrapping_add(i * 97) >> 7) as u8)
                .collect();
            codec.input_buffer(slot).unwrap().copy_from_slice(&noise);
            codec.queue_input(slot, len, i * 33_000, SampleFlags::NONE).unwrap();

            loop {
                match codec.dequeue_output(Duration::ZERO) {
                    OutputStatus::TryAgainLater => break,
                    OutputStatus::FormatChanged => {}
                    OutputStatus::Buffer { index, info } => {
                        if !info.flags.contains(SampleFlags::CODEC_CONFIG) && info.size > 0 {
                            encoded += 1;
                        }
                        codec.release_output(index);
                    }
                }
            }
        }
        assert_eq!(encoded, 30);
    }

    #[test]
    fn test_end_of_stream_sample() {
        let f = format(ColorLayout::Planar);
        let mut codec = OpenH264Backend::new().create(&f).unwrap();
        codec.start().unwrap();

        let slot = codec.dequeue_input(Duration::from_millis(5)).unwrap();
        codec.queue_input(slot, 0, 0, SampleFlags::END_OF_STREAM).unwrap();
        match codec.dequeue_output(Duration::ZERO) {
            OutputStatus::Buffer { info, .. } => {
                assert!(info.flags.contains(SampleFlags::END_OF_STREAM));
                assert_eq!(info.size, 0);
            }
            other => panic!("expected EOS buffer, got {:?}", other),
        }
        // No more input after end of stream
        assert!(codec.dequeue_input(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_queue_unclaimed_slot_rejected() {
        let f = format(ColorLayout::Planar);
        let mut codec = OpenH264Backend::new().create(&f).unwrap();
        codec.start().unwrap();
        assert!(codec.queue_input(0, 0, 0, SampleFlags::NONE).is_err());
    }

    #[test]
    fn test_strip_start_code() {
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x67, 1]), &[0x67, 1]);
        assert_eq!(strip_start_code(&[0, 0, 1, 0x68]), &[0x68]);
        assert_eq!(strip_start_code(&[0x65, 0]), &[0x65, 0]);
    }
}
