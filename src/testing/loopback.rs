//! In-memory codec backend for exercising the session protocol offline
//!
//! Each queued input comes back as one Annex B access unit in the same slot,
//! preceded by a single format event. The first access unit carries the fake
//! parameter sets ahead of an IDR slice whose body is the raw input. Input
//! slots stay busy until their output is released, so undrained output shows
//! up as backpressure. Live instances are counted for leak checks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::RecorderError;
use crate::recording::codec::{
    CodecBackend, CodecParameters, ColorLayout, EncoderCodec, EncoderFormat, OutputStatus,
    SampleFlags, SampleInfo,
};

/// Fake SPS/PPS reported by the loopback codec
pub const LOOPBACK_SPS: [u8; 4] = [0x67, 0x42, 0xC0, 0x1F];
pub const LOOPBACK_PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const NAL_IDR: u8 = 0x65;
const NAL_NON_IDR: u8 = 0x41;

#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    layouts: Vec<ColorLayout>,
    input_slots: usize,
    fail_create: bool,
    repeat_format: bool,
    emit_end_of_stream: bool,
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self {
            layouts: vec![ColorLayout::SemiPlanar, ColorLayout::Planar],
            input_slots: 4,
            fail_create: false,
            repeat_format: false,
            emit_end_of_stream: true,
            live: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_layouts(mut self, layouts: Vec<ColorLayout>) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn with_input_slots(mut self, slots: usize) -> Self {
        self.input_slots = slots;
        self
    }

    /// Every `create()` fails
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Emit a format event before every sample, not just the first
    pub fn repeating_format(mut self) -> Self {
        self.repeat_format = true;
        self
    }

    /// Swallow end-of-stream inputs instead of echoing the marker back
    pub fn without_end_of_stream(mut self) -> Self {
        self.emit_end_of_stream = false;
        self
    }

    /// Encoder instances currently allocated
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created_instances(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn color_layouts(&self) -> Vec<ColorLayout> {
        self.layouts.clone()
    }

    fn create(&self, format: &EncoderFormat) -> Result<Box<dyn EncoderCodec>, RecorderError> {
        if self.fail_create {
            return Err(RecorderError::Configuration(
                "loopback backend refused to create an encoder".to_string(),
            ));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);

        let len = format.input_frame_len();
        Ok(Box::new(LoopbackCodec {
            width: format.width,
            height: format.height,
            inputs: (0..self.input_slots).map(|_| vec![0u8; len]).collect(),
            outputs: vec![Vec::new(); self.input_slots],
            busy: vec![false; self.input_slots],
            infos: vec![SampleInfo::default(); self.input_slots],
            pending: VecDeque::new(),
            format_sent: false,
            repeat_format: self.repeat_format,
            emit_end_of_stream: self.emit_end_of_stream,
            started: false,
            samples: 0,
            live: Arc::clone(&self.live),
        }))
    }
}

struct LoopbackCodec {
    width: u32,
    height: u32,
    inputs: Vec<Vec<u8>>,
    outputs: Vec<Vec<u8>>,
    busy: Vec<bool>,
    infos: Vec<SampleInfo>,
    pending: VecDeque<Option<usize>>,
    format_sent: bool,
    repeat_format: bool,
    emit_end_of_stream: bool,
    started: bool,
    samples: u64,
    live: Arc<AtomicUsize>,
}

impl EncoderCodec for LoopbackCodec {
    fn start(&mut self) -> Result<(), RecorderError> {
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Option<usize> {
        if !self.started {
            return None;
        }
        let index = self.busy.iter().position(|busy| !busy)?;
        self.busy[index] = true;
        Some(index)
    }

    fn input_buffer(&mut self, index: usize) -> Option<&mut [u8]> {
        self.inputs.get_mut(index).map(|buf| buf.as_mut_slice())
    }

    fn queue_input(
        &mut self,
        index: usize,
        len: usize,
        pts_us: u64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError> {
        if !self.busy.get(index).copied().unwrap_or(false) {
            return Err(RecorderError::InvalidState(format!(
                "input slot {} was not dequeued",
                index
            )));
        }

        let end_of_stream = flags.contains(SampleFlags::END_OF_STREAM);
        if end_of_stream && !self.emit_end_of_stream {
            self.busy[index] = false;
            return Ok(());
        }
        let mut out_flags = if end_of_stream {
            SampleFlags::END_OF_STREAM
        } else {
            SampleFlags::NONE
        };
        let output = &mut self.outputs[index];
        output.clear();
        if !end_of_stream {
            if !self.format_sent || self.repeat_format {
                self.pending.push_back(None);
                self.format_sent = true;
            }
            if self.samples == 0 {
                out_flags |= SampleFlags::KEY_FRAME;
                for nal in [&LOOPBACK_SPS[..], &LOOPBACK_PPS[..]] {
                    output.extend_from_slice(&START_CODE);
                    output.extend_from_slice(nal);
                }
                output.extend_from_slice(&START_CODE);
                output.push(NAL_IDR);
            } else {
                output.extend_from_slice(&START_CODE);
                output.push(NAL_NON_IDR);
            }
            let body = &self.inputs[index][..len.min(self.inputs[index].len())];
            output.extend_from_slice(body);
            self.samples += 1;
        }

        self.infos[index] = SampleInfo {
            offset: 0,
            size: output.len(),
            pts_us,
            flags: out_flags,
        };
        self.pending.push_back(Some(index));
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> OutputStatus {
        match self.pending.pop_front() {
            Some(None) => OutputStatus::FormatChanged,
            Some(Some(index)) => OutputStatus::Buffer {
                index,
                info: self.infos[index],
            },
            None => OutputStatus::TryAgainLater,
        }
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.outputs.get(index).map(|buf| buf.as_slice())
    }

    fn output_format(&self) -> Option<CodecParameters> {
        self.format_sent.then(|| CodecParameters {
            width: self.width,
            height: self.height,
            sps: LOOPBACK_SPS.to_vec(),
            pps: LOOPBACK_PPS.to_vec(),
        })
    }

    fn release_output(&mut self, index: usize) {
        if let Some(busy) = self.busy.get_mut(index) {
            *busy = false;
        }
    }

    fn stop(&mut self) -> Result<(), RecorderError> {
        self.started = false;
        self.pending.clear();
        Ok(())
    }
}

impl Drop for LoopbackCodec {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
