//! Encoder session driving a codec's buffer-exchange protocol

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::codec::{
    CodecBackend, ColorLayout, EncoderCodec, EncoderFormat, EncoderSample, H264Level,
    H264Profile, OutputStatus, RateControl, SampleFlags, SampleSink,
};
use super::config::RecordingConfig;
use crate::errors::RecorderError;
use crate::timing::PTSClock;

/// Longest wait for a free input slot before the frame is dropped
pub const INPUT_SLOT_TIMEOUT: Duration = Duration::from_millis(5);
/// Output wait per poll while finishing the stream
pub const EOS_OUTPUT_TIMEOUT: Duration = Duration::from_millis(10);
/// Consecutive empty polls after which the end-of-stream drain gives up
pub const EOS_MAX_EMPTY_POLLS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Unconfigured,
    Configured,
    Running,
    Draining,
    Closed,
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncoderState::Unconfigured => "unconfigured",
            EncoderState::Configured => "configured",
            EncoderState::Running => "running",
            EncoderState::Draining => "draining",
            EncoderState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Parameters for [`EncoderSession::configure`]
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    /// Required layout; `None` picks the first supported one by preference
    pub layout: Option<ColorLayout>,
}

impl From<&RecordingConfig> for EncoderSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            bitrate: config.bitrate,
            frame_rate: config.frame_rate,
            key_frame_interval_secs: config.key_frame_interval_secs,
            layout: config.preferred_layout,
        }
    }
}

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued { pts_us: u64 },
    /// No input slot freed up within [`INPUT_SLOT_TIMEOUT`]
    Dropped,
}

/// Tally of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Samples the sink accepted
    pub forwarded: u64,
    /// Samples the sink refused
    pub rejected: u64,
    /// Config and zero-length samples released without forwarding
    pub skipped: u64,
    pub format_events: u32,
    /// The end-of-stream sample was observed
    pub end_of_stream: bool,
}

/// Wraps one encoder instance from configuration to release
pub struct EncoderSession {
    backend: Arc<dyn CodecBackend>,
    state: EncoderState,
    format: Option<EncoderFormat>,
    codec: Option<Box<dyn EncoderCodec>>,
    clock: Option<PTSClock>,
    last_pts_us: u64,
    format_delivered: bool,
    frames_queued: u64,
}

impl EncoderSession {
    pub fn new(backend: Arc<dyn CodecBackend>) -> Self {
        Self {
            backend,
            state: EncoderState::Unconfigured,
            format: None,
            codec: None,
            clock: None,
            last_pts_us: 0,
            format_delivered: false,
            frames_queued: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn format(&self) -> Option<&EncoderFormat> {
        self.format.as_ref()
    }

    /// Layout the encoder expects its input in, once configured
    pub fn layout(&self) -> Option<ColorLayout> {
        self.format.as_ref().map(|f| f.layout)
    }

    /// An encoder instance is currently allocated
    pub fn is_allocated(&self) -> bool {
        self.codec.is_some()
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    /// Pick profile, level, rate control and input layout for the session.
    ///
    /// Fails with [`RecorderError::Configuration`] when the dimensions are
    /// unusable or the backend supports no acceptable layout.
    pub fn configure(&mut self, settings: &EncoderSettings) -> Result<&EncoderFormat, RecorderError> {
        if self.state != EncoderState::Unconfigured {
            return Err(RecorderError::InvalidState(format!(
                "configure() called while {}",
                self.state
            )));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(RecorderError::Configuration(format!(
                "invalid dimensions {}x{}",
                settings.width, settings.height
            )));
        }
        if settings.width % 2 != 0 || settings.height % 2 != 0 {
            return Err(RecorderError::Configuration(format!(
                "4:2:0 encoding needs even dimensions, got {}x{}",
                settings.width, settings.height
            )));
        }
        if settings.bitrate == 0 || settings.frame_rate == 0 {
            return Err(RecorderError::Configuration(
                "bitrate and frame rate must be positive".to_string(),
            ));
        }

        let supported = self.backend.color_layouts();
        let layout = match settings.layout {
            Some(wanted) if supported.contains(&wanted) => Some(wanted),
            Some(wanted) => {
                log::warn!(
                    "{} backend does not accept {} input",
                    self.backend.name(),
                    wanted
                );
                None
            }
            None => ColorLayout::PREFERENCE
                .iter()
                .copied()
                .find(|layout| supported.contains(layout)),
        };
        let layout = layout.ok_or_else(|| {
            RecorderError::Configuration(format!(
                "no usable color layout on {} backend (supports {:?})",
                self.backend.name(),
                supported
            ))
        })?;

        let format = EncoderFormat {
            width: settings.width,
            height: settings.height,
            bitrate: settings.bitrate,
            frame_rate: settings.frame_rate,
            key_frame_interval_secs: settings.key_frame_interval_secs.max(1),
            layout,
            profile: H264Profile::Baseline,
            level: H264Level::for_resolution(settings.width, settings.height),
            rate_control: RateControl::ConstantBitrate,
        };
        log::info!(
            "Encoder configured on {}: {}x{} {} {:?} {:?}",
            self.backend.name(),
            format.width,
            format.height,
            format.layout,
            format.profile,
            format.level
        );

        self.state = EncoderState::Configured;
        Ok(self.format.insert(format))
    }

    /// Allocate and start the encoder instance
    pub fn open(&mut self) -> Result<(), RecorderError> {
        if self.state != EncoderState::Configured {
            return Err(RecorderError::InvalidState(format!(
                "open() called while {}",
                self.state
            )));
        }
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| RecorderError::InvalidState("no encoder format".to_string()))?;

        let mut codec = self.backend.create(format)?;
        // On failure the instance is dropped here, which releases it
        codec.start()?;

        self.codec = Some(codec);
        self.clock = Some(PTSClock::new());
        self.last_pts_us = 0;
        self.state = EncoderState::Running;
        Ok(())
    }

    /// Microseconds since the session started running, never decreasing
    pub fn presentation_time_us(&mut self) -> u64 {
        let now = self.clock.map(|clock| clock.pts_us()).unwrap_or(0);
        self.last_pts_us = self.last_pts_us.max(now);
        self.last_pts_us
    }

    /// Copy one frame into a free input slot and queue it for compression.
    ///
    /// A slot that does not free up within [`INPUT_SLOT_TIMEOUT`] drops the
    /// frame; it is never retried.
    pub fn submit_frame(&mut self, buffer: &[u8], pts_us: u64) -> Result<SubmitOutcome, RecorderError> {
        if self.state != EncoderState::Running {
            return Err(RecorderError::InvalidState(format!(
                "submit_frame() called while {}",
                self.state
            )));
        }
        let expected = self.format.as_ref().map(|f| f.input_frame_len()).unwrap_or(0);
        if buffer.len() != expected {
            return Err(RecorderError::Encoding(format!(
                "input frame is {} bytes, encoder expects {}",
                buffer.len(),
                expected
            )));
        }
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("encoder not allocated".to_string()))?;

        let Some(slot) = codec.dequeue_input(INPUT_SLOT_TIMEOUT) else {
            log::debug!(
                "{} within {:?}, dropping frame",
                RecorderError::EncoderBackpressure,
                INPUT_SLOT_TIMEOUT
            );
            return Ok(SubmitOutcome::Dropped);
        };

        let input = codec.input_buffer(slot).ok_or_else(|| {
            RecorderError::Encoding(format!("input slot {} has no buffer", slot))
        })?;
        if input.len() < buffer.len() {
            return Err(RecorderError::Encoding(format!(
                "input slot {} holds {} bytes, frame needs {}",
                slot,
                input.len(),
                buffer.len()
            )));
        }
        input[..buffer.len()].copy_from_slice(buffer);
        codec.queue_input(slot, buffer.len(), pts_us, SampleFlags::NONE)?;

        self.frames_queued += 1;
        Ok(SubmitOutcome::Queued { pts_us })
    }

    /// Forward completed output to `sink`.
    ///
    /// Without `end_of_stream` this polls without waiting until nothing is
    /// ready. With it, an end-of-stream input is queued first and polling
    /// continues until the end-of-stream sample appears or
    /// [`EOS_MAX_EMPTY_POLLS`] polls in a row come back empty.
    pub fn drain(
        &mut self,
        end_of_stream: bool,
        sink: &mut dyn SampleSink,
    ) -> Result<DrainSummary, RecorderError> {
        match self.state {
            EncoderState::Running => {}
            EncoderState::Draining if end_of_stream => {}
            state => {
                return Err(RecorderError::InvalidState(format!(
                    "drain() called while {}",
                    state
                )))
            }
        }

        if end_of_stream && self.state == EncoderState::Running {
            self.state = EncoderState::Draining;
            self.signal_end_of_stream()?;
        }

        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("encoder not allocated".to_string()))?;

        let timeout = if end_of_stream {
            EOS_OUTPUT_TIMEOUT
        } else {
            Duration::ZERO
        };
        let mut summary = DrainSummary::default();
        let mut empty_polls = 0u32;

        loop {
            match codec.dequeue_output(timeout) {
                OutputStatus::TryAgainLater => {
                    if !end_of_stream {
                        break;
                    }
                    empty_polls += 1;
                    if empty_polls >= EOS_MAX_EMPTY_POLLS {
                        log::warn!(
                            "End-of-stream sample not seen after {} empty polls",
                            empty_polls
                        );
                        break;
                    }
                }
                OutputStatus::FormatChanged => {
                    empty_polls = 0;
                    if self.format_delivered {
                        log::warn!("Encoder reported its output format twice, ignoring");
                        break;
                    }
                    let params = codec.output_format().ok_or_else(|| {
                        RecorderError::Encoding("format event without parameters".to_string())
                    })?;
                    self.format_delivered = true;
                    summary.format_events += 1;
                    log::info!(
                        "Encoder output format: {}x{}, SPS {} bytes, PPS {} bytes",
                        params.width,
                        params.height,
                        params.sps.len(),
                        params.pps.len()
                    );
                    if let Err(e) = sink.on_format(&params) {
                        log::error!("Sample sink rejected the output format: {}", e);
                    }
                }
                OutputStatus::Buffer { index, info } => {
                    empty_polls = 0;
                    if info.flags.contains(SampleFlags::CODEC_CONFIG) || info.size == 0 {
                        summary.skipped += 1;
                    } else if let Some(data) = codec.output_buffer(index) {
                        let sample = EncoderSample {
                            data,
                            offset: info.offset,
                            size: info.size,
                            flags: info.flags,
                            pts_us: info.pts_us,
                        };
                        match sink.write_sample(&sample) {
                            Ok(()) => summary.forwarded += 1,
                            Err(RecorderError::MuxerNotReady) => summary.rejected += 1,
                            Err(e) => {
                                log::warn!("Dropping encoded sample at {} us: {}", info.pts_us, e);
                                summary.rejected += 1;
                            }
                        }
                    } else {
                        log::warn!("Output slot {} has no buffer", index);
                        summary.skipped += 1;
                    }
                    codec.release_output(index);

                    if info.flags.contains(SampleFlags::END_OF_STREAM) {
                        summary.end_of_stream = true;
                        break;
                    }
                }
            }
        }

        Ok(summary)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), RecorderError> {
        let pts_us = self.presentation_time_us();
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("encoder not allocated".to_string()))?;
        match codec.dequeue_input(INPUT_SLOT_TIMEOUT) {
            Some(slot) => codec.queue_input(slot, 0, pts_us, SampleFlags::END_OF_STREAM),
            None => {
                log::warn!("No input slot for the end-of-stream marker");
                Ok(())
            }
        }
    }

    /// Stop and release the encoder instance. Safe to call in any state.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        self.state = EncoderState::Closed;
        self.clock = None;
        match self.codec.take() {
            Some(mut codec) => {
                let stopped = codec.stop();
                drop(codec);
                log::debug!("Encoder released after {} frames", self.frames_queued);
                stopped
            }
            None => Ok(()),
        }
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if self.codec.is_some() {
            if let Err(e) = self.close() {
                log::error!("Failed to stop encoder on drop: {}", e);
            }
        }
    }
}
