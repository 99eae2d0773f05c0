//! MP4 muxer session using muxide
//!
//! The track can only be registered once the encoder has reported its final
//! parameters, so the writer (and the output file) comes into existence at the
//! format event. Samples that arrive earlier are dropped, not buffered.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::codec::{CodecParameters, EncoderSample, SampleSink};
use super::config::RecordingConfig;
use crate::errors::RecorderError;

/// Result of finalizing a muxer session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MuxerSummary {
    pub samples_written: u64,
    pub samples_dropped: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
    /// A finalized container exists at the output path
    pub container_written: bool,
}

pub struct MuxerSession {
    output_path: PathBuf,
    width: u32,
    height: u32,
    frame_rate: u32,
    fast_start: bool,
    title: Option<String>,
    muxer: Option<Muxer<BufWriter<File>>>,
    params: Option<CodecParameters>,
    samples_written: u64,
    samples_dropped: u64,
    not_ready_warned: bool,
    last_pts_us: Option<u64>,
}

impl MuxerSession {
    /// Prepare a session for `config`. Nothing is created on disk yet.
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            output_path: config.output_path.clone(),
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
            fast_start: config.fast_start,
            title: config.title.clone(),
            muxer: None,
            params: None,
            samples_written: 0,
            samples_dropped: 0,
            not_ready_warned: false,
            last_pts_us: None,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// The track is registered and samples are accepted
    pub fn is_started(&self) -> bool {
        self.muxer.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped
    }

    pub fn codec_parameters(&self) -> Option<&CodecParameters> {
        self.params.as_ref()
    }

    fn build_muxer(&self) -> Result<Muxer<BufWriter<File>>, RecorderError> {
        let file = File::create(&self.output_path).map_err(|e| {
            RecorderError::Io(format!(
                "Failed to create output file {}: {}",
                self.output_path.display(),
                e
            ))
        })?;
        let writer = BufWriter::new(file);

        let metadata = match self.title {
            Some(ref title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };

        MuxerBuilder::new(writer)
            .video(VideoCodec::H264, self.width, self.height, self.frame_rate as f64)
            .with_fast_start(self.fast_start)
            .with_metadata(metadata)
            .build()
            .map_err(|e| RecorderError::Muxing(format!("Failed to create muxer: {}", e)))
    }

    /// Finish the container, or discard it when nothing usable was written
    pub fn finalize(mut self) -> Result<MuxerSummary, RecorderError> {
        let mut summary = MuxerSummary {
            samples_written: self.samples_written,
            samples_dropped: self.samples_dropped,
            ..MuxerSummary::default()
        };

        let Some(muxer) = self.muxer.take() else {
            log::info!("Muxer never started, no container written");
            return Ok(summary);
        };

        if self.samples_written == 0 {
            drop(muxer);
            self.discard_partial_file();
            log::warn!(
                "No samples reached the muxer, discarded {}",
                self.output_path.display()
            );
            return Ok(summary);
        }

        match muxer.finish_with_stats() {
            Ok(stats) => {
                summary.duration_secs = stats.duration_secs;
                summary.bytes_written = stats.bytes_written;
                summary.container_written = true;
                log::info!(
                    "Container finalized: {} video frames, {:.2}s, {} bytes -> {}",
                    stats.video_frames,
                    stats.duration_secs,
                    stats.bytes_written,
                    self.output_path.display()
                );
                Ok(summary)
            }
            Err(e) => {
                self.discard_partial_file();
                Err(RecorderError::Muxing(format!(
                    "Failed to finalize recording: {}",
                    e
                )))
            }
        }
    }

    fn discard_partial_file(&self) {
        match fs::remove_file(&self.output_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Could not remove partial file {}: {}",
                self.output_path.display(),
                e
            ),
        }
    }
}

impl SampleSink for MuxerSession {
    fn on_format(&mut self, params: &CodecParameters) -> Result<(), RecorderError> {
        if self.muxer.is_some() {
            return Err(RecorderError::InvalidState(
                "video track already registered".to_string(),
            ));
        }
        if params.width != self.width || params.height != self.height {
            log::warn!(
                "Encoder reports {}x{}, container track uses {}x{}",
                params.width,
                params.height,
                self.width,
                self.height
            );
        }

        self.muxer = Some(self.build_muxer()?);
        self.params = Some(params.clone());
        log::info!(
            "Video track registered: H.264 {}x{} @ {} fps -> {}",
            self.width,
            self.height,
            self.frame_rate,
            self.output_path.display()
        );
        Ok(())
    }

    fn write_sample(&mut self, sample: &EncoderSample<'_>) -> Result<(), RecorderError> {
        let Some(muxer) = self.muxer.as_mut() else {
            self.samples_dropped += 1;
            if !self.not_ready_warned {
                self.not_ready_warned = true;
                log::warn!("Encoded sample arrived before the video track was registered, dropping");
            }
            return Err(RecorderError::MuxerNotReady);
        };

        // The container rejects non-increasing timestamps
        let pts_us = match self.last_pts_us {
            Some(last) if sample.pts_us <= last => last + 1,
            _ => sample.pts_us,
        };

        muxer
            .write_video(pts_us as f64 / 1_000_000.0, sample.payload(), sample.is_key_frame())
            .map_err(|e| RecorderError::Muxing(format!("Failed to write frame: {}", e)))?;

        self.last_pts_us = Some(pts_us);
        self.samples_written += 1;
        Ok(())
    }
}
