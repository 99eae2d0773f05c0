//! Recorder combining classification, conversion, encoding and muxing

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{CodecBackend, ColorLayout};
use super::config::{RecorderCounters, RecordingConfig, RecordingStats};
use super::convert::FrameConverter;
use super::encoder::{EncoderSession, EncoderSettings, SubmitOutcome};
use super::format::{classify_with_hint, FormatTag, FrameGeometry};
use super::monitor::{FrameTiming, PerformanceMonitor};
use super::muxer::{MuxerSession, MuxerSummary};
use super::software::OpenH264Backend;
use crate::errors::RecorderError;

/// Undecodable compressed frames kept for offline inspection
pub const MAX_DECODE_DUMPS: u32 = 3;

const PROGRESS_LOG_INTERVAL: u64 = 10;
const HEADER_BYTES_LOGGED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    Idle,
    Recording,
    /// Terminal; a new recorder is needed to record again
    Stopped,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Which session resources are currently held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProbe {
    /// An encoder instance is allocated
    pub encoder: bool,
    /// A muxer session exists
    pub muxer: bool,
    /// The conversion arena is allocated
    pub scratch: bool,
}

impl ResourceProbe {
    pub fn any(&self) -> bool {
        self.encoder || self.muxer || self.scratch
    }
}

struct ActiveSession {
    encoder: EncoderSession,
    muxer: MuxerSession,
    converter: FrameConverter,
    monitor: PerformanceMonitor,
    started: Instant,
    started_at: DateTime<Utc>,
}

struct Inner {
    state: RecorderState,
    session: Option<ActiveSession>,
    counters: RecorderCounters,
    decode_dumps: u32,
}

/// Video recorder turning raw capture frames into an H.264 MP4.
///
/// All methods take `&self` and serialize on one internal lock. Frame-level
/// problems never escape `write_frame`; they drop the frame and bump a
/// counter.
pub struct Recorder {
    config: RecordingConfig,
    backend: Arc<dyn CodecBackend>,
    inner: Mutex<Inner>,
}

impl Recorder {
    /// Recorder with default settings writing to `output_path`
    pub fn new(width: u32, height: u32, output_path: impl AsRef<Path>) -> Self {
        Self::with_config(RecordingConfig::new(width, height, output_path.as_ref()))
    }

    pub fn with_config(config: RecordingConfig) -> Self {
        Self::with_backend(config, Arc::new(OpenH264Backend::new()))
    }

    /// Recorder using a specific codec backend
    pub fn with_backend(config: RecordingConfig, backend: Arc<dyn CodecBackend>) -> Self {
        Self {
            config,
            backend,
            inner: Mutex::new(Inner {
                state: RecorderState::Idle,
                session: None,
                counters: RecorderCounters::default(),
                decode_dumps: 0,
            }),
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RecorderState {
        self.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn counters(&self) -> RecorderCounters {
        self.lock().counters
    }

    pub fn resources(&self) -> ResourceProbe {
        match self.lock().session {
            Some(ref session) => ResourceProbe {
                encoder: session.encoder.is_allocated(),
                muxer: true,
                scratch: session.converter.has_scratch(),
            },
            None => ResourceProbe::default(),
        }
    }

    /// Layout frames are converted to, while recording
    pub fn encoder_layout(&self) -> Option<ColorLayout> {
        self.lock()
            .session
            .as_ref()
            .map(|session| session.converter.layout())
    }

    /// Set up the encoder, converter and muxer and begin recording.
    ///
    /// Returns false if the recorder is not idle or any step fails. A failed
    /// start leaves nothing allocated.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != RecorderState::Idle {
            log::warn!("start() ignored: recorder is {}", inner.state);
            return false;
        }

        match self.open_session() {
            Ok(session) => {
                log::info!(
                    "Recording started: {}x{} via {} ({}) -> {}",
                    self.config.width,
                    self.config.height,
                    session.encoder.backend_name(),
                    session.converter.layout(),
                    self.config.output_path.display()
                );
                inner.session = Some(session);
                inner.state = RecorderState::Recording;
                true
            }
            Err(e) => {
                log::error!("Failed to start recording: {}", e);
                false
            }
        }
    }

    // Anything built before a failing step is dropped on return, which
    // releases it.
    fn open_session(&self) -> Result<ActiveSession, RecorderError> {
        let config = &self.config;
        match fs::remove_file(&config.output_path) {
            Ok(()) => log::info!(
                "Removed existing file at {}",
                config.output_path.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RecorderError::Io(format!(
                    "Failed to remove existing output {}: {}",
                    config.output_path.display(),
                    e
                )))
            }
        }

        let mut encoder = EncoderSession::new(Arc::clone(&self.backend));
        let layout = encoder.configure(&EncoderSettings::from(config))?.layout;
        encoder.open()?;

        let geometry = FrameGeometry::new(config.width, config.height);
        let converter = FrameConverter::new(geometry, layout);
        let muxer = MuxerSession::new(config);
        let monitor = PerformanceMonitor::new(config.stats_window, config.min_healthy_fps);

        Ok(ActiveSession {
            encoder,
            muxer,
            converter,
            monitor,
            started: Instant::now(),
            started_at: Utc::now(),
        })
    }

    /// Record one frame, inferring its layout from length and content
    pub fn write_frame(&self, raw: &[u8]) {
        self.process_frame(raw, None);
    }

    /// Record one frame whose layout the capture source reported.
    ///
    /// The tag is trusted when the length fits it; otherwise the frame is
    /// classified as if untagged.
    pub fn write_frame_as(&self, raw: &[u8], tag: FormatTag) {
        self.process_frame(raw, Some(tag));
    }

    fn process_frame(&self, raw: &[u8], hint: Option<FormatTag>) {
        let mut guard = self.lock();
        if guard.state != RecorderState::Recording {
            log::warn!("write_frame ignored: recorder is {}", guard.state);
            return;
        }
        let inner = &mut *guard;
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        let counters = &mut inner.counters;

        counters.frames_received += 1;
        let frame_number = counters.frames_received;
        let geometry = session.converter.geometry();
        if frame_number == 1 {
            log_first_frame(raw, geometry);
        }

        let total_start = Instant::now();
        let Some(tag) = classify_with_hint(raw, geometry, hint) else {
            if let Some(tag) = hint {
                counters.dropped_mismatch += 1;
                log::warn!(
                    "Dropping frame {}: {} bytes do not fit reported format {}",
                    frame_number,
                    raw.len(),
                    tag
                );
            } else {
                counters.dropped_unrecognized += 1;
                log::warn!(
                    "Dropping frame {}: {}",
                    frame_number,
                    RecorderError::FrameFormatUnrecognized { len: raw.len() }
                );
            }
            return;
        };

        let layout = session.converter.layout();
        let conversion_start = Instant::now();
        let converted = match session.converter.convert(raw, tag) {
            Ok(converted) => converted,
            Err(RecorderError::Decode(msg)) => {
                counters.dropped_decode += 1;
                log::warn!("Dropping frame {}: failed to decode {} frame: {}", frame_number, tag, msg);
                if inner.decode_dumps < MAX_DECODE_DUMPS {
                    if let Some(ref dir) = self.config.debug_dump_dir {
                        dump_undecodable(dir, inner.decode_dumps, raw);
                    }
                    inner.decode_dumps += 1;
                }
                return;
            }
            Err(e) => {
                counters.dropped_unrecognized += 1;
                log::warn!("Dropping frame {}: {}", frame_number, e);
                return;
            }
        };
        let conversion = match converted {
            Cow::Borrowed(_) if tag == FormatTag::SemiPlanar420 && layout == ColorLayout::SemiPlanar => {
                Duration::ZERO
            }
            _ => conversion_start.elapsed(),
        };

        let encode_start = Instant::now();
        let pts_us = session.encoder.presentation_time_us();
        match session.encoder.submit_frame(&converted, pts_us) {
            Ok(SubmitOutcome::Queued { .. }) => counters.frames_submitted += 1,
            Ok(SubmitOutcome::Dropped) => counters.dropped_backpressure += 1,
            Err(e) => log::warn!("Encoder rejected frame {}: {}", frame_number, e),
        }
        drop(converted);

        if let Err(e) = session.encoder.drain(false, &mut session.muxer) {
            log::warn!("Encoder drain failed after frame {}: {}", frame_number, e);
        }
        counters.samples_written = session.muxer.samples_written();
        counters.samples_dropped_not_ready = session.muxer.samples_dropped();
        let encode = encode_start.elapsed();

        session.monitor.record(FrameTiming {
            conversion,
            encode,
            total: total_start.elapsed(),
        });

        if frame_number % PROGRESS_LOG_INTERVAL == 0 {
            log::debug!(
                "Frame {}: {} -> {} at {} us, {} submitted, {} samples written, {} dropped",
                frame_number,
                tag,
                layout,
                pts_us,
                counters.frames_submitted,
                counters.samples_written,
                counters.dropped_total()
            );
        }
    }

    /// Finish the recording and release every session resource.
    ///
    /// Returns statistics on the first call after a successful start and
    /// `None` otherwise. Never fails; teardown problems are logged.
    pub fn stop(&self) -> Option<RecordingStats> {
        let mut guard = self.lock();
        match guard.state {
            RecorderState::Stopped => {
                log::debug!("stop() ignored: recorder already stopped");
                return None;
            }
            RecorderState::Idle => {
                guard.state = RecorderState::Stopped;
                log::info!("Recorder stopped before recording started");
                return None;
            }
            RecorderState::Recording => {}
        }

        let inner = &mut *guard;
        inner.state = RecorderState::Stopped;
        let session = inner.session.take()?;
        Some(self.finish_session(session, &mut inner.counters))
    }

    fn finish_session(
        &self,
        session: ActiveSession,
        counters: &mut RecorderCounters,
    ) -> RecordingStats {
        let ActiveSession {
            mut encoder,
            mut muxer,
            converter,
            monitor,
            started,
            started_at,
        } = session;

        match encoder.drain(true, &mut muxer) {
            Ok(summary) => log::debug!(
                "Final drain forwarded {} samples (end of stream seen: {})",
                summary.forwarded,
                summary.end_of_stream
            ),
            Err(e) => log::error!("Failed to drain encoder at stop: {}", e),
        }
        if let Err(e) = encoder.close() {
            log::error!("Failed to stop encoder: {}", e);
        }
        drop(encoder);

        counters.samples_written = muxer.samples_written();
        counters.samples_dropped_not_ready = muxer.samples_dropped();
        let summary = match muxer.finalize() {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("Failed to finalize container: {}", e);
                MuxerSummary::default()
            }
        };
        drop(converter);
        drop(monitor);

        let elapsed_secs = started.elapsed().as_secs_f64();
        log::info!(
            "Recording stopped after {:.2}s: {} frames received, {} submitted, {} samples written, {} dropped",
            elapsed_secs,
            counters.frames_received,
            counters.frames_submitted,
            counters.samples_written,
            counters.dropped_total()
        );

        RecordingStats {
            counters: *counters,
            duration_secs: summary.duration_secs,
            bytes_written: summary.bytes_written,
            elapsed_secs,
            output_path: self.config.output_path.to_string_lossy().to_string(),
            container_written: summary.container_written,
            started_at,
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.is_recording() {
            log::warn!("Recorder dropped while recording, finalizing");
            self.stop();
        }
    }
}

fn log_first_frame(raw: &[u8], geometry: FrameGeometry) {
    let header: Vec<String> = raw
        .iter()
        .take(HEADER_BYTES_LOGGED)
        .map(|b| format!("{:02X}", b))
        .collect();
    log::info!(
        "First frame: {} bytes for {}x{} (4:2:0 = {}, 4:2:2 = {}), header [{}]",
        raw.len(),
        geometry.width,
        geometry.height,
        geometry.len_420(),
        geometry.len_422(),
        header.join(" ")
    );
}

fn dump_undecodable(dir: &Path, index: u32, raw: &[u8]) {
    let path = dir.join(format!("debug_frame_{}.jpg", index));
    let written = fs::create_dir_all(dir).and_then(|()| fs::write(&path, raw));
    match written {
        Ok(()) => log::info!(
            "Saved undecodable frame ({} bytes) to {}",
            raw.len(),
            path.display()
        ),
        Err(e) => log::warn!("Could not save undecodable frame to {}: {}", path.display(), e),
    }
}
