//! Recorder lifecycle tests
//!
//! Uses the in-memory loopback codec, which counts live encoder instances, to
//! check that every path out of a session releases what it allocated.
//!
//! Run with: cargo test --test recorder_lifecycle

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use crabrecord::recording::{ColorLayout, Recorder, RecorderState, RecordingConfig};
use crabrecord::testing::{synthetic_nv12_frame, synthetic_yuyv_frame, LoopbackBackend};

fn config_in(dir: &std::path::Path) -> RecordingConfig {
    RecordingConfig::new(64, 48, dir.join("lifecycle.mp4"))
}

// ═══════════════════════════════════════════════════════════════════════════
// START / STOP
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_stop_twice_in_succession() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new());
    let recorder = Recorder::with_backend(config_in(dir.path()), backend.clone());

    assert!(recorder.start());
    for i in 0..5 {
        recorder.write_frame(&synthetic_yuyv_frame(i, 64, 48));
    }

    let first = recorder.stop();
    let second = recorder.stop();
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert_eq!(backend.created_instances(), 1);
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn test_failed_start_then_fresh_instance_succeeds() {
    let dir = tempdir().unwrap();

    let failing = Arc::new(LoopbackBackend::new().failing_create());
    let recorder = Recorder::with_backend(config_in(dir.path()), failing.clone());
    assert!(!recorder.start());
    assert!(!recorder.resources().any());
    assert_eq!(failing.live_instances(), 0);

    // Stop after a failed start is safe and allocates nothing
    assert!(recorder.stop().is_none());
    assert!(!recorder.resources().any());

    let working = Arc::new(LoopbackBackend::new());
    let fresh = Recorder::with_backend(config_in(dir.path()), working.clone());
    assert!(fresh.start());
    assert!(fresh.resources().encoder);
    assert_eq!(working.live_instances(), 1);
    fresh.stop();
    assert_eq!(working.live_instances(), 0);
}

#[test]
fn test_stop_returns_when_codec_never_finishes_stream() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new().without_end_of_stream());
    let recorder = Recorder::with_backend(config_in(dir.path()), backend.clone());

    assert!(recorder.start());
    for i in 0..5 {
        recorder.write_frame(&synthetic_nv12_frame(i, 64, 48));
    }

    let started = Instant::now();
    let stats = recorder.stop().expect("stats from first stop");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.counters.frames_submitted, 5);
    assert_eq!(stats.counters.samples_written, 5);
    assert!(stats.container_written);
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert!(!recorder.resources().any());
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn test_no_layout_is_configuration_failure() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new().with_layouts(Vec::new()));
    let recorder = Recorder::with_backend(config_in(dir.path()), backend.clone());

    assert!(!recorder.start());
    assert_eq!(backend.created_instances(), 0);
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[test]
fn test_planar_only_backend_gets_planar_frames() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new().with_layouts(vec![ColorLayout::Planar]));
    let recorder = Recorder::with_backend(config_in(dir.path()), backend);

    assert!(recorder.start());
    assert_eq!(recorder.encoder_layout(), Some(ColorLayout::Planar));
    recorder.write_frame(&synthetic_nv12_frame(0, 64, 48));
    assert_eq!(recorder.counters().frames_submitted, 1);
    recorder.stop();
}

#[test]
fn test_write_frame_before_start_and_after_stop() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::with_backend(config_in(dir.path()), Arc::new(LoopbackBackend::new()));
    let frame = synthetic_nv12_frame(0, 64, 48);

    recorder.write_frame(&frame);
    assert!(recorder.start());
    recorder.write_frame(&frame);
    recorder.stop();
    recorder.write_frame(&frame);

    assert_eq!(recorder.counters().frames_received, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONCURRENT CALLERS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_concurrent_writers_and_stop() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new());
    let recorder = Arc::new(Recorder::with_backend(
        config_in(dir.path()),
        backend.clone(),
    ));
    assert!(recorder.start());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let recorder = Arc::clone(&recorder);
            thread::spawn(move || {
                for i in 0..20 {
                    recorder.write_frame(&synthetic_nv12_frame(t * 100 + i, 64, 48));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let stats = recorder.stop().unwrap();
    assert_eq!(stats.counters.frames_received, 80);
    assert_eq!(
        stats.counters.frames_submitted + stats.counters.dropped_total(),
        80
    );
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn test_stop_races_with_writer() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(LoopbackBackend::new());
    let recorder = Arc::new(Recorder::with_backend(
        config_in(dir.path()),
        backend.clone(),
    ));
    assert!(recorder.start());

    let writer = {
        let recorder = Arc::clone(&recorder);
        thread::spawn(move || {
            for i in 0..200 {
                recorder.write_frame(&synthetic_nv12_frame(i, 64, 48));
            }
        })
    };
    let stopper = {
        let recorder = Arc::clone(&recorder);
        thread::spawn(move || recorder.stop().is_some())
    };

    writer.join().unwrap();
    let stopped = stopper.join().unwrap();
    assert!(stopped);
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert!(!recorder.resources().any());
    assert_eq!(backend.live_instances(), 0);
}
