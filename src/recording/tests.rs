//! Tests for the recording module

#[cfg(test)]
mod recording_tests {
    use crate::recording::{ColorLayout, FormatTag, Recorder, RecorderState, RecordingConfig};
    use crate::testing::{
        synthetic_i422_frame, synthetic_jpeg_frame, synthetic_nv12_frame, synthetic_yuyv_frame,
    };
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_recording_workflow_yuyv() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("workflow.mp4");
        let config = RecordingConfig::new(320, 240, &output).with_title("Integration Test");

        let recorder = Recorder::with_config(config);
        assert!(recorder.start());
        assert!(recorder.is_recording());

        for i in 0..15 {
            recorder.write_frame(&synthetic_yuyv_frame(i, 320, 240));
            thread::sleep(Duration::from_millis(2));
        }

        let stats = recorder.stop().expect("first stop returns stats");
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(stats.counters.frames_received, 15);
        assert_eq!(stats.counters.frames_submitted, 15);
        assert!(stats.counters.samples_written >= 1);
        assert!(stats.container_written);
        assert!(stats.bytes_written > 0);

        let metadata = std::fs::metadata(&output).expect("container exists");
        assert!(metadata.len() > 0);
    }

    #[test]
    fn test_recording_workflow_mixed_formats() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("mixed.mp4");
        let recorder = Recorder::new(160, 120, &output);
        assert!(recorder.start());

        recorder.write_frame(&synthetic_nv12_frame(0, 160, 120));
        recorder.write_frame(&synthetic_yuyv_frame(1, 160, 120));
        recorder.write_frame(&synthetic_i422_frame(2, 160, 120));
        recorder.write_frame(&synthetic_jpeg_frame(3, 160, 120));
        // JPEG at a different size is rescaled
        recorder.write_frame(&synthetic_jpeg_frame(4, 200, 150));

        let stats = recorder.stop().unwrap();
        assert_eq!(stats.counters.frames_submitted, 5);
        assert_eq!(stats.counters.dropped_total(), 0);
        assert!(stats.container_written);
    }

    #[test]
    fn test_recording_workflow_planar_encoder() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("planar.mp4");
        let config = RecordingConfig::new(160, 120, &output).with_layout(ColorLayout::Planar);
        let recorder = Recorder::with_config(config);
        assert!(recorder.start());
        assert_eq!(recorder.encoder_layout(), Some(ColorLayout::Planar));

        for i in 0..5 {
            recorder.write_frame_as(&synthetic_nv12_frame(i, 160, 120), FormatTag::SemiPlanar420);
        }
        let stats = recorder.stop().unwrap();
        assert_eq!(stats.counters.frames_submitted, 5);
        assert!(stats.container_written);
    }

    #[test]
    fn test_odd_dimensions_fail_start() {
        let dir = tempdir().unwrap();
        let recorder = Recorder::new(321, 240, dir.path().join("odd.mp4"));
        assert!(!recorder.start());
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(!recorder.resources().any());
    }

    #[test]
    fn test_no_frames_no_container() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("nothing.mp4");
        let recorder = Recorder::new(160, 120, &output);
        assert!(recorder.start());

        let stats = recorder.stop().unwrap();
        assert!(!stats.container_written);
        assert_eq!(stats.counters.samples_written, 0);
        assert!(!output.exists());
    }
}
