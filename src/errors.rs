use thiserror::Error;

/// Errors raised inside the recording pipeline.
///
/// Only [`RecorderError::Configuration`] ever reaches a caller of
/// [`crate::recording::Recorder`], and then only as `false` from `start()`.
/// Everything else is handled where it happens and turns into a dropped frame
/// or a logged teardown problem.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unrecognized frame format: {len} bytes")]
    FrameFormatUnrecognized { len: usize },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encoder backpressure: no input slot available")]
    EncoderBackpressure,
    #[error("Muxer not ready: track not registered yet")]
    MuxerNotReady,
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Muxing error: {0}")]
    Muxing(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for RecorderError {
    fn from(e: std::io::Error) -> Self {
        RecorderError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = RecorderError::FrameFormatUnrecognized { len: 17 };
        assert_eq!(err.to_string(), "Unrecognized frame format: 17 bytes");

        let err = RecorderError::Configuration("no layout".to_string());
        assert!(err.to_string().contains("no layout"));
    }

    #[test]
    fn test_backpressure_message() {
        let err = RecorderError::EncoderBackpressure;
        assert_eq!(err.to_string(), "Encoder backpressure: no input slot available");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RecorderError = io.into();
        assert!(matches!(err, RecorderError::Io(ref m) if m.contains("missing")));
    }
}
