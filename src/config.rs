//! Configuration management for CrabRecord
//!
//! Provides loading, saving and validation of recording settings kept in a
//! TOML file. Frame geometry and the output path are per-session and are
//! supplied when a [`RecordingConfig`] is derived from it.

use crate::errors::RecorderError;
use crate::recording::{
    ColorLayout, RecordingConfig, DEFAULT_BITRATE, DEFAULT_FRAME_RATE,
    DEFAULT_KEY_FRAME_INTERVAL_SECS, DEFAULT_MIN_HEALTHY_FPS, DEFAULT_STATS_WINDOW,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrabRecordConfig {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frames per second
    pub frame_rate: u32,
    /// Seconds between key frames
    pub key_frame_interval_secs: u32,
    /// Force one input layout instead of picking by preference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<ColorLayout>,
}

/// Container output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write moov before mdat
    pub fast_start: bool,
    /// Title metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Diagnostics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Where the first undecodable compressed frames are saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_dump_dir: Option<PathBuf>,
    /// Frames per performance report
    pub stats_window: usize,
    /// Throughput below which a warning is logged
    pub min_healthy_fps: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            frame_rate: DEFAULT_FRAME_RATE,
            key_frame_interval_secs: DEFAULT_KEY_FRAME_INTERVAL_SECS,
            layout: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            fast_start: true,
            title: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            debug_dump_dir: None,
            stats_window: DEFAULT_STATS_WINDOW,
            min_healthy_fps: DEFAULT_MIN_HEALTHY_FPS,
        }
    }
}

impl Default for CrabRecordConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            output: OutputConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl CrabRecordConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecorderError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            RecorderError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let config: CrabRecordConfig = toml::from_str(&contents).map_err(|e| {
            RecorderError::Configuration(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RecorderError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    RecorderError::Io(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            RecorderError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string)
            .map_err(|e| RecorderError::Io(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabrecord.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.encoder.bitrate < 10_000 || self.encoder.bitrate > 100_000_000 {
            return Err("Bitrate must be between 10 kbps and 100 Mbps".to_string());
        }
        if self.encoder.frame_rate == 0 || self.encoder.frame_rate > 240 {
            return Err("Invalid frame rate (must be 1-240)".to_string());
        }
        if self.encoder.key_frame_interval_secs == 0 || self.encoder.key_frame_interval_secs > 60 {
            return Err("Key frame interval must be between 1 and 60 seconds".to_string());
        }

        if self.diagnostics.stats_window == 0 {
            return Err("Stats window must hold at least one frame".to_string());
        }
        if self.diagnostics.min_healthy_fps.is_nan() || self.diagnostics.min_healthy_fps < 0.0 {
            return Err("Minimum healthy FPS must be non-negative".to_string());
        }

        Ok(())
    }

    /// Session configuration for one recording
    pub fn recording_config(
        &self,
        width: u32,
        height: u32,
        output_path: impl Into<PathBuf>,
    ) -> RecordingConfig {
        let mut config = RecordingConfig::new(width, height, output_path)
            .with_bitrate(self.encoder.bitrate)
            .with_frame_rate(self.encoder.frame_rate)
            .with_key_frame_interval(self.encoder.key_frame_interval_secs)
            .with_fast_start(self.output.fast_start)
            .with_stats_window(self.diagnostics.stats_window);
        config.min_healthy_fps = self.diagnostics.min_healthy_fps;
        if let Some(layout) = self.encoder.layout {
            config = config.with_layout(layout);
        }
        if let Some(ref title) = self.output.title {
            config = config.with_title(title.clone());
        }
        if let Some(ref dir) = self.diagnostics.debug_dump_dir {
            config = config.with_debug_dump_dir(dir.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CrabRecordConfig::default();
        assert_eq!(config.encoder.bitrate, 2_000_000);
        assert_eq!(config.encoder.frame_rate, 30);
        assert!(config.output.fast_start);
        assert_eq!(config.diagnostics.stats_window, 30);
    }

    #[test]
    fn test_config_validation() {
        let config = CrabRecordConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_rate = config.clone();
        bad_rate.encoder.frame_rate = 0;
        assert!(bad_rate.validate().is_err());

        let mut bad_window = CrabRecordConfig::default();
        bad_window.diagnostics.stats_window = 0;
        assert!(bad_window.validate().is_err());

        let mut bad_fps = CrabRecordConfig::default();
        bad_fps.diagnostics.min_healthy_fps = f64::NAN;
        assert!(bad_fps.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nested").join("crabrecord.toml");

        let mut config = CrabRecordConfig::default();
        config.encoder.bitrate = 4_000_000;
        config.output.title = Some("Bench".to_string());
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = CrabRecordConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = CrabRecordConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[encoder]"));
        assert!(toml_string.contains("[output]"));
        assert!(toml_string.contains("[diagnostics]"));
        assert!(toml_string.contains("key_frame_interval_secs"));
        assert!(!toml_string.contains("title"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: CrabRecordConfig = toml::from_str("[encoder]\nbitrate = 500000\n").unwrap();
        assert_eq!(parsed.encoder.bitrate, 500_000);
        assert_eq!(parsed.encoder.frame_rate, 30);
        assert!(parsed.output.fast_start);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CrabRecordConfig::load_from_file("nonexistent_file.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().encoder.frame_rate, 30);
    }

    #[test]
    fn test_recording_config_carries_settings() {
        let mut config = CrabRecordConfig::default();
        config.encoder.layout = Some(ColorLayout::Planar);
        config.diagnostics.debug_dump_dir = Some(PathBuf::from("dumps"));

        let session = config.recording_config(640, 480, "clip.mp4");
        assert_eq!(session.width, 640);
        assert_eq!(session.preferred_layout, Some(ColorLayout::Planar));
        assert_eq!(session.debug_dump_dir, Some(PathBuf::from("dumps")));
        assert_eq!(session.output_path, PathBuf::from("clip.mp4"));
    }
}
