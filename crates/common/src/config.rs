//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where recordings and segments are written.
    pub output_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDefaults {
    /// Capture width in pixels.
    pub width: u32,

    /// Capture height in pixels.
    pub height: u32,

    /// Capture frame rate.
    pub fps: u32,

    /// Video bitrate for recorded segments (kbit/s). Zero selects the
    /// bits-per-pixel heuristic.
    pub video_bitrate_kbps: u32,

    /// Duration of each recorded segment file in seconds.
    pub segment_secs: u32,

    /// MJPEG quality for the preview stream (ffmpeg `-q:v`, 2..=31,
    /// lower is better).
    pub preview_quality: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "lenscast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate_kbps: 0,
            segment_secs: 60,
            preview_quality: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

impl RecordingDefaults {
    /// Effective bitrate: the configured value, or a 0.1 bits-per-pixel
    /// estimate when unset.
    pub fn effective_bitrate_kbps(&self) -> u32 {
        if self.video_bitrate_kbps > 0 {
            return self.video_bitrate_kbps;
        }
        let pixels = self.width as u64 * self.height as u64;
        let bits_per_sec = pixels * self.fps as u64 / 10;
        (bits_per_sec / 1000) as u32
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("lenscast").join("config.json")
}

/// Default recordings directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("lenscast").join("recordings")
}
