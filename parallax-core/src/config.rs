//! Decoder configuration, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stereo::StereoFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Sync constants
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Video lagging audio by more than this turns on non-reference skipping.
    pub discard_threshold_secs: f64,
    /// Larger gaps are treated as a discontinuity, not lag.
    pub discontinuity_limit_secs: f64,
    /// Master/slave mismatch beyond this is assumed to be an independent seek.
    pub seek_mismatch_secs: f64,
    /// Inter-frame delays at or above this do not update the average.
    pub max_frame_delay_secs: f64,
    /// Average inter-frame delay before the first measurement.
    pub initial_average_delay_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            discard_threshold_secs: 0.2,
            discontinuity_limit_secs: 100.0,
            seek_mismatch_secs: 6.0,
            max_frame_delay_secs: 1.0,
            initial_average_delay_secs: 40.0,
        }
    }
}

// ============================================================================
// Decoder config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub packet_queue_capacity: usize,
    /// Sleep between polls of the empty packet queue and a busy decoder.
    pub poll_interval_ms: u64,
    /// Sleep between polls of a full texture queue.
    pub output_poll_interval_ms: u64,
    /// How long the master waits for the slave to publish a frame.
    pub slave_wait_ms: u64,
    pub use_gpu: bool,
    pub audio_delay_ms: i32,
    pub theater_mode: bool,
    /// Probe plain sources for panorama geometry.
    pub stick_pano_360: bool,
    /// Treat `.jps` as parallel (left first) instead of cross-eyed.
    pub swap_jps: bool,
    pub user_format: StereoFormat,
    pub sync: SyncConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 512,
            poll_interval_ms: 10,
            output_poll_interval_ms: 10,
            slave_wait_ms: 1000,
            use_gpu: false,
            audio_delay_ms: 0,
            theater_mode: false,
            stick_pano_360: false,
            swap_jps: false,
            user_format: StereoFormat::Auto,
            sync: SyncConfig::default(),
        }
    }
}

impl DecoderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_queue_capacity == 0 {
            return Err(ConfigError::Invalid("packet_queue_capacity must be positive".into()));
        }
        if self.poll_interval_ms == 0 || self.output_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("polling intervals must be positive".into()));
        }
        if self.sync.discard_threshold_secs >= self.sync.discontinuity_limit_secs {
            return Err(ConfigError::Invalid(
                "discard threshold must be below the discontinuity limit".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn output_poll_interval(&self) -> Duration {
        Duration::from_millis(self.output_poll_interval_ms)
    }

    pub fn slave_wait(&self) -> Duration {
        Duration::from_millis(self.slave_wait_ms)
    }
}
