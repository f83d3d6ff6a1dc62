//! Decoder configuration.
//!
//! Every field has a default matching the reference behavior, so an empty YAML
//! document is a valid configuration:
//!
//! ```rust
//! use streamdecode::DecoderConfig;
//!
//! let config = DecoderConfig::from_yaml("queue_capacity: 60\ndevice_model: phantom4\n").unwrap();
//! assert_eq!(config.queue_capacity, 60);
//! assert_eq!(config.input_retry_limit, 20);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::reference::DeviceModel;
use crate::{DecodeError, Result};

/// MIME type of the H.264 elementary stream
pub const AVC_MIME_TYPE: &str = "video/avc";

/// Tunables for the queue, decoder session, watchdog and lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    /// Frames held between producer and decode loop before dropping the oldest
    pub queue_capacity: usize,

    /// Codec MIME type requested from the codec factory
    pub mime_type: String,

    /// Attempts to acquire an input slot before dropping the frame
    pub input_retry_limit: u32,

    /// Pause between input slot attempts
    pub input_retry_backoff_ms: u64,

    /// Output-set changes tolerated inside `churn_window_ms` before a reset
    pub churn_threshold: usize,

    /// Sliding window for the churn watchdog
    pub churn_window_ms: u64,

    /// Drain period while frames are inside the codec and the queue is empty
    pub drain_tick_ms: u64,

    /// Grace period for the decode worker to finish on stop
    pub stop_timeout_ms: u64,

    /// Device producing the stream, used to select a reference frame
    pub device_model: Option<DeviceModel>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            mime_type: AVC_MIME_TYPE.to_string(),
            input_retry_limit: 20,
            input_retry_backoff_ms: 1,
            churn_threshold: 10,
            churn_window_ms: 1000,
            drain_tick_ms: 5,
            stop_timeout_ms: 3000,
            device_model: None,
        }
    }
}

impl DecoderConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DecoderConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub async fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DecodeError::invalid_config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Reject values that would disable a safety bound
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DecodeError::invalid_config("queue_capacity must be at least 1"));
        }
        if self.input_retry_limit == 0 {
            return Err(DecodeError::invalid_config("input_retry_limit must be at least 1"));
        }
        if self.churn_threshold == 0 {
            return Err(DecodeError::invalid_config("churn_threshold must be at least 1"));
        }
        if self.churn_window_ms == 0 {
            return Err(DecodeError::invalid_config("churn_window_ms must be positive"));
        }
        if self.drain_tick_ms == 0 {
            return Err(DecodeError::invalid_config("drain_tick_ms must be positive"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(DecodeError::invalid_config("mime_type must not be empty"));
        }
        Ok(())
    }

    pub fn with_device_model(mut self, model: DeviceModel) -> Self {
        self.device_model = Some(model);
        self
    }

    pub fn input_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.input_retry_backoff_ms)
    }

    pub fn churn_window(&self) -> Duration {
        Duration::from_millis(self.churn_window_ms)
    }

    pub fn drain_tick(&self) -> Duration {
        Duration::from_millis(self.drain_tick_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DecoderConfig::from_yaml("{}").expect("empty config should parse");
        assert_eq!(config, DecoderConfig::default());
        assert_eq!(config.queue_capacity, 30);
        assert_eq!(config.churn_threshold, 10);
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));
        assert_eq!(config.mime_type, AVC_MIME_TYPE);
    }

    #[test]
    fn overrides_and_device_model_parse() {
        let yaml = "queue_capacity: 8\nchurn_window_ms: 500\ndevice_model: phantom3_4k\n";
        let config = DecoderConfig::from_yaml(yaml).expect("config should parse");
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.churn_window(), Duration::from_millis(500));
        assert_eq!(config.device_model, Some(DeviceModel::Phantom3_4K));
    }

    #[test]
    fn zero_bounds_are_rejected() {
        for yaml in ["queue_capacity: 0", "input_retry_limit: 0", "churn_threshold: 0", "drain_tick_ms: 0"] {
            let err = DecoderConfig::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, DecodeError::Config { .. }), "{yaml} should be rejected");
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = DecoderConfig::from_yaml("queue_size: 30").unwrap_err();
        assert!(err.to_string().contains("queue_size"));
    }

    #[tokio::test]
    async fn load_reads_yaml_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("decoder.yaml");
        tokio::fs::write(&path, "input_retry_limit: 5\n").await?;

        let config = DecoderConfig::load(&path).await?;
        assert_eq!(config.input_retry_limit, 5);
        Ok(())
    }
}
