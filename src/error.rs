//! Error types for the decoding pipeline.
//!
//! Nothing in the pipeline is fatal to the process. Every error here has a local
//! recovery path, and most of them never leave the decode loop: they are logged,
//! counted in [`DecoderStatus`](crate::DecoderStatus) and answered with a retry, a
//! dropped frame or a reconfiguration.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: zero resolution or a codec that cannot be created
//! - **Codec Errors**: transient failures while feeding or draining the decoder
//! - **Asset Errors**: a bundled reference frame could not be read
//! - **Config Errors**: invalid YAML decoder configuration
//! - **Lifecycle Errors**: stop timeouts and messages sent to a stopped worker
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use streamdecode::DecodeError;
//!
//! let error = DecodeError::codec_failed("dequeue input", "codec in illegal state");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Main error type for the decoding pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("Cannot configure decoder for {width}x{height}: {reason}")]
    Configuration {
        width: u32,
        height: u32,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Codec operation '{operation}' failed: {source}")]
    Codec {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Reference asset error: {path}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid decoder configuration: {details}")]
    Config { details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Decode worker is not running")]
    WorkerStopped,

    #[error("Output dispatcher failure: {details}")]
    Dispatcher { details: String },
}

impl DecodeError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DecodeError::Configuration { .. } => true,
            DecodeError::Codec { .. } => true,
            DecodeError::Timeout { .. } => true,
            DecodeError::Asset { .. } => false,
            DecodeError::Config { .. } => false,
            DecodeError::WorkerStopped => false,
            DecodeError::Dispatcher { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DecodeError::Configuration { .. } => vec![
                "Wait for a frame that carries a non-zero resolution",
                "Check that the platform exposes a decoder for the stream MIME type",
                "Retry once the presentation surface is valid",
            ],
            DecodeError::Codec { .. } => vec![
                "Reconfigure the decoder session",
                "Wait for the next key frame after reconfiguration",
            ],
            DecodeError::Asset { .. } => vec![
                "Check that the reference frame assets are installed",
                "Wait for a genuine key frame from the stream",
            ],
            DecodeError::Config { .. } => vec![
                "Check the YAML field names and value ranges",
                "Remove fields to fall back to the defaults",
            ],
            DecodeError::Timeout { .. } => vec![
                "Increase the stop timeout",
                "Check for a pixel consumer or codec call that never returns",
            ],
            DecodeError::WorkerStopped => vec!["Call resume() before sending control requests"],
            DecodeError::Dispatcher { .. } => vec![
                "Check that the process can spawn threads",
                "Recreate the decoder",
            ],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(width: u32, height: u32, reason: impl Into<String>) -> Self {
        DecodeError::Configuration { width, height, reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors caused by a codec failure.
    pub fn configuration_with_source(
        width: u32,
        height: u32,
        reason: impl Into<String>,
        source: DecodeError,
    ) -> Self {
        DecodeError::Configuration {
            width,
            height,
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper constructor for codec errors.
    pub fn codec_failed(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DecodeError::Codec { operation: operation.into(), source: source.into() }
    }

    /// Helper constructor for asset errors with path context.
    pub fn asset_error(path: PathBuf, source: std::io::Error) -> Self {
        DecodeError::Asset { path, source }
    }

    /// Helper constructor for configuration parse errors.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        DecodeError::Config { details: details.into() }
    }
}

impl From<serde_yaml_ng::Error> for DecodeError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        DecodeError::Config { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn error_messages_carry_their_context(
            width in 0u32..8192,
            height in 0u32..8192,
            reason in "[a-z ]{1,32}",
            operation in "[a-z ]{1,16}",
        ) {
            let config = DecodeError::configuration(width, height, reason.clone());
            let msg = config.to_string();
            let dims = format!("{width}x{height}");
            prop_assert!(msg.contains(&dims));
            prop_assert!(msg.contains(&reason));

            let codec = DecodeError::codec_failed(operation.clone(), reason.clone());
            let codec_msg = codec.to_string();
            prop_assert!(codec_msg.contains(&operation));
            prop_assert!(codec_msg.contains(&reason));
            let source = std::error::Error::source(&codec).map(|s| s.to_string());
            prop_assert_eq!(source, Some(reason));
        }
    }

    #[test]
    fn configuration_error_keeps_codec_source() {
        let codec = DecodeError::codec_failed("create", "no decoder for video/avc");
        let err = DecodeError::configuration_with_source(1280, 720, "codec unavailable", codec);

        let source = std::error::Error::source(&err).expect("source should be kept");
        assert!(source.to_string().contains("create"));
        assert!(err.is_retryable());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DecodeError>();

        let error = DecodeError::WorkerStopped;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_classification() {
        let timeout = DecodeError::Timeout { duration: Duration::from_secs(3) };
        let config = DecodeError::invalid_config("queue_capacity must be positive");
        let asset = DecodeError::asset_error(
            PathBuf::from("iframe_1280x720_ins.h264"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );

        assert!(timeout.is_retryable());
        assert!(!config.is_retryable());
        assert!(!asset.is_retryable());

        for err in [&timeout, &config, &asset, &DecodeError::WorkerStopped] {
            let suggestions = err.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn yaml_errors_convert_to_config() {
        let yaml_err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let err: DecodeError = yaml_err.into();
        assert!(matches!(err, DecodeError::Config { .. }));
    }
}
