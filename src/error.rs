//! Typed error kinds that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`; these ride inside it and are
//! recovered with `downcast_ref` where the distinction matters (exit paths,
//! loop termination, tests).

use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems. Always fatal, always reported before the loop starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("model path {} is invalid or the model does not exist", .0.display())]
    ModelNotFound(PathBuf),

    #[error("input {0} is invalid: not an existing file or directory and not a usb<N> or picamera<N> device")]
    InvalidSource(String),

    #[error("file extension {0:?} is not supported")]
    UnsupportedExtension(String),

    #[error("confidence threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f32),

    #[error("resolution {0:?} is invalid; expected WxH, e.g. 640x480")]
    InvalidResolution(String),

    #[error("recording only works with video or camera sources")]
    RecordingRequiresStream,

    #[error("recording requires an explicit --resolution")]
    RecordingRequiresResolution,

    #[error("{what} requires the {feature} feature")]
    FeatureDisabled {
        what: &'static str,
        feature: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Frame source failures that end the loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("unable to read frames from {device} after {attempts} consecutive attempts")]
    DeviceRead { device: String, attempts: u32 },
}

/// Returns the `ConfigError` carried by `err`, if any.
pub fn config_error(err: &anyhow::Error) -> Option<&ConfigError> {
    err.downcast_ref::<ConfigError>()
}
