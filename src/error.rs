//! Error types for capture, device, codec and storage failures

use crate::config::LensFacing;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a camera device backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera {0} not found")]
    NotFound(String),

    #[error("camera {0} is in use")]
    InUse(String),

    #[error("camera disconnected")]
    Disconnected,

    /// Transient buffer overflow; the session stays active and the frame is dropped
    #[error("buffer overflow")]
    BufferOverflow,

    #[error("camera service failure: {0}")]
    Fatal(String),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Whether the session can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BufferOverflow)
    }
}

/// Errors from the image codec
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("buffer too small: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Failure to write a captured image
#[derive(Error, Debug)]
#[error("failed to write {path}: {source}")]
pub struct PersistError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Command and per-frame errors surfaced by the capture controller
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture already running")]
    AlreadyCapturing,

    #[error("no active capture session")]
    NoActiveSession,

    #[error("no {0} camera available")]
    DeviceUnavailable(LensFacing),

    #[error("failed to open camera: {0}")]
    DeviceOpen(#[source] DeviceError),

    #[error("no usable capture configuration: {0}")]
    Negotiation(String),

    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("camera switch failed: {0}")]
    SwitchFailed(#[source] Box<CaptureError>),

    #[error("device rejected reconfiguration: {0}")]
    Reconfigure(#[source] DeviceError),

    #[error("capture session terminated unexpectedly")]
    SessionGone,
}

/// Errors loading the service configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
