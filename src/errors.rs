use crate::types::CameraFacing;
use thiserror::Error;

/// Broad classification of a [`CameraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation invoked in the wrong state. Never retried.
    Usage,
    /// Open/configure failure, disconnect or fatal hardware error.
    Device,
    /// Invalid or unreadable configuration.
    Config,
    /// The controller could not start its background machinery.
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera is not open")]
    NotOpen,
    #[error("camera is already open")]
    AlreadyOpen,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("a photo capture is already in progress")]
    CaptureInProgress,
    #[error("no still-capture target configured; set a photo size first")]
    NoStillTarget,
    #[error("preview is not running")]
    PreviewNotRunning,
    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no camera found facing {0}")]
    DeviceNotFound(CameraFacing),
    #[error("device error: {0}")]
    Device(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CameraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NotOpen
            | CameraError::AlreadyOpen
            | CameraError::InvalidState(_)
            | CameraError::CaptureInProgress
            | CameraError::NoStillTarget
            | CameraError::PreviewNotRunning
            | CameraError::Unsupported { .. }
            | CameraError::InvalidArgument(_) => ErrorKind::Usage,
            CameraError::DeviceNotFound(_) | CameraError::Device(_) => ErrorKind::Device,
            CameraError::Config(_) => ErrorKind::Config,
            CameraError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn is_usage_error(&self) -> bool {
        self.kind() == ErrorKind::Usage
    }

    pub fn unsupported(what: &'static str, value: impl ToString) -> Self {
        CameraError::Unsupported {
            what,
            value: value.to_string(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        CameraError::Device(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        CameraError::InvalidState(message.into())
    }
}

/// A single expected frame could not be used. Recovered locally by skipping
/// the cycle; never surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("no frame available")]
    Empty,
    #[error("expected {expected} frame, got {actual}")]
    UnexpectedFormat {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("payload does not start with a JPEG SOI marker")]
    NotJpeg,
    #[error("frame is missing plane {0}")]
    MissingPlane(usize),
    #[error("plane {plane} is too small for a {width}x{height} frame")]
    BufferTooSmall { plane: usize, width: u32, height: u32 },
}
