use crate::platform::HardwareError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The pending operation a timeout or cancellation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Permission prompt round-trip
    Permission,
    /// Hardware device open
    Open,
    /// Capture session configuration
    Configure,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Permission => write!(f, "permission"),
            Operation::Open => write!(f, "device open"),
            Operation::Configure => write!(f, "session configure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Permission denied error: camera access was declined")]
    PermissionDenied,

    #[error("No camera device found: {0}")]
    NoDeviceFound(String),

    #[error("Timed out after {0:?} waiting for the camera open/close lock")]
    LockTimeout(Duration),

    #[error("Failed to open camera {camera_id}: {source}")]
    OpenFailed {
        camera_id: String,
        #[source]
        source: HardwareError,
    },

    #[error("Camera {0} disconnected")]
    Disconnected(String),

    #[error("Capture session configuration failed: {0}")]
    ConfigureFailed(String),

    #[error("No {operation} callback within {timeout:?}")]
    CallbackTimeout {
        operation: Operation,
        timeout: Duration,
    },

    #[error("Pending {0} cancelled by teardown")]
    Cancelled(Operation),

    #[error("Preview controller has been disposed")]
    Disposed,

    #[error("Camera background executor is not running")]
    ExecutorStopped,

    #[error("No preview surface available")]
    SurfaceUnavailable,

    #[error("Camera reports no output sizes")]
    NoPreviewSize,

    #[error("Hardware error while {context}: {source}")]
    Hardware {
        context: &'static str,
        #[source]
        source: HardwareError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CameraError {
    pub fn hardware(context: &'static str, source: HardwareError) -> Self {
        Self::Hardware { context, source }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether a fresh `retrieve_device` may reasonably succeed after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CameraError::LockTimeout(_)
                | CameraError::CallbackTimeout { .. }
                | CameraError::ConfigureFailed(_)
                | CameraError::OpenFailed { .. }
                | CameraError::Disconnected(_)
        )
    }

    /// Errors that end the current acquisition attempt without any automatic retry.
    pub fn is_terminal_for_attempt(&self) -> bool {
        matches!(
            self,
            CameraError::PermissionDenied
                | CameraError::NoDeviceFound(_)
                | CameraError::Cancelled(_)
                | CameraError::Disposed
        )
    }
}
