//! Camera Capture Layer
//!
//! The camera is an external collaborator: it is acquired, yields frames on
//! demand and is released on close. Acquisition failures are classified so
//! the user sees a distinct message per cause.

pub mod frame;
pub mod still;

pub use frame::CapturedFrame;
pub use still::StillImageSource;

use async_trait::async_trait;
use serde::Serialize;
use std::io;
use thiserror::Error;

/// Why the camera stream could not be acquired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum AcquisitionError {
    #[error("Camera access was denied. Allow camera permission and try again.")]
    PermissionDenied,
    #[error("No camera was found on this device.")]
    NoDevice,
    #[error("The camera is in use by another application. Close it and try again.")]
    DeviceBusy,
    #[error("The camera could not be started: {0}")]
    Other(String),
}

impl AcquisitionError {
    /// Classify an I/O failure raised while opening a source
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => AcquisitionError::PermissionDenied,
            io::ErrorKind::NotFound => AcquisitionError::NoDevice,
            io::ErrorKind::AddrInUse | io::ErrorKind::WouldBlock => AcquisitionError::DeviceBusy,
            _ => AcquisitionError::Other(error.to_string()),
        }
    }
}

/// Continuous video frame source
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open the stream
    async fn acquire(&self) -> Result<(), AcquisitionError>;

    /// Latest frame, if the stream is open and has produced one
    fn next_frame(&self) -> Option<CapturedFrame>;

    /// Release the stream
    fn release(&self);

    /// Short description for diagnostics
    fn describe(&self) -> String {
        "camera".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(AcquisitionError::from_io(&denied), AcquisitionError::PermissionDenied);

        let missing = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(AcquisitionError::from_io(&missing), AcquisitionError::NoDevice);

        let busy = io::Error::new(io::ErrorKind::AddrInUse, "busy");
        assert_eq!(AcquisitionError::from_io(&busy), AcquisitionError::DeviceBusy);
    }

    #[test]
    fn test_messages_are_distinct() {
        let messages = [
            AcquisitionError::PermissionDenied.to_string(),
            AcquisitionError::NoDevice.to_string(),
            AcquisitionError::DeviceBusy.to_string(),
        ];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);
    }
}
