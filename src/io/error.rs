// src/io/error.rs
//
// Error taxonomy for device sessions and the listener layer.
//
// The vendor driver only reports failure as a zero/false return, so every
// driver failure collapses into `DeviceOperation` with the name of the call
// that failed.

use thiserror::Error;

/// Errors raised by device sessions, the listener registry and settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanError {
    /// Operation attempted while disposed or not connected.
    #[error("{device}: invalid state: {message}")]
    InvalidState { device: String, message: String },

    /// The driver reported failure for an otherwise valid call.
    #[error("{device}: driver call {operation} failed")]
    DeviceOperation { device: String, operation: String },

    /// Invalid construction parameters (address, port, profile, frame payload).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A background job was cancelled or panicked before producing a result.
    #[error("background job cancelled: {message}")]
    Cancelled { message: String },
}

impl CanError {
    pub fn invalid_state(device: &str, message: impl Into<String>) -> Self {
        CanError::InvalidState {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn device_operation(device: &str, operation: impl Into<String>) -> Self {
        CanError::DeviceOperation {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        CanError::Configuration {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        CanError::Cancelled {
            message: message.into(),
        }
    }

    /// True for errors that mean the caller used the session wrongly.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, CanError::InvalidState { .. })
    }

    /// True for driver-reported failures.
    pub fn is_device_operation(&self) -> bool {
        matches!(self, CanError::DeviceOperation { .. })
    }
}

impl From<tokio::task::JoinError> for CanError {
    fn from(e: tokio::task::JoinError) -> Self {
        CanError::cancelled(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_device() {
        let err = CanError::device_operation("UsbCan1#0/0", "VCI_StartCAN");
        assert_eq!(err.to_string(), "UsbCan1#0/0: driver call VCI_StartCAN failed");
        assert!(err.is_device_operation());
        assert!(!err.is_invalid_state());

        let err = CanError::invalid_state("CanetTcp", "not connected");
        assert_eq!(err.to_string(), "CanetTcp: invalid state: not connected");
        assert!(err.is_invalid_state());
    }
}
