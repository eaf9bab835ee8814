//! SCIP Error Types

use crate::command::status;
use thiserror::Error;

/// Errors that can occur while talking to a SCIP2.0 rangefinder
#[derive(Debug, Error)]
pub enum ScipError {
    /// Byte-level transport failure (open, write, read)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation needs an open transport
    #[error("Transport is not connected")]
    NotConnected,

    /// Nothing arrived before the timeout
    #[error("No response from sensor")]
    NoResponse,

    /// Echo line does not start with the command that was sent
    #[error("Response mismatch: sent {expected:?}, received {received:?}")]
    MismatchedResponse { expected: String, received: String },

    /// Malformed echo, status, or data line
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Line checksum mismatch
    #[error("Checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch { expected: char, actual: char },

    /// Reply status code outside the accepted set for the command
    #[error("{command} rejected with status {code:02X}")]
    Status { command: String, code: u8 },

    /// No candidate baud rate produced a reply
    #[error("Baud rate negotiation failed")]
    BaudNegotiationFailed,

    /// Baud rate not in the supported set
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Firmware only speaks SCIP1.x
    #[error("SCIP1.x protocol is not supported, please update the sensor firmware")]
    ProtocolVersionUnsupported,

    /// Request parameter out of its allowed range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Feature not available on this sensor model
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl ScipError {
    /// Status code carried by a rejected reply, if any
    pub fn status_code(&self) -> Option<u8> {
        match self {
            ScipError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for errors that only invalidate the current capture cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScipError::ChecksumMismatch { .. }
                | ScipError::InvalidResponse(_)
                | ScipError::NoResponse
                | ScipError::MismatchedResponse { .. }
                | ScipError::Status {
                    code: status::LASER_OFF | status::DESYNC,
                    ..
                }
        )
    }
}

impl From<std::io::Error> for ScipError {
    fn from(err: std::io::Error) -> Self {
        ScipError::Transport(err.to_string())
    }
}

impl From<serialport::Error> for ScipError {
    fn from(err: serialport::Error) -> Self {
        ScipError::Transport(err.to_string())
    }
}
