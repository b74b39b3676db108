//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the ventilation unit
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Fewer bytes between the markers than a header and checksum need
    #[error("Frame too short: {len} bytes between markers, need at least 4")]
    FrameTooShort { len: usize },

    /// Unstuffed data does not match the length byte
    #[error("Frame length mismatch: declared {expected} data bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    /// Checksum byte does not match the frame contents
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    FrameChecksumMismatch { expected: u8, actual: u8 },

    /// Payload longer than the length byte can express
    #[error("Payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),

    /// A request is already in flight
    #[error("Request {0:#06x} cannot be submitted while another request is pending")]
    AlreadyPending(u16),

    /// Request evicted while waiting for its ACK
    #[error("No ACK for command {command:#06x} after {retries} retries")]
    AckTimeoutExceeded { command: u16, retries: u32 },

    /// Request evicted while waiting for its response
    #[error("No response data for command {command:#06x} after {retries} retries")]
    DataTimeoutExceeded { command: u16, retries: u32 },

    /// Response with no request waiting for it
    #[error("Response {0:#06x} received without a matching pending request")]
    UnmatchedResponse(u16),

    /// Command id not in the catalog
    #[error("Unknown command: {0:#06x}")]
    UnknownCommand(u16),

    /// Catalog failed validation
    #[error("Invalid command catalog: {0}")]
    InvalidCatalog(String),

    /// Action value cannot be applied
    #[error("Invalid action for '{destination}': {reason}")]
    InvalidAction { destination: String, reason: String },

    /// Serial port driver error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Configured serial port does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Channel closed by the other end
    #[error("Not connected to ventilation unit")]
    NotConnected,

    /// Engine mutex was poisoned
    #[error("Engine lock poisoned")]
    EngineUnavailable,

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors that only cost a single frame; the stream stays usable.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooShort { .. }
                | ProtocolError::FrameLengthMismatch { .. }
                | ProtocolError::FrameChecksumMismatch { .. }
        )
    }

    /// True for request evictions after the retry budget ran out
    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            ProtocolError::AckTimeoutExceeded { .. } | ProtocolError::DataTimeoutExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_classification() {
        assert!(ProtocolError::FrameTooShort { len: 2 }.is_frame_error());
        assert!(ProtocolError::FrameChecksumMismatch {
            expected: 0xA4,
            actual: 0x00
        }
        .is_frame_error());
        assert!(!ProtocolError::AlreadyPending(0x00D1).is_frame_error());
        assert!(ProtocolError::AckTimeoutExceeded {
            command: 0x00D1,
            retries: 3
        }
        .is_eviction());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::FrameChecksumMismatch {
            expected: 0xA4,
            actual: 0x12,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0xa4, got 0x12");
        assert_eq!(
            ProtocolError::UnknownCommand(0x99).to_string(),
            "Unknown command: 0x0099"
        );
    }
}
