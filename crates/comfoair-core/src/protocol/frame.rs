//! Frame encoding/decoding
//!
//! Implements the ComfoAir binary frame format.
//!
//! Frame format:
//! - 2 bytes: START marker (0x07 0xF0)
//! - 2 bytes: Command id (big-endian)
//! - 1 byte: Data length (before stuffing)
//! - N bytes: Data, every literal 0x07 doubled
//! - 1 byte: Checksum of command id, length and unstuffed data plus 173
//! - 2 bytes: END marker (0x07 0x0F)

use byteorder::{BigEndian, ByteOrder};

use super::{ProtocolError, CHECKSUM_SEED, END, ESCAPE, MAX_PAYLOAD_SIZE, START};

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command id
    pub command: u16,
    /// Unstuffed data bytes
    pub payload: Vec<u8>,
    /// Checksum over command, length and payload
    pub checksum: u8,
}

impl Frame {
    /// Create a new frame with the given command and payload
    pub fn new(command: u16, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        let checksum = checksum(command, &payload);
        Ok(Self {
            command,
            payload,
            checksum,
        })
    }

    /// Decode a frame from raw bytes, markers included
    ///
    /// The checksum is the last byte before END. Everything between the length
    /// byte and the checksum must unstuff to exactly the declared length;
    /// surplus bytes are a length mismatch, not ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        // Strip START/END
        let body = if data.len() >= START.len() + END.len() {
            &data[START.len()..data.len() - END.len()]
        } else {
            &[][..]
        };

        if body.len() < 4 {
            return Err(ProtocolError::FrameTooShort { len: body.len() });
        }

        let command = BigEndian::read_u16(&body[0..2]);
        let length = body[2] as usize;
        let checksum_index = body.len() - 1;

        let mut payload = Vec::with_capacity(length);
        let mut i = 3;
        while i < checksum_index {
            let byte = body[i];
            i += 1;
            if byte == ESCAPE && i < checksum_index && body[i] == ESCAPE {
                i += 1;
            }
            payload.push(byte);
        }

        if payload.len() != length {
            return Err(ProtocolError::FrameLengthMismatch {
                expected: length,
                actual: payload.len(),
            });
        }

        let received = body[checksum_index];
        let expected = checksum(command, &payload);
        if received != expected {
            return Err(ProtocolError::FrameChecksumMismatch {
                expected,
                actual: received,
            });
        }

        Ok(Self {
            command,
            payload,
            checksum: received,
        })
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());

        bytes.extend_from_slice(&START);

        let mut cmd_bytes = [0u8; 2];
        BigEndian::write_u16(&mut cmd_bytes, self.command);
        bytes.extend_from_slice(&cmd_bytes);

        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&stuff(&self.payload));
        bytes.push(self.checksum);

        bytes.extend_from_slice(&END);
        bytes
    }

    /// Get the total encoded size, stuffing included
    pub fn encoded_size(&self) -> usize {
        let escapes = self.payload.iter().filter(|&&b| b == ESCAPE).count();
        START.len() + 2 + 1 + self.payload.len() + escapes + 1 + END.len()
    }
}

/// Encode a command and payload straight to wire bytes
pub fn encode(command: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(Frame::new(command, payload.to_vec())?.to_bytes())
}

/// Decode raw frame bytes (START..=END)
pub fn decode(frame: &[u8]) -> Result<Frame, ProtocolError> {
    Frame::from_bytes(frame)
}

/// Checksum: (cmdHi + cmdLo + len + sum(data) + 173) mod 256
pub fn checksum(command: u16, payload: &[u8]) -> u8 {
    let [hi, lo] = command.to_be_bytes();
    let sum = payload.iter().fold(
        hi as u32 + lo as u32 + payload.len() as u32 + CHECKSUM_SEED,
        |acc, &b| acc + b as u32,
    );
    (sum & 0xFF) as u8
}

/// Double every escape byte in the payload
pub fn stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    for &b in payload {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}
