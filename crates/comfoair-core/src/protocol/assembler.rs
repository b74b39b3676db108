//! Receive buffer for a noisy, fragmented byte stream.
//!
//! Bytes arrive in arbitrary chunks. Each call to [`ReceiveAssembler::feed`]
//! appends them and drains every complete token already buffered:
//! - ACK tokens anywhere in the buffer are removed first
//! - bytes before a START marker are dropped as noise
//! - a START without a matching END is kept until more bytes arrive
//! - a buffer with no START at all is discarded wholesale

use tracing::{debug, trace};

use super::{ACK, END, START};

/// Event produced while draining the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// Acknowledgement token seen
    Ack,
    /// Complete raw frame, START and END markers included
    Frame(Vec<u8>),
}

/// Accumulates inbound bytes and splits them into ACKs and frames
#[derive(Debug, Default)]
pub struct ReceiveAssembler {
    buffer: Vec<u8>,
    /// Bytes dropped as noise since creation
    discarded: u64,
}

impl ReceiveAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every event that is now complete
    pub fn feed(&mut self, data: &[u8]) -> Vec<RxEvent> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        // Every pass removes at least two bytes or stops, so this bounds the loop
        let mut budget = self.buffer.len();

        while self.buffer.len() >= 2 && budget > 0 {
            budget -= 1;

            if let Some(pos) = find(&self.buffer, &ACK, 0) {
                trace!("rx: ACK at offset {}", pos);
                self.buffer.drain(pos..pos + ACK.len());
                events.push(RxEvent::Ack);
                continue;
            }

            let Some(start) = find(&self.buffer, &START, 0) else {
                debug!(
                    "rx: no START marker, discarding {} bytes: {:02x?}",
                    self.buffer.len(),
                    self.buffer
                );
                self.discarded += self.buffer.len() as u64;
                self.buffer.clear();
                break;
            };

            if start > 0 {
                trace!("rx: dropping {} bytes before START", start);
                self.discarded += start as u64;
                self.buffer.drain(..start);
            }

            let Some(end) = find(&self.buffer, &END, START.len()) else {
                trace!("rx: incomplete frame, {} bytes buffered", self.buffer.len());
                break;
            };

            let frame: Vec<u8> = self.buffer.drain(..end + END.len()).collect();
            trace!("rx: frame {:02x?}", frame);
            events.push(RxEvent::Frame(frame));
        }

        events
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes dropped as noise so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop any partial data
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Position of `needle` in `haystack`, searching from `from`
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
