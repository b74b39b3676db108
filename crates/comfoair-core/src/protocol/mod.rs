//! ComfoAir Serial Protocol
//!
//! Implements the framed protocol spoken by ComfoAir ventilation units:
//! byte-stuffed frames with an additive checksum, a separate ACK token, and
//! a strict one-request-in-flight discipline.
//!
//! Bytes flow through the modules like this:
//!
//! ```text
//! RX: transport -> ReceiveAssembler -> Ack   -> PendingRequestTracker
//!                                   -> Frame -> frame::decode -> Dispatcher -> VariableSink
//! TX: CommandQueue -> CommunicationEngine -> frame::encode -> transport
//! ```

mod assembler;
mod catalog;
mod connection;
mod dispatch;
mod engine;
mod error;
pub mod frame;
mod queue;
pub mod serial;
mod stream;
mod tracker;

pub use assembler::{ReceiveAssembler, RxEvent};
pub use catalog::{
    CommandCatalog, CommandDescriptor, CommandKind, FieldSpec, Postprocess, SemanticType, BYPASS,
    FAULTS, OPERATING_HOURS, PREHEATING, SET_COMFORT_TEMPERATURE, SET_VENTILATION_LEVEL,
    TEMPERATURES, VENTILATION_LEVEL, VENTILATION_STATUS,
};
pub use connection::{open_channel, ConnectionConfig, Transport};
pub use dispatch::{decode_field, Dispatcher, MemorySink, Value, VariableSink};
pub use engine::{
    comfort_temperature_raw, stage_payload, CommunicationEngine, EngineConfig, EngineStats,
    SendOutcome, COMFORT_TEMPERATURE_DESTINATION, COMFORT_TEMPERATURE_RANGE, MAX_STAGE,
    STAGE_DESTINATION,
};
pub use error::ProtocolError;
pub use frame::Frame;
pub use queue::{CommandQueue, QueuedCommand};
pub use serial::{list_ports, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel, TcpChannel};
pub use tracker::{AckOutcome, PendingRequest, PendingRequestTracker, RequestPhase, TimeoutOutcome};

/// Frame start marker
pub const START: [u8; 2] = [0x07, 0xF0];
/// Frame end marker
pub const END: [u8; 2] = [0x07, 0x0F];
/// Acknowledgement token
pub const ACK: [u8; 2] = [0x07, 0xF3];
/// Lead byte of every control token, doubled inside data
pub const ESCAPE: u8 = 0x07;

/// Added to every checksum
pub const CHECKSUM_SEED: u32 = 173;

/// Maximum data bytes in one frame
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Default baud rate of the RS-232 service port
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default channel read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default interval between engine ticks in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
