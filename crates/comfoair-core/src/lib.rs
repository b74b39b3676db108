//! # ComfoAir Core Library
//!
//! Communication engine for Zehnder/Wernig ComfoAir ventilation units.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding with byte stuffing and checksums
//! - Receive buffer resynchronization on a noisy byte stream
//! - One-request-in-flight tracking with ACK/data timeouts and retries
//! - Decoding of response payloads into named, typed values
//! - Periodic polling and actuation (ventilation stage, comfort temperature)
//! - Serial and TCP transports
//!
//! ## Example
//!
//! ```rust,no_run
//! use comfoair_core::prelude::*;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::from_file("comfoair.json")?;
//! let mut session = Session::open(&config, MemorySink::new())?;
//!
//! // Drop to stage 1 from another thread while the session runs
//! let handle = session.handle();
//! std::thread::spawn(move || handle.request_action("vsAktuelleStufe", &Value::Integer(1)));
//!
//! let stop = AtomicBool::new(false);
//! session.run(&stop)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod poll;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, ManagerConfig, PollConfig, PollGroupConfig};
    pub use crate::poll::PollScheduler;
    pub use crate::protocol::{
        CommandCatalog, CommunicationEngine, ConnectionConfig, EngineConfig, MemorySink,
        ProtocolError, Transport, Value, VariableSink,
    };
    pub use crate::session::{EngineHandle, Session};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
