//! Communication engine
//!
//! Owns the transport write half, the receive buffer, the pending request and
//! the command queue for one ventilation unit. The engine has no clock and no
//! threads: every entry point takes the current instant, and the host drives
//! it with received bytes and periodic ticks.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{
    frame, AckOutcome, CommandCatalog, CommandDescriptor, CommandQueue, Dispatcher,
    PendingRequest, PendingRequestTracker, ProtocolError, QueuedCommand, RxEvent,
    ReceiveAssembler, TimeoutOutcome, Value, VariableSink, ACK, SET_COMFORT_TEMPERATURE,
    SET_VENTILATION_LEVEL,
};

/// Destination of the current ventilation stage
pub const STAGE_DESTINATION: &str = "vsAktuelleStufe";
/// Destination of the comfort temperature
pub const COMFORT_TEMPERATURE_DESTINATION: &str = "teKomfortTemperatur";

/// Highest ventilation stage accepted by the unit
pub const MAX_STAGE: i64 = 4;
/// Comfort temperature range in °C
pub const COMFORT_TEMPERATURE_RANGE: (f64, f64) = (10.0, 28.0);

/// Timeouts and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time to wait for an ACK, in whole seconds on disk
    #[serde(with = "seconds")]
    pub ack_timeout: Duration,
    /// Time to wait for response data after the ACK
    #[serde(with = "seconds")]
    pub data_timeout: Duration,
    /// Retransmissions before a request is evicted
    pub max_retry: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            data_timeout: Duration::from_secs(10),
            max_retry: 3,
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Traffic and error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Bytes written to the transport
    pub tx_bytes: u64,
    /// Bytes handed to `on_bytes_received`
    pub rx_bytes: u64,
    /// Frames written, retransmissions included
    pub frames_sent: u64,
    /// Frames that decoded cleanly
    pub frames_received: u64,
    /// ACKs seen
    pub acks_received: u64,
    /// Frames dropped on decode errors
    pub frames_discarded: u64,
    /// Frames sent again after a timeout
    pub retransmissions: u64,
    /// Requests given up on
    pub evictions: u64,
}

/// What `send_command` did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted and now tracked
    Sent,
    /// Transmitted again; the existing tracking was kept
    Resent,
    /// Another request is in flight; appended to the queue
    Queued,
}

/// Engine for one ventilation unit
pub struct CommunicationEngine<W: Write, S: VariableSink> {
    transport: W,
    sink: S,
    catalog: Arc<CommandCatalog>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    assembler: ReceiveAssembler,
    tracker: PendingRequestTracker,
    queue: CommandQueue,
    stats: EngineStats,
}

impl<W: Write, S: VariableSink> CommunicationEngine<W, S> {
    /// Create an engine with the built-in ComfoAir catalog
    pub fn new(transport: W, sink: S, config: EngineConfig) -> Self {
        Self::with_catalog(transport, sink, config, Arc::new(CommandCatalog::comfoair()))
    }

    /// Create an engine with a custom catalog
    pub fn with_catalog(
        transport: W,
        sink: S,
        config: EngineConfig,
        catalog: Arc<CommandCatalog>,
    ) -> Self {
        Self {
            transport,
            sink,
            dispatcher: Dispatcher::new(Arc::clone(&catalog)),
            catalog,
            config,
            assembler: ReceiveAssembler::new(),
            tracker: PendingRequestTracker::new(),
            queue: CommandQueue::new(),
            stats: EngineStats::default(),
        }
    }

    /// Transmit a command now, bypassing the queue
    ///
    /// Re-sending the id that is already tracked transmits again but keeps the
    /// original tracking. A different id while something is pending goes to
    /// the tail of the queue instead.
    pub fn send_command(
        &mut self,
        command: u16,
        payload: &[u8],
        now: Instant,
    ) -> Result<SendOutcome, ProtocolError> {
        let descriptor = self.descriptor(command)?;

        if self.tracker.is_tracking(command) {
            debug!("engine: {:#06x} already tracked, resending", command);
            self.transmit(command, payload)?;
            return Ok(SendOutcome::Resent);
        }

        if !self.tracker.is_idle() {
            info!(
                "engine: line busy, queueing '{}' ({:#06x})",
                descriptor.label, command
            );
            self.queue
                .enqueue(QueuedCommand::new(descriptor.label, command, payload.to_vec()));
            return Ok(SendOutcome::Queued);
        }

        self.start_request(descriptor, payload.to_vec(), now)?;
        Ok(SendOutcome::Sent)
    }

    /// Queue a read command and send it once the line is free
    pub fn poll_command(&mut self, label: &str, command: u16, now: Instant) -> Result<(), ProtocolError> {
        self.descriptor(command)?;
        debug!("engine: poll '{}' ({:#06x}), {} queued", label, command, self.queue.len());
        self.queue.enqueue(QueuedCommand::new(label, command, Vec::new()));
        self.try_dispatch(now)?;
        Ok(())
    }

    /// Send the queue head if nothing is in flight; returns true if one was sent
    pub fn try_dispatch(&mut self, now: Instant) -> Result<bool, ProtocolError> {
        if !self.tracker.is_idle() {
            return Ok(false);
        }

        while let Some(next) = self.queue.pop() {
            let descriptor = match self.descriptor(next.command) {
                Ok(d) => d,
                Err(e) => {
                    warn!("engine: dropping queued '{}': {}", next.label, e);
                    continue;
                }
            };
            debug!("engine: dispatching queued '{}' ({:#06x})", next.label, next.command);
            self.start_request(descriptor, next.payload, now)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Feed received bytes
    ///
    /// Every complete token is processed even if one of them fails; the
    /// first failure is returned afterwards.
    pub fn on_bytes_received(&mut self, bytes: &[u8], now: Instant) -> Result<(), ProtocolError> {
        self.stats.rx_bytes = self.stats.rx_bytes.saturating_add(bytes.len() as u64);
        trace!("engine: RX {:02x?}", bytes);

        let mut result = Ok(());
        for event in self.assembler.feed(bytes) {
            let outcome = match event {
                RxEvent::Ack => self.handle_ack(now),
                RxEvent::Frame(raw) => self.handle_frame(&raw, now),
            };
            if let Err(e) = outcome {
                warn!("engine: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Periodic timeout check
    ///
    /// An eviction is returned as the error so the host can raise an alert;
    /// the queue has already been drained when it is.
    pub fn on_tick(&mut self, now: Instant) -> Result<(), ProtocolError> {
        let outcome = self.tracker.check_timeouts(
            now,
            self.config.ack_timeout,
            self.config.data_timeout,
            self.config.max_retry,
        );

        match outcome {
            TimeoutOutcome::Idle => {
                self.try_dispatch(now)?;
                Ok(())
            }
            TimeoutOutcome::Waiting => Ok(()),
            TimeoutOutcome::Retransmit { command, payload, retry } => {
                info!("engine: retransmitting {:#06x} (retry {})", command, retry);
                self.stats.retransmissions += 1;
                self.transmit(command, &payload)?;
                Ok(())
            }
            TimeoutOutcome::Evicted(err) => {
                self.stats.evictions += 1;
                if let Err(e) = self.try_dispatch(now) {
                    warn!("engine: queue drain after eviction failed: {}", e);
                }
                Err(err)
            }
        }
    }

    /// Apply a setting from outside, e.g. a heat-control policy
    ///
    /// Returns the value actually applied after clamping. The sink is updated
    /// right away; the next poll confirms it.
    pub fn request_action(
        &mut self,
        destination: &str,
        value: &Value,
        now: Instant,
    ) -> Result<Value, ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidAction {
            destination: destination.to_string(),
            reason: reason.to_string(),
        };

        let (command, payload, applied) = match destination {
            STAGE_DESTINATION => {
                let requested = value.as_float().ok_or_else(|| invalid("expected a number"))?;
                let stage = stage_payload(requested.trunc() as i64);
                info!("engine: set ventilation stage {}", stage);
                (SET_VENTILATION_LEVEL, stage, Value::Integer(stage as i64))
            }
            COMFORT_TEMPERATURE_DESTINATION => {
                let requested = value.as_float().ok_or_else(|| invalid("expected a number"))?;
                if requested.is_nan() {
                    return Err(invalid("not a number"));
                }
                let (celsius, raw) = comfort_temperature_raw(requested);
                info!("engine: set comfort temperature {:.1}°C (raw {})", celsius, raw);
                (SET_COMFORT_TEMPERATURE, raw, Value::Float(celsius))
            }
            _ => return Err(invalid("not writable")),
        };

        self.send_command(command, &[payload], now)?;
        self.sink.set_value(destination, applied.clone());
        Ok(applied)
    }

    /// Currently tracked request
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.tracker.pending()
    }

    /// Number of queued commands
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Traffic counters
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Timeouts and retry budget
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Command catalog in use
    pub fn catalog(&self) -> &Arc<CommandCatalog> {
        &self.catalog
    }

    /// Underlying writer
    pub fn transport(&self) -> &W {
        &self.transport
    }

    /// Underlying writer, mutably
    pub fn transport_mut(&mut self) -> &mut W {
        &mut self.transport
    }

    /// Value sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Value sink, mutably
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Bytes waiting in the receive buffer
    pub fn buffered(&self) -> usize {
        self.assembler.len()
    }

    fn handle_ack(&mut self, now: Instant) -> Result<(), ProtocolError> {
        self.stats.acks_received += 1;
        if let AckOutcome::Completed(command) = self.tracker.on_ack(now) {
            debug!("engine: write {:#06x} done", command);
            self.try_dispatch(now)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, raw: &[u8], now: Instant) -> Result<(), ProtocolError> {
        let frame = match frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frames_discarded += 1;
                warn!("engine: discarding frame {:02x?}: {}", raw, e);
                return Ok(());
            }
        };
        self.stats.frames_received += 1;
        debug!(
            "engine: frame {:#06x} with {} data bytes",
            frame.command,
            frame.payload.len()
        );

        if self.catalog.find_by_response_id(frame.command).is_none() {
            debug!("engine: response {:#06x} not in catalog", frame.command);
        }

        if self.tracker.on_response_matched(frame.command).is_none() {
            warn!("engine: {}", ProtocolError::UnmatchedResponse(frame.command));
        }

        // ACK goes out even for unmatched responses
        let ack_result = self.write_bytes(&ACK);

        let delivered = self
            .dispatcher
            .dispatch(frame.command, &frame.payload, &mut self.sink);
        trace!("engine: delivered {} values", delivered);

        self.try_dispatch(now)?;
        ack_result
    }

    fn start_request(
        &mut self,
        descriptor: CommandDescriptor,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        let command = descriptor.request_id;
        self.tracker.submit(
            command,
            descriptor.kind,
            descriptor.response_id,
            payload.clone(),
            now,
        )?;
        // Tracked before the write so a failed write is retried on timeout
        self.transmit(command, &payload)
    }

    fn transmit(&mut self, command: u16, payload: &[u8]) -> Result<(), ProtocolError> {
        let bytes = frame::encode(command, payload)?;
        self.write_bytes(&bytes)?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        trace!("engine: TX {:02x?}", bytes);
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        self.stats.tx_bytes = self.stats.tx_bytes.saturating_add(bytes.len() as u64);
        Ok(())
    }

    fn descriptor(&self, command: u16) -> Result<CommandDescriptor, ProtocolError> {
        self.catalog
            .find_by_request_id(command)
            .cloned()
            .ok_or(ProtocolError::UnknownCommand(command))
    }
}

/// Clamp a requested ventilation stage to what the unit accepts
pub fn stage_payload(stage: i64) -> u8 {
    stage.clamp(0, MAX_STAGE) as u8
}

/// Clamp and round a comfort temperature; returns the applied °C and raw byte
pub fn comfort_temperature_raw(celsius: f64) -> (f64, u8) {
    let (min, max) = COMFORT_TEMPERATURE_RANGE;
    let applied = (celsius.clamp(min, max) * 2.0).round() / 2.0;
    let raw = ((applied + 20.0) * 2.0).round() as u8;
    (applied, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MemorySink, RequestPhase, TEMPERATURES};

    type TestEngine = CommunicationEngine<Vec<u8>, MemorySink>;

    fn engine() -> TestEngine {
        CommunicationEngine::new(Vec::new(), MemorySink::new(), EngineConfig::default())
    }

    #[test]
    fn test_stage_payload_clamps() {
        assert_eq!(stage_payload(-3), 0);
        assert_eq!(stage_payload(2), 2);
        assert_eq!(stage_payload(9), 4);
    }

    #[test]
    fn test_comfort_temperature_raw() {
        assert_eq!(comfort_temperature_raw(21.0), (21.0, 82));
        assert_eq!(comfort_temperature_raw(21.3), (21.5, 83));
        assert_eq!(comfort_temperature_raw(5.0), (10.0, 60));
        assert_eq!(comfort_temperature_raw(40.0), (28.0, 96));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut engine = engine();
        let err = engine.send_command(0x1234, &[], Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(0x1234)));
        assert!(engine.transport().is_empty());
        assert!(engine.pending().is_none());
    }

    #[test]
    fn test_resend_keeps_original_tracking() {
        let t0 = Instant::now();
        let mut engine = engine();
        assert_eq!(engine.send_command(TEMPERATURES, &[], t0).unwrap(), SendOutcome::Sent);
        let later = t0 + Duration::from_secs(2);
        assert_eq!(
            engine.send_command(TEMPERATURES, &[0x01], later).unwrap(),
            SendOutcome::Resent
        );

        let pending = engine.pending().unwrap();
        assert_eq!(pending.phase_started_at, t0);
        assert!(pending.payload.is_empty());
        assert_eq!(engine.stats().frames_sent, 2);
    }

    #[test]
    fn test_other_command_is_queued_while_pending() {
        let now = Instant::now();
        let mut engine = engine();
        engine.send_command(TEMPERATURES, &[], now).unwrap();
        assert_eq!(
            engine.send_command(SET_VENTILATION_LEVEL, &[2], now).unwrap(),
            SendOutcome::Queued
        );
        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.pending().unwrap().command, TEMPERATURES);
    }

    #[test]
    fn test_request_action_stage() {
        let now = Instant::now();
        let mut engine = engine();
        let applied = engine
            .request_action(STAGE_DESTINATION, &Value::Integer(7), now)
            .unwrap();

        assert_eq!(applied, Value::Integer(4));
        assert_eq!(engine.sink().get(STAGE_DESTINATION), Some(&Value::Integer(4)));
        assert_eq!(
            engine.transport().as_slice(),
            frame::encode(SET_VENTILATION_LEVEL, &[4]).unwrap().as_slice()
        );
        assert_eq!(engine.pending().unwrap().phase(), RequestPhase::AwaitingAck);
    }

    #[test]
    fn test_request_action_rejects_unknown_destination() {
        let mut engine = engine();
        let err = engine
            .request_action("teT1_Aussenluft", &Value::Float(3.0), Instant::now())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAction { .. }));

        let err = engine
            .request_action(STAGE_DESTINATION, &Value::Bool(true), Instant::now())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAction { .. }));
        assert!(engine.sink().is_empty());
    }

    #[test]
    fn test_config_serializes_seconds() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert_eq!(json, r#"{"ack_timeout":5,"data_timeout":10,"max_retry":3}"#);

        let config: EngineConfig = serde_json::from_str(r#"{"max_retry":1}"#).unwrap();
        assert_eq!(config.max_retry, 1);
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
    }
}
