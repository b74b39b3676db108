//! Session driver
//!
//! Runs one engine against a live channel: reads whatever bytes arrived,
//! delivers ticks at the configured interval and enqueues due poll groups.
//! The engine sits behind a mutex so other threads can send actuation
//! commands through an [`EngineHandle`] while the session loop runs.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::poll::PollScheduler;
use crate::protocol::{
    open_channel, CommunicationChannel, CommunicationEngine, EngineStats, ProtocolError,
    SendOutcome, Value, VariableSink,
};

/// Engine shared between the session loop and handles
pub type SharedEngine<W, S> = Arc<Mutex<CommunicationEngine<W, S>>>;

/// Channel type used by sessions opened from configuration
pub type Channel = Box<dyn CommunicationChannel>;

const READ_CHUNK: usize = 256;

/// What one `poll_once` call did
#[derive(Debug, Default)]
pub struct PollReport {
    /// Bytes read from the channel
    pub bytes_read: usize,
    /// Whether the engine was ticked
    pub ticked: bool,
    /// Poll groups enqueued
    pub polled: usize,
    /// Requests evicted on this tick
    pub evictions: Vec<ProtocolError>,
}

/// Cloneable access to a running engine
pub struct EngineHandle<W: Write, S: VariableSink> {
    engine: SharedEngine<W, S>,
}

impl<W: Write, S: VariableSink> Clone for EngineHandle<W, S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<W: Write, S: VariableSink> EngineHandle<W, S> {
    /// Apply a setting, see [`CommunicationEngine::request_action`]
    pub fn request_action(&self, destination: &str, value: &Value) -> Result<Value, ProtocolError> {
        self.lock()?.request_action(destination, value, Instant::now())
    }

    /// Send a command directly
    pub fn send_command(&self, command: u16, payload: &[u8]) -> Result<SendOutcome, ProtocolError> {
        self.lock()?.send_command(command, payload, Instant::now())
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> Result<EngineStats, ProtocolError> {
        Ok(self.lock()?.stats())
    }

    /// Run `f` with the engine locked
    pub fn with<T>(&self, f: impl FnOnce(&mut CommunicationEngine<W, S>) -> T) -> Result<T, ProtocolError> {
        Ok(f(&mut *self.lock()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, CommunicationEngine<W, S>>, ProtocolError> {
        self.engine.lock().map_err(|_| ProtocolError::EngineUnavailable)
    }
}

/// One live connection to a ventilation unit
pub struct Session<R: Read, W: Write, S: VariableSink> {
    reader: R,
    engine: SharedEngine<W, S>,
    scheduler: PollScheduler,
    tick_interval: Duration,
    last_tick: Option<Instant>,
}

impl<S: VariableSink> Session<Channel, Channel, S> {
    /// Open the configured channel and build an engine on it
    pub fn open(config: &ManagerConfig, sink: S) -> Result<Self, ProtocolError> {
        let writer = open_channel(&config.connection)?;
        let reader = writer.try_clone()?;
        let engine = CommunicationEngine::new(writer, sink, config.engine);
        let scheduler = PollScheduler::new(&config.polling, engine.catalog());
        info!(
            "session: opened, tick {:?}, poll base {:?}",
            config.connection.tick_interval(),
            scheduler.base_interval()
        );
        Ok(Self::new(reader, engine, scheduler, config.connection.tick_interval()))
    }
}

impl<R: Read, W: Write, S: VariableSink> Session<R, W, S> {
    /// Session over an already opened reader and engine
    pub fn new(
        reader: R,
        engine: CommunicationEngine<W, S>,
        scheduler: PollScheduler,
        tick_interval: Duration,
    ) -> Self {
        Self {
            reader,
            engine: Arc::new(Mutex::new(engine)),
            scheduler,
            tick_interval,
            last_tick: None,
        }
    }

    /// Handle for use from other threads
    pub fn handle(&self) -> EngineHandle<W, S> {
        EngineHandle {
            engine: Arc::clone(&self.engine),
        }
    }

    /// The shared engine
    pub fn engine(&self) -> &SharedEngine<W, S> {
        &self.engine
    }

    /// Poll timing
    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Read once, then tick and poll if due
    ///
    /// Only a dead channel is an error. Engine failures are logged, and
    /// evictions are returned in the report.
    pub fn poll_once(&mut self, now: Instant) -> Result<PollReport, ProtocolError> {
        let mut report = PollReport::default();

        let mut buf = [0u8; READ_CHUNK];
        let n = match self.reader.read(&mut buf) {
            Ok(0) => return Err(ProtocolError::NotConnected),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        report.bytes_read = n;

        let mut engine = self
            .engine
            .lock()
            .map_err(|_| ProtocolError::EngineUnavailable)?;

        if n > 0 {
            if let Err(e) = engine.on_bytes_received(&buf[..n], now) {
                warn!("session: receive failed: {}", e);
            }
        }

        let tick_due = self
            .last_tick
            .map_or(true, |last| now.saturating_duration_since(last) >= self.tick_interval);
        if tick_due {
            self.last_tick = Some(now);
            report.ticked = true;
            match engine.on_tick(now) {
                Ok(()) => {}
                Err(e) if e.is_eviction() => {
                    error!("session: {}", e);
                    report.evictions.push(e);
                }
                Err(e) => warn!("session: tick failed: {}", e),
            }
        }

        for due in self.scheduler.due(now) {
            match engine.poll_command(&due.label, due.command, now) {
                Ok(()) => report.polled += 1,
                Err(e) => warn!("session: poll '{}' failed: {}", due.label, e),
            }
        }

        Ok(report)
    }

    /// Loop until `stop` is set or the channel dies
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), ProtocolError> {
        info!("session: running");
        while !stop.load(Ordering::Relaxed) {
            let report = self.poll_once(Instant::now())?;
            if report.polled > 0 {
                debug!("session: enqueued {} poll groups", report.polled);
            }
        }
        info!("session: stopped");
        Ok(())
    }
}
