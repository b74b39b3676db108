//! ComfoAir Monitor
//!
//! Polls a ventilation unit for a while and prints every value it reported.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS]
//!
//! Options:
//!   --config FILE     Load a JSON configuration (see `comfoair_core::config`)
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --tcp HOST:PORT   Use a serial-to-LAN bridge instead of a serial port
//!   --seconds N       Run time (default: 30)
//!   --stage N         Set the ventilation stage (0-4) once connected
//!   --list            List serial ports and exit
//!
//! Set `RUST_LOG=comfoair_core=trace` to see every byte on the wire.

use anyhow::{bail, Context, Result};
use comfoair_core::config::{ManagerConfig, PollGroupConfig};
use comfoair_core::protocol::{list_ports, MemorySink, Transport, Value};
use comfoair_core::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = ManagerConfig::default();
    let mut seconds = 30u64;
    let mut stage: Option<i64> = None;

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--config" | "-c" => {
                let path = value.context("--config needs a file")?;
                config = ManagerConfig::from_file(path)
                    .with_context(|| format!("loading {}", path))?;
                i += 1;
            }
            "--port" | "-p" => {
                config.connection.transport = Transport::Serial {
                    port_name: value.context("--port needs a name")?.clone(),
                    baud_rate: comfoair_core::protocol::DEFAULT_BAUD_RATE,
                };
                i += 1;
            }
            "--tcp" => {
                config.connection.transport = Transport::Tcp {
                    address: value.context("--tcp needs host:port")?.clone(),
                };
                i += 1;
            }
            "--seconds" | "-s" => {
                seconds = value.context("--seconds needs a number")?.parse()?;
                i += 1;
            }
            "--stage" => {
                stage = Some(value.context("--stage needs a number")?.parse()?);
                i += 1;
            }
            "--list" => {
                for port in list_ports() {
                    println!(
                        "{}\t{}",
                        port.name,
                        port.product.as_deref().unwrap_or("-")
                    );
                }
                return Ok(());
            }
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    if config.polling.groups.is_empty() {
        let catalog = comfoair_core::protocol::CommandCatalog::comfoair();
        config.polling.groups = catalog
            .pollable()
            .map(|d| PollGroupConfig::new(d.label.clone(), 10))
            .collect();
    }

    let mut session = Session::open(&config, MemorySink::new())?;
    let handle = session.handle();

    if let Some(stage) = stage {
        let applied = handle.request_action("vsAktuelleStufe", &Value::Integer(stage))?;
        println!("Requested stage {}", applied);
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(seconds));
            stop.store(true, Ordering::Relaxed);
        });
    }

    session.run(&stop)?;

    let (mut values, stats) = handle.with(|engine| {
        let values: Vec<(String, Value)> = engine
            .sink()
            .values()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (values, engine.stats())
    })?;
    values.sort_by(|a, b| a.0.cmp(&b.0));

    println!();
    for (name, value) in &values {
        println!("{:<32} {}", name, value);
    }
    println!();
    println!(
        "TX {} bytes / {} frames, RX {} bytes / {} frames, {} ACKs, {} discarded, {} retries, {} evictions",
        stats.tx_bytes,
        stats.frames_sent,
        stats.rx_bytes,
        stats.frames_received,
        stats.acks_received,
        stats.frames_discarded,
        stats.retransmissions,
        stats.evictions
    );

    Ok(())
}
