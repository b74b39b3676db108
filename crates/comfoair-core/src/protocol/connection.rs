//! Connection settings
//!
//! Describes how to reach the ventilation unit and opens the matching channel.

use serde::{Deserialize, Serialize};
use std::net::TcpStream;
use std::time::Duration;
use tracing::info;

use super::{
    serial::{configure_port, open_port},
    CommunicationChannel, ProtocolError, SerialChannel, TcpChannel, DEFAULT_BAUD_RATE,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_TICK_INTERVAL_MS,
};

/// Physical link to the unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transport {
    /// RS-232 service port
    Serial {
        port_name: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Serial-to-LAN bridge, `host:port`
    Tcp { address: String },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Serial {
            port_name: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port or TCP bridge
    pub transport: Transport,
    /// Read timeout of the channel in milliseconds
    pub read_timeout_ms: u64,
    /// Interval between engine ticks in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl ConnectionConfig {
    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Tick interval as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Open the channel described by `config`
pub fn open_channel(config: &ConnectionConfig) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
    let timeout = config.read_timeout();

    let mut channel: Box<dyn CommunicationChannel> = match &config.transport {
        Transport::Serial { port_name, baud_rate } => {
            let mut port = open_port(port_name, Some(*baud_rate), Some(timeout))?;
            configure_port(port.as_mut())?;
            Box::new(SerialChannel::new(port))
        }
        Transport::Tcp { address } => {
            let stream = TcpStream::connect(address)?;
            stream.set_nodelay(true)?;
            Box::new(TcpChannel::new(stream))
        }
    };

    channel.set_timeout(timeout)?;
    channel.clear_input_buffer()?;
    info!("connection: opened {}", channel.describe());
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(
            config.transport,
            Transport::Serial {
                port_name: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600
            }
        );
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_transport_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{ "transport": { "type": "tcp", "address": "192.168.1.40:8899" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.transport,
            Transport::Tcp {
                address: "192.168.1.40:8899".to_string()
            }
        );
        assert_eq!(config.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);

        let serial: Transport =
            serde_json::from_str(r#"{ "type": "serial", "port_name": "COM3" }"#).unwrap();
        assert_eq!(
            serial,
            Transport::Serial {
                port_name: "COM3".to_string(),
                baud_rate: DEFAULT_BAUD_RATE
            }
        );
    }

    #[test]
    fn test_open_tcp_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ConnectionConfig {
            transport: Transport::Tcp {
                address: listener.local_addr().unwrap().to_string(),
            },
            ..Default::default()
        };
        let channel = open_channel(&config).unwrap();
        assert!(channel.describe().starts_with("tcp://"));
    }
}
