//! Byte channels to the ventilation unit
//!
//! The unit is reached either directly over RS-232 or through a serial-to-LAN
//! bridge. Both look the same to the engine: a plain byte stream.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Abstraction for communication channels (Serial or TCP)
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop whatever the device sent before we started listening
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle on the same channel
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}

impl<C: CommunicationChannel + ?Sized> CommunicationChannel for Box<C> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        (**self).clear_input_buffer()
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        (**self).try_clone()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn serial_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(serial_io)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(serial_io)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port_clone = self.port.try_clone().map_err(serial_io)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud",
            self.port.name().unwrap_or_else(|| "serial".to_string()),
            self.port.baud_rate().unwrap_or_default()
        )
    }
}

/// TCP stream wrapper implementing CommunicationChannel
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // No kernel call for this on sockets; read until the socket would block
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let stream_clone = self.stream.try_clone()?;
        Ok(Box::new(TcpChannel::new(stream_clone)))
    }

    fn describe(&self) -> String {
        match self.stream.peer_addr() {
            Ok(addr) => format!("tcp://{}", addr),
            Err(_) => "tcp://(disconnected)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_channel_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpChannel::new(TcpStream::connect(addr).unwrap());
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(&[0x07, 0xF3]).unwrap();
        server.flush().unwrap();

        client.set_timeout(Duration::from_secs(2)).unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x07, 0xF3]);
        assert!(client.describe().starts_with("tcp://127.0.0.1:"));

        let mut reader = client.try_clone().unwrap();
        client.write_all(&[0x01]).unwrap();
        let mut echo = [0u8; 1];
        server.read_exact(&mut echo).unwrap();
        server.write_all(&echo).unwrap();
        reader.set_timeout(Duration::from_secs(2)).unwrap();
        reader.read_exact(&mut echo).unwrap();
        assert_eq!(echo, [0x01]);
    }

    #[test]
    fn test_tcp_clear_input_drops_stale_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client: Box<dyn CommunicationChannel> =
            Box::new(TcpChannel::new(TcpStream::connect(addr).unwrap()));
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(&[0xAA, 0xBB, 0xCC]).unwrap();
        server.flush().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        client.clear_input_buffer().unwrap();

        server.write_all(&[0x07, 0xF3]).unwrap();
        client.set_timeout(Duration::from_secs(2)).unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x07, 0xF3]);
    }
}
