//! Serial transport for RS-232/USB-serial instruments.
//!
//! Wraps the `serialport` crate and runs the blocking port I/O on Tokio's blocking task
//! executor, so the controller task never stalls the runtime while waiting on the link.

use super::{protocol::LINE_TERMINATOR, Connector, Transport};
use crate::error::{AppResult, SmuError};
use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Baud rate of the instrument's RS-232 interface.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Time allowed for a complete reply line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Granularity of individual blocking reads inside the overall read timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens serial ports with fixed link settings.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    read_timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl SerialConnector {
    /// Create a connector for the given baud rate with the default read timeout.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Transport = SerialTransport;

    async fn available_ports(&self) -> AppResult<Vec<String>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| SmuError::Io(io::Error::other(e)))?
            .map_err(|e| SmuError::PortNotFound(format!("port enumeration failed: {}", e)))?;

        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }

    async fn open(&self, port: &str) -> AppResult<SerialTransport> {
        let port_name = port.to_string();
        let baud_rate = self.baud_rate;

        let handle = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(POLL_INTERVAL)
                .open()
                .map_err(|e| SmuError::OpenFailed {
                    port: port_name.clone(),
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| SmuError::Io(io::Error::other(e)))??;

        debug!(port, baud_rate, "Serial port opened");
        Ok(SerialTransport {
            read_timeout: self.read_timeout,
            port: Arc::new(Mutex::new(handle)),
        })
    }
}

/// An open serial link.
///
/// The port sits behind `Arc<Mutex>` only so the blocking closures can own a handle; the
/// transport itself has a single owner.
pub struct SerialTransport {
    read_timeout: Duration,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_line(&mut self, line: &str) -> AppResult<()> {
        let port = Arc::clone(&self.port);
        let payload = format!("{}{}", line, LINE_TERMINATOR);
        let command = line.to_string();

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.write_all(payload.as_bytes())
                .and_then(|_| port.flush())
                .map_err(|e| SmuError::Write {
                    command,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| SmuError::Io(io::Error::other(e)))?
    }

    async fn read_line(&mut self) -> AppResult<Option<String>> {
        let port = Arc::clone(&self.port);
        let timeout = self.read_timeout;

        tokio::task::spawn_blocking(move || -> AppResult<Option<String>> {
            let mut port = port.blocking_lock();
            let mut line: Vec<u8> = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Ok(None);
                }

                match port.read(&mut buffer) {
                    Ok(1) => {
                        if buffer[0] == b'\n' {
                            break;
                        }
                        line.push(buffer[0]);
                    }
                    Ok(_) => {
                        return Err(SmuError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
                    }
                    // Poll interval is shorter than the overall timeout
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(SmuError::Io(e)),
                }
            }

            Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
        })
        .await
        .map_err(|e| SmuError::Io(io::Error::other(e)))?
    }

    async fn clear_input(&mut self) -> AppResult<()> {
        let port = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || {
            let port = port.blocking_lock();
            port.clear(ClearBuffer::Input)
                .map_err(|e| SmuError::Io(io::Error::other(e)))
        })
        .await
        .map_err(|e| SmuError::Io(io::Error::other(e)))?
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}
