//! Instrument communication.
//!
//! The driver is split in three tiers, in the spirit of the adapter/instrument split used for
//! the other serial instruments:
//! - [`Transport`]: line-oriented I/O over one open link (serial port, mock)
//! - [`Connector`]: enumerates and opens links
//! - [`SmuDriver`]: protocol sequencing, settle timing and reply parsing on top of a transport

pub mod mock;
pub mod protocol;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod smu;

use crate::error::AppResult;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub use mock::{MockConnector, MockInstrument, MockTransport};
pub use protocol::SmuCommand;
#[cfg(feature = "instrument_serial")]
pub use serial::{SerialConnector, SerialTransport};
pub use smu::{SettleTiming, SmuDriver};

/// Line-oriented access to an open instrument link.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Writes one line; the terminator is appended by the transport.
    async fn write_line(&mut self, line: &str) -> AppResult<()>;

    /// Reads one line without its terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within the link's read timeout.
    async fn read_line(&mut self) -> AppResult<Option<String>>;

    /// Discards any bytes already waiting in the receive buffer.
    async fn clear_input(&mut self) -> AppResult<()>;

    /// Time [`Transport::read_line`] waits for a complete line.
    fn read_timeout(&self) -> Duration;
}

/// Discovers and opens instrument links.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by [`Connector::open`].
    type Transport: Transport;

    /// Names of the devices currently available, in enumeration order.
    async fn available_ports(&self) -> AppResult<Vec<String>>;

    /// Opens the named device.
    async fn open(&self, port: &str) -> AppResult<Self::Transport>;
}

/// Which serial device `init()` should open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PortSelector {
    /// First device in enumeration order. Non-deterministic on hosts with several
    /// adapters; prefer [`PortSelector::Named`].
    #[default]
    Auto,
    /// Explicit device path (e.g. `/dev/ttyUSB0`, `COM3`).
    Named(String),
}

impl PortSelector {
    /// Builds a selector from an optional configured port name.
    pub fn from_option(port: Option<String>) -> Self {
        match port {
            Some(name) if !name.trim().is_empty() => PortSelector::Named(name),
            _ => PortSelector::Auto,
        }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSelector::Auto => write!(f, "<first available>"),
            PortSelector::Named(name) => write!(f, "{}", name),
        }
    }
}
