//! Scripted source-measure unit for tests and dry runs.
//!
//! `MockInstrument` answers the command set the way a real unit would: `*IDN?` returns a fixed
//! identity and `:MEAS:CURR?` returns `<source>,<source / 1000>,...` for the last applied
//! setpoint (a 1 kOhm load). It also provides:
//! - Call logging for test verification
//! - Failure injection (missing reply on the Nth measurement, rejected writes)
//! - Scripted replies overriding the generated ones

use super::{Connector, Transport};
use crate::error::{AppResult, SmuError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    written: Vec<String>,
    input: VecDeque<String>,
    scripted: VecDeque<String>,
    source: f64,
    measurements: u32,
    silent_measurement: Option<u32>,
    reject_writes: bool,
    opened: u32,
}

/// Shared handle to the simulated instrument; clones observe the same device.
#[derive(Clone, Default)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Identity returned for `*IDN?`.
    pub const IDENTITY: &'static str =
        "KEITHLEY INSTRUMENTS INC.,MODEL 2400,0000000,C30 Mar 17 2006 09:29:29/A02 /K/J";

    /// Create a new simulated instrument
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line written so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Clear the write log
    pub fn clear_log(&self) {
        self.state.lock().written.clear();
    }

    /// Number of measurement queries received.
    pub fn measurement_count(&self) -> u32 {
        self.state.lock().measurements
    }

    /// Number of times a transport was opened on this instrument.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opened
    }

    /// Leave the `n`th measurement query (1-based, counted over the instrument's lifetime)
    /// unanswered, so the reader times out.
    pub fn fail_measurement(&self, n: u32) {
        self.state.lock().silent_measurement = Some(n);
    }

    /// Make every subsequent write fail.
    pub fn reject_writes(&self, reject: bool) {
        self.state.lock().reject_writes = reject;
    }

    /// Queue a literal reply for the next query instead of the generated one.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.state.lock().scripted.push_back(reply.into());
    }

    fn handle_line(&self, line: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.reject_writes {
            return Err(SmuError::Write {
                command: line.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        state.written.push(line.to_string());

        if let Some(value) = line.strip_prefix(":SOUR:VOLT ") {
            if let Ok(v) = value.trim().parse::<f64>() {
                state.source = v;
            }
            return Ok(());
        }

        match line {
            "*IDN?" => {
                let reply = state
                    .scripted
                    .pop_front()
                    .unwrap_or_else(|| Self::IDENTITY.to_string());
                state.input.push_back(reply);
            }
            ":MEAS:CURR?" => {
                state.measurements += 1;
                if state.silent_measurement == Some(state.measurements) {
                    return Ok(());
                }
                let reply = match state.scripted.pop_front() {
                    Some(reply) => reply,
                    None => {
                        let v = state.source;
                        format!("{},{},9.91e37,0,21504", v, v / 1000.0)
                    }
                };
                state.input.push_back(reply);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Transport connected to a [`MockInstrument`].
pub struct MockTransport {
    instrument: MockInstrument,
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_line(&mut self, line: &str) -> AppResult<()> {
        self.instrument.handle_line(line)
    }

    async fn read_line(&mut self) -> AppResult<Option<String>> {
        Ok(self.instrument.state.lock().input.pop_front())
    }

    async fn clear_input(&mut self) -> AppResult<()> {
        self.instrument.state.lock().input.clear();
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Connector exposing a [`MockInstrument`] under fake device names.
#[derive(Clone)]
pub struct MockConnector {
    instrument: MockInstrument,
    ports: Vec<String>,
}

impl MockConnector {
    /// Connector with a single device, `/dev/mock0`.
    pub fn new(instrument: MockInstrument) -> Self {
        Self {
            instrument,
            ports: vec!["/dev/mock0".to_string()],
        }
    }

    /// Replace the enumerated device list.
    pub fn with_ports(mut self, ports: Vec<String>) -> Self {
        self.ports = ports;
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(self.ports.clone())
    }

    async fn open(&self, port: &str) -> AppResult<MockTransport> {
        if !self.ports.iter().any(|p| p == port) {
            return Err(SmuError::OpenFailed {
                port: port.to_string(),
                reason: "no such device".to_string(),
            });
        }
        self.instrument.state.lock().opened += 1;
        Ok(MockTransport {
            instrument: self.instrument.clone(),
        })
    }
}
