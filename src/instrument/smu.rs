//! Source-measure unit driver.
//!
//! `SmuDriver` is the instrument session: it owns the open transport, the identity string
//! read at initialization and the protection/averaging/sense settings last applied to the
//! device. Every exchange waits a settle delay after the write; the instrument needs this time
//! to process a command before the next one is safe to send.
//!
//! ## Initialization sequence
//!
//! ```text
//! *RST
//! :SOUR:FUNC:MODE VOLT
//! :SYST:RSEN OFF
//! :SOUR:VOLT:PROT 20
//! :SENS:VOLT:PROT 2e1
//! :SENS:CURR:PROT 1e-2
//! *IDN?
//! ```

use super::{
    protocol::{parse_pair, SmuCommand},
    Connector, PortSelector, Transport,
};
use crate::core::{AverageCount, MeasurementPoint, WireMode};
use crate::error::{AppResult, SmuError};
use crate::sweep_config::{DEFAULT_CURRENT_LIMIT, DEFAULT_VOLTAGE_LIMIT};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settle delays required by the instrument between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTiming {
    /// After configuration commands.
    pub command: Duration,
    /// After changing the source setpoint, before measuring.
    pub source: Duration,
    /// After sending a measurement query, before reading the reply.
    pub query: Duration,
}

impl SettleTiming {
    /// Delays of the physical instrument.
    pub const INSTRUMENT: SettleTiming = SettleTiming {
        command: Duration::from_millis(50),
        source: Duration::from_millis(500),
        query: Duration::from_millis(500),
    };

    /// No delays, for scripted instruments.
    pub const NONE: SettleTiming = SettleTiming {
        command: Duration::ZERO,
        source: Duration::ZERO,
        query: Duration::ZERO,
    };
}

impl Default for SettleTiming {
    fn default() -> Self {
        SettleTiming::INSTRUMENT
    }
}

/// Settings last pushed to the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedSettings {
    /// Remote-sense state
    pub wire_mode: WireMode,
    /// Voltage protection; also the setpoint clamp
    pub voltage_limit: f64,
    /// Current compliance
    pub current_limit: f64,
    /// Averaging filter count
    pub average_count: AverageCount,
}

impl Default for AppliedSettings {
    fn default() -> Self {
        Self {
            wire_mode: WireMode::TwoWire,
            voltage_limit: DEFAULT_VOLTAGE_LIMIT,
            current_limit: DEFAULT_CURRENT_LIMIT,
            average_count: AverageCount::SINGLE,
        }
    }
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// An initialized instrument session.
pub struct SmuDriver<T: Transport> {
    transport: T,
    port: String,
    identity: String,
    applied: AppliedSettings,
    timing: SettleTiming,
}

impl<T: Transport> SmuDriver<T> {
    /// Opens the selected port and brings the instrument to a known state.
    ///
    /// With [`PortSelector::Auto`] the first enumerated device is used.
    pub async fn open<C>(connector: &C, selector: &PortSelector, timing: SettleTiming) -> AppResult<Self>
    where
        C: Connector<Transport = T>,
    {
        let port = match selector {
            PortSelector::Named(name) => name.clone(),
            PortSelector::Auto => {
                let ports = connector.available_ports().await?;
                let first = ports
                    .into_iter()
                    .next()
                    .ok_or_else(|| SmuError::PortNotFound("no serial devices available".into()))?;
                warn!(port = %first, "No port configured, using first enumerated device");
                first
            }
        };

        info!(port = %port, "Opening source-measure unit");
        let transport = connector.open(&port).await?;
        let mut driver = Self {
            transport,
            port,
            identity: String::new(),
            applied: AppliedSettings::default(),
            timing,
        };
        driver.initialize().await?;
        Ok(driver)
    }

    async fn initialize(&mut self) -> AppResult<()> {
        let defaults = AppliedSettings::default();

        self.transport.clear_input().await?;
        self.send_command(&SmuCommand::Reset).await?;
        self.send_command(&SmuCommand::SourceVoltageMode).await?;
        self.send_command(&SmuCommand::RemoteSense(defaults.wire_mode.remote_sense()))
            .await?;
        self.send_command(&SmuCommand::SourceVoltageProtection(defaults.voltage_limit))
            .await?;
        self.send_command(&SmuCommand::VoltageProtection(defaults.voltage_limit))
            .await?;
        self.send_command(&SmuCommand::CurrentProtection(defaults.current_limit))
            .await?;
        self.applied = defaults;

        self.identity = self.query_line(&SmuCommand::Identify, self.timing.command).await?;
        info!(port = %self.port, identity = %self.identity, "Source-measure unit ready");
        Ok(())
    }

    /// Identity string reported by `*IDN?`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Device the session was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Settings last applied to the instrument.
    pub fn applied(&self) -> &AppliedSettings {
        &self.applied
    }

    /// Writes one command and waits the command settle delay.
    pub async fn send_command(&mut self, command: &SmuCommand) -> AppResult<()> {
        let line = command.to_string();
        self.transport.write_line(&line).await?;
        debug!(command = %line, "Sent");
        settle(self.timing.command).await;
        Ok(())
    }

    async fn query_line(&mut self, command: &SmuCommand, delay: Duration) -> AppResult<String> {
        let line = command.to_string();
        self.transport.clear_input().await?;
        self.transport.write_line(&line).await?;
        settle(delay).await;

        match self.transport.read_line().await? {
            Some(reply) => {
                debug!(command = %line, reply = %reply, "Received");
                Ok(reply)
            }
            None => Err(SmuError::MeasurementTimeout {
                command: line,
                timeout: self.transport.read_timeout(),
            }),
        }
    }

    /// Sends a query and splits the reply into its `(x, y)` fields.
    pub async fn query_value(&mut self, command: &SmuCommand) -> AppResult<(String, String)> {
        let reply = self.query_line(command, self.timing.query).await?;
        parse_pair(command, &reply)
    }

    /// Applies a source setpoint, clamped into `[-limit, +limit]`, and waits for it to settle.
    ///
    /// Returns the value actually written.
    pub async fn set_source_setpoint(&mut self, setpoint: f64) -> AppResult<f64> {
        let limit = self.applied.voltage_limit;
        let applied = setpoint.clamp(-limit, limit);
        if applied != setpoint {
            warn!(requested = setpoint, applied, limit, "Setpoint clamped to voltage limit");
        }

        let line = SmuCommand::SourceVoltage(applied).to_string();
        self.transport.write_line(&line).await?;
        debug!(command = %line, "Sent");
        settle(self.timing.source).await;
        Ok(applied)
    }

    /// Drives one setpoint and reads the resulting measurement.
    pub async fn acquire(&mut self, setpoint: f64) -> AppResult<MeasurementPoint> {
        let timestamp = chrono::Utc::now();
        self.set_source_setpoint(setpoint).await?;
        let (measured_x, y) = self.query_value(&SmuCommand::MeasureCurrent).await?;

        Ok(MeasurementPoint {
            timestamp,
            requested_x: setpoint,
            measured_x,
            y,
        })
    }

    /// Disables the source output.
    pub async fn shutdown_output(&mut self) -> AppResult<()> {
        info!(port = %self.port, "Disabling source output");
        self.send_command(&SmuCommand::OutputOff).await
    }

    /// Switches remote sense for the given wire mode.
    pub async fn apply_wire_mode(&mut self, mode: WireMode) -> AppResult<()> {
        self.send_command(&SmuCommand::RemoteSense(mode.remote_sense()))
            .await?;
        self.applied.wire_mode = mode;
        info!(%mode, "Wire mode applied");
        Ok(())
    }

    /// Sets the voltage compliance, which also becomes the setpoint clamp.
    pub async fn apply_voltage_limit(&mut self, limit: f64) -> AppResult<()> {
        self.send_command(&SmuCommand::VoltageProtection(limit)).await?;
        self.applied.voltage_limit = limit;
        info!(limit, "Voltage limit applied");
        Ok(())
    }

    /// Sets the current compliance.
    pub async fn apply_current_limit(&mut self, limit: f64) -> AppResult<()> {
        self.send_command(&SmuCommand::CurrentProtection(limit)).await?;
        self.applied.current_limit = limit;
        info!(limit, "Current limit applied");
        Ok(())
    }

    /// Configures the repeating average filter.
    pub async fn apply_average_count(&mut self, count: AverageCount) -> AppResult<()> {
        self.send_command(&SmuCommand::AverageRepeat).await?;
        self.send_command(&SmuCommand::AverageCount(count.get())).await?;
        self.send_command(&SmuCommand::AverageState(count.is_filtered()))
            .await?;
        self.applied.average_count = count;
        info!(%count, "Average count applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockConnector, MockInstrument};
    use tracing_test::traced_test;

    async fn open_mock(instrument: &MockInstrument) -> SmuDriver<crate::instrument::MockTransport> {
        let connector = MockConnector::new(instrument.clone());
        SmuDriver::open(&connector, &PortSelector::Auto, SettleTiming::NONE)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_runs_initialization_sequence() {
        let instrument = MockInstrument::new();
        let driver = open_mock(&instrument).await;

        assert_eq!(driver.port(), "/dev/mock0");
        assert_eq!(driver.identity(), MockInstrument::IDENTITY);
        assert_eq!(
            instrument.written(),
            vec![
                "*RST",
                ":SOUR:FUNC:MODE VOLT",
                ":SYST:RSEN OFF",
                ":SOUR:VOLT:PROT 20",
                ":SENS:VOLT:PROT 2e1",
                ":SENS:CURR:PROT 1e-2",
                "*IDN?",
            ]
        );
    }

    #[tokio::test]
    async fn test_open_without_ports_fails() {
        let connector = MockConnector::new(MockInstrument::new()).with_ports(Vec::new());
        let result = SmuDriver::open(&connector, &PortSelector::Auto, SettleTiming::NONE).await;
        assert!(matches!(result, Err(SmuError::PortNotFound(_))));
    }

    #[tokio::test]
    async fn test_open_named_port_failure() {
        let connector = MockConnector::new(MockInstrument::new());
        let selector = PortSelector::Named("/dev/missing".into());
        let result = SmuDriver::open(&connector, &selector, SettleTiming::NONE).await;
        assert!(matches!(result, Err(SmuError::OpenFailed { .. })));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_setpoint_is_clamped_to_limit() {
        let instrument = MockInstrument::new();
        let mut driver = open_mock(&instrument).await;
        driver.apply_voltage_limit(5.0).await.unwrap();
        instrument.clear_log();

        assert_eq!(driver.set_source_setpoint(7.5).await.unwrap(), 5.0);
        assert_eq!(driver.set_source_setpoint(-9.0).await.unwrap(), -5.0);
        assert_eq!(driver.set_source_setpoint(2.5).await.unwrap(), 2.5);
        assert_eq!(
            instrument.written(),
            vec![":SOUR:VOLT 5", ":SOUR:VOLT -5", ":SOUR:VOLT 2.5"]
        );
        assert!(logs_contain("Setpoint clamped to voltage limit"));
    }

    #[tokio::test]
    async fn test_acquire_keeps_requested_and_measured_x() {
        let instrument = MockInstrument::new();
        let mut driver = open_mock(&instrument).await;
        driver.apply_voltage_limit(1.0).await.unwrap();

        let point = driver.acquire(3.0).await.unwrap();
        assert_eq!(point.requested_x, 3.0);
        assert_eq!(point.measured_x, "1");
        assert_eq!(point.y, "0.001");
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let instrument = MockInstrument::new();
        let mut driver = open_mock(&instrument).await;
        instrument.fail_measurement(1);

        let err = driver.acquire(0.5).await.unwrap_err();
        assert!(matches!(err, SmuError::MeasurementTimeout { .. }));
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let instrument = MockInstrument::new();
        let mut driver = open_mock(&instrument).await;
        instrument.push_reply("garbage");

        let err = driver.query_value(&SmuCommand::MeasureCurrent).await.unwrap_err();
        assert!(matches!(err, SmuError::MalformedReply { .. }));
    }

    #[tokio::test]
    async fn test_average_count_commands() {
        let instrument = MockInstrument::new();
        let mut driver = open_mock(&instrument).await;
        instrument.clear_log();

        driver.apply_average_count(AverageCount::try_from(5).unwrap()).await.unwrap();
        assert_eq!(
            instrument.written(),
            vec![":SENS:AVER:TCON REP", ":SENS:AVER:COUN 5", ":SENS:AVER:STAT ON"]
        );
        assert_eq!(driver.applied().average_count.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_point_waits_both_settle_delays() {
        let instrument = MockInstrument::new();
        let connector = MockConnector::new(instrument.clone());
        let mut driver = SmuDriver::open(&connector, &PortSelector::Auto, SettleTiming::INSTRUMENT)
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        driver.acquire(1.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
