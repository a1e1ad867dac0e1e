//! Message types for actor-based communication
//!
//! This module defines the command and response types exchanged between
//! [`ControllerHandle`](crate::app::ControllerHandle) and the
//! [`RunController`](crate::app_actor::RunController) task. Every command carries a oneshot
//! sender for its reply; the helper constructors return the command together with the matching
//! receiver.

use crate::core::{RunState, SaveMode, WireMode};
use crate::error::AppResult;
use crate::instrument::PortSelector;
use crate::sweep_config::SweepConfig;
use crate::telemetry::TelemetryEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Status word returned by lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    /// Instrument initialized, no run active
    Standby,
    /// Run accepted
    Started,
    /// Cancellation requested (or nothing was running)
    Stopped,
}

/// Reply to `start()` and `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Control state after the request
    pub status: ControlStatus,
}

impl Ack {
    /// `{"status":"started"}`
    pub fn started() -> Self {
        Self {
            status: ControlStatus::Started,
        }
    }

    /// `{"status":"stopped"}`
    pub fn stopped() -> Self {
        Self {
            status: ControlStatus::Stopped,
        }
    }
}

/// Reply to `init()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Always `standby` after a successful init
    pub status: ControlStatus,
    /// `*IDN?` reply of the instrument
    pub device_identity: String,
    /// Device the session was opened on
    pub port: String,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Whether a sweep is running
    pub state: RunState,
    /// Current sweep configuration
    pub config: SweepConfig,
    /// Points waiting for a batch flush
    pub buffered_points: usize,
    /// `*IDN?` reply of the open session, if any
    pub device_identity: Option<String>,
    /// Device of the open session, if any
    pub port: Option<String>,
}

/// Commands that can be sent to the RunController
#[derive(Debug)]
pub enum ControlCommand {
    /// Open the instrument and run the initialization sequence
    Init {
        /// Device to open
        port: PortSelector,
        /// Reply channel
        response: oneshot::Sender<AppResult<InitReport>>,
    },

    /// Begin a sweep with the current configuration
    Start {
        /// Reply channel
        response: oneshot::Sender<AppResult<Ack>>,
    },

    /// Cancel the active sweep
    Stop {
        /// Reply channel, answered once the controller is idle
        response: oneshot::Sender<Ack>,
    },

    /// Change the setpoint increment
    SetStep {
        /// New increment, must be positive
        step: f64,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change the sweep bounds
    SetRange {
        /// First setpoint
        start: f64,
        /// Last setpoint, not below `start`
        end: f64,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change when points are persisted
    SetSaveMode {
        /// New mode
        mode: SaveMode,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Switch 2-wire / 4-wire sensing
    SetWireMode {
        /// New mode
        mode: WireMode,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change the voltage compliance
    SetVoltageLimit {
        /// New limit, must be positive
        limit: f64,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change the current compliance
    SetCurrentLimit {
        /// New limit, must be positive
        limit: f64,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change the measurement averaging
    SetAverageCount {
        /// One of 1, 3, 5 or 10
        count: u32,
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Discard buffered points
    ClearData {
        /// Reply channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Get a status snapshot
    Status {
        /// Reply channel
        response: oneshot::Sender<RunStatus>,
    },

    /// Subscribe to the telemetry channel
    Subscribe {
        /// Reply channel
        response: oneshot::Sender<mpsc::Receiver<TelemetryEvent>>,
    },

    /// Stop any run and terminate the controller task
    Shutdown {
        /// Reply channel
        response: oneshot::Sender<()>,
    },
}

impl ControlCommand {
    /// Short name used in logs and rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Init { .. } => "init",
            ControlCommand::Start { .. } => "start",
            ControlCommand::Stop { .. } => "stop",
            ControlCommand::SetStep { .. } => "set step",
            ControlCommand::SetRange { .. } => "set range",
            ControlCommand::SetSaveMode { .. } => "set save mode",
            ControlCommand::SetWireMode { .. } => "set wire mode",
            ControlCommand::SetVoltageLimit { .. } => "set voltage limit",
            ControlCommand::SetCurrentLimit { .. } => "set current limit",
            ControlCommand::SetAverageCount { .. } => "set average count",
            ControlCommand::ClearData { .. } => "clear data",
            ControlCommand::Status { .. } => "status",
            ControlCommand::Subscribe { .. } => "subscribe",
            ControlCommand::Shutdown { .. } => "shutdown",
        }
    }

    /// Helper to create an Init command
    pub fn init(port: PortSelector) -> (Self, oneshot::Receiver<AppResult<InitReport>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Init { port, response: tx }, rx)
    }

    /// Helper to create a Start command
    pub fn start() -> (Self, oneshot::Receiver<AppResult<Ack>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { response: tx }, rx)
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<Ack>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a SetStep command
    pub fn set_step(step: f64) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetStep { step, response: tx }, rx)
    }

    /// Helper to create a SetRange command
    pub fn set_range(start: f64, end: f64) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetRange {
                start,
                end,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SetSaveMode command
    pub fn set_save_mode(mode: SaveMode) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetSaveMode { mode, response: tx }, rx)
    }

    /// Helper to create a SetWireMode command
    pub fn set_wire_mode(mode: WireMode) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetWireMode { mode, response: tx }, rx)
    }

    /// Helper to create a SetVoltageLimit command
    pub fn set_voltage_limit(limit: f64) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetVoltageLimit { limit, response: tx }, rx)
    }

    /// Helper to create a SetCurrentLimit command
    pub fn set_current_limit(limit: f64) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetCurrentLimit { limit, response: tx }, rx)
    }

    /// Helper to create a SetAverageCount command
    pub fn set_average_count(count: u32) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetAverageCount { count, response: tx }, rx)
    }

    /// Helper to create a ClearData command
    pub fn clear_data() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ClearData { response: tx }, rx)
    }

    /// Helper to create a Status command
    pub fn status() -> (Self, oneshot::Receiver<RunStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::Status { response: tx }, rx)
    }

    /// Helper to create a Subscribe command
    pub fn subscribe() -> (Self, oneshot::Receiver<mpsc::Receiver<TelemetryEvent>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Subscribe { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_json() {
        assert_eq!(
            serde_json::to_string(&Ack::started()).unwrap(),
            r#"{"status":"started"}"#
        );
        assert_eq!(
            serde_json::to_string(&Ack::stopped()).unwrap(),
            r#"{"status":"stopped"}"#
        );
    }

    #[test]
    fn test_init_report_json() {
        let report = InitReport {
            status: ControlStatus::Standby,
            device_identity: "KEITHLEY".into(),
            port: "/dev/ttyUSB0".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "standby");
        assert_eq!(json["device_identity"], "KEITHLEY");
    }

    #[tokio::test]
    async fn test_helper_pairs_response_channel() {
        let (cmd, rx) = ControlCommand::set_step(0.5);
        assert_eq!(cmd.name(), "set step");
        match cmd {
            ControlCommand::SetStep { step, response } => {
                assert_eq!(step, 0.5);
                response.send(Ok(())).unwrap();
            }
            other => panic!("unexpected command {}", other.name()),
        }
        assert!(rx.await.unwrap().is_ok());
    }
}
