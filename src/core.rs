//! Core data types shared by the controller, the sweep engine and the data sink.
//!
//! # Data Flow
//!
//! ```text
//! SmuDriver --[MeasurementPoint]--> DataSink (buffer or store)
//!                              \--> Telemetry (point events)
//! ```

use crate::error::SmuError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Measurement Data
// =============================================================================

/// A single paired reading taken at one sweep setpoint.
///
/// The instrument reports both the source value it actually applied and the measured
/// quantity, so the requested setpoint and the reported x are kept separately:
///
/// * `requested_x` - setpoint the sweep asked for, before clamping to the voltage limit
/// * `measured_x` - first field of the instrument reply, persisted as the `x` column
/// * `y` - second field of the instrument reply, persisted as the `y` column
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// UTC wall-clock time at which the setpoint was issued
    pub timestamp: DateTime<Utc>,
    /// Setpoint requested by the sweep engine
    pub requested_x: f64,
    /// Source value reported by the instrument (decimal string, as received)
    pub measured_x: String,
    /// Measured value reported by the instrument (decimal string, as received)
    pub y: String,
}

impl MeasurementPoint {
    /// Creates a point stamped with the current time.
    pub fn now(requested_x: f64, measured_x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            requested_x,
            measured_x: measured_x.into(),
            y: y.into(),
        }
    }

    /// ISO-8601 timestamp as written to the store and the telemetry stream.
    pub fn time_string(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

// =============================================================================
// Run State
// =============================================================================

/// Lifecycle of the single measurement run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run active; configuration may change.
    #[default]
    Idle,
    /// A sweep is in progress; configuration is frozen.
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
        }
    }
}

// =============================================================================
// Instrument / Persistence Modes
// =============================================================================

/// Remote-sense configuration of the source-measure unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMode {
    /// Local sense (remote sense off).
    #[default]
    #[serde(rename = "2wire")]
    TwoWire,
    /// Remote (Kelvin) sense.
    #[serde(rename = "4wire")]
    FourWire,
}

impl WireMode {
    /// Whether remote sense must be enabled for this mode.
    pub fn remote_sense(self) -> bool {
        matches!(self, WireMode::FourWire)
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMode::TwoWire => write!(f, "2wire"),
            WireMode::FourWire => write!(f, "4wire"),
        }
    }
}

impl FromStr for WireMode {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2wire" => Ok(WireMode::TwoWire),
            "4wire" => Ok(WireMode::FourWire),
            other => Err(SmuError::InvalidArgument(format!(
                "wire mode must be '2wire' or '4wire', got '{}'",
                other
            ))),
        }
    }
}

/// When measurement points reach the persistent store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Buffer in memory, write everything once at the end of the run.
    #[default]
    Batch,
    /// Write every point as soon as it is measured.
    Realtime,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::Batch => write!(f, "batch"),
            SaveMode::Realtime => write!(f, "realtime"),
        }
    }
}

impl FromStr for SaveMode {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(SaveMode::Batch),
            "realtime" => Ok(SaveMode::Realtime),
            other => Err(SmuError::InvalidArgument(format!(
                "save mode must be 'batch' or 'realtime', got '{}'",
                other
            ))),
        }
    }
}

/// Number of readings the instrument averages per measurement.
///
/// Only the repeat-filter counts offered to the operator are representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct AverageCount(u32);

impl AverageCount {
    /// Counts accepted by `set_average_count`.
    pub const SUPPORTED: [u32; 4] = [1, 3, 5, 10];

    /// Averaging disabled.
    pub const SINGLE: AverageCount = AverageCount(1);

    /// Raw reading count.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether the instrument filter should be enabled at all.
    pub fn is_filtered(self) -> bool {
        self.0 > 1
    }
}

impl Default for AverageCount {
    fn default() -> Self {
        AverageCount::SINGLE
    }
}

impl TryFrom<u32> for AverageCount {
    type Error = SmuError;

    fn try_from(count: u32) -> Result<Self, Self::Error> {
        if Self::SUPPORTED.contains(&count) {
            Ok(AverageCount(count))
        } else {
            Err(SmuError::InvalidArgument(format!(
                "average count must be one of {:?}, got {}",
                Self::SUPPORTED,
                count
            )))
        }
    }
}

impl From<AverageCount> for u32 {
    fn from(count: AverageCount) -> Self {
        count.0
    }
}

impl fmt::Display for AverageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
