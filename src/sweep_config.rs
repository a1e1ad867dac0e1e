//! Validated sweep and instrument parameters.
//!
//! `SweepConfig` is the configuration store of the controller. It only knows about value
//! domains; whether a change is allowed right now (run state) and pushing the change to the
//! instrument are the run controller's job, which calls the setters here only after both
//! succeeded so that a rejected change never leaves a partial update behind.

use crate::core::{AverageCount, SaveMode, WireMode};
use crate::error::{AppResult, SmuError};
use serde::{Deserialize, Serialize};

/// Default protection limits applied by the driver at initialization.
pub const DEFAULT_VOLTAGE_LIMIT: f64 = 20.0;
/// Default current compliance (10 mA).
pub const DEFAULT_CURRENT_LIMIT: f64 = 10e-3;

/// Sweep range, step and instrument settings for the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// First setpoint (V)
    #[serde(default = "default_start")]
    pub start: f64,
    /// Last setpoint, inclusive (V)
    #[serde(default = "default_end")]
    pub end: f64,
    /// Setpoint increment (V)
    #[serde(default = "default_step")]
    pub step: f64,
    /// Remote-sense configuration
    #[serde(default)]
    pub wire_mode: WireMode,
    /// Voltage protection limit; setpoints are clamped to +/- this value (V)
    #[serde(default = "default_voltage_limit")]
    pub voltage_limit: f64,
    /// Current compliance (A)
    #[serde(default = "default_current_limit")]
    pub current_limit: f64,
    /// Readings averaged per measurement
    #[serde(default)]
    pub average_count: AverageCount,
    /// Persistence timing
    #[serde(default)]
    pub save_mode: SaveMode,
}

fn default_start() -> f64 {
    0.0
}

fn default_end() -> f64 {
    10.0
}

fn default_step() -> f64 {
    0.1
}

fn default_voltage_limit() -> f64 {
    DEFAULT_VOLTAGE_LIMIT
}

fn default_current_limit() -> f64 {
    DEFAULT_CURRENT_LIMIT
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            step: default_step(),
            wire_mode: WireMode::default(),
            voltage_limit: default_voltage_limit(),
            current_limit: default_current_limit(),
            average_count: AverageCount::default(),
            save_mode: SaveMode::default(),
        }
    }
}

impl SweepConfig {
    /// Checks every invariant of the configuration.
    ///
    /// Setters already enforce these one value at a time; this is the gate `start()` and the
    /// configuration loader go through.
    pub fn validate(&self) -> AppResult<()> {
        Self::check_step(self.step)?;
        Self::check_range(self.start, self.end)?;
        Self::check_limit("voltage limit", self.voltage_limit)?;
        Self::check_limit("current limit", self.current_limit)?;
        Ok(())
    }

    /// Sets the setpoint increment. Requires `step > 0`.
    pub fn set_step(&mut self, step: f64) -> AppResult<()> {
        Self::check_step(step)?;
        self.step = step;
        Ok(())
    }

    /// Sets the sweep bounds. Requires `start <= end`.
    pub fn set_range(&mut self, start: f64, end: f64) -> AppResult<()> {
        Self::check_range(start, end)?;
        self.start = start;
        self.end = end;
        Ok(())
    }

    /// Sets the persistence timing.
    pub fn set_save_mode(&mut self, mode: SaveMode) {
        self.save_mode = mode;
    }

    /// Records the wire mode after the instrument accepted it.
    pub fn set_wire_mode(&mut self, mode: WireMode) {
        self.wire_mode = mode;
    }

    /// Records the voltage limit after the instrument accepted it.
    pub fn set_voltage_limit(&mut self, limit: f64) -> AppResult<()> {
        self.voltage_limit = Self::check_limit("voltage limit", limit)?;
        Ok(())
    }

    /// Records the current limit after the instrument accepted it.
    pub fn set_current_limit(&mut self, limit: f64) -> AppResult<()> {
        self.current_limit = Self::check_limit("current limit", limit)?;
        Ok(())
    }

    /// Records the averaging count after the instrument accepted it.
    pub fn set_average_count(&mut self, count: AverageCount) {
        self.average_count = count;
    }

    pub(crate) fn check_step(step: f64) -> AppResult<f64> {
        if !step.is_finite() || step <= 0.0 {
            return Err(SmuError::InvalidArgument(format!(
                "step must be a positive number, got {}",
                step
            )));
        }
        Ok(step)
    }

    pub(crate) fn check_range(start: f64, end: f64) -> AppResult<()> {
        if !start.is_finite() || !end.is_finite() {
            return Err(SmuError::InvalidArgument(format!(
                "range bounds must be finite, got {}..{}",
                start, end
            )));
        }
        if start > end {
            return Err(SmuError::InvalidArgument(format!(
                "start ({}) must not exceed end ({})",
                start, end
            )));
        }
        Ok(())
    }

    pub(crate) fn check_limit(name: &str, limit: f64) -> AppResult<f64> {
        if !limit.is_finite() || limit <= 0.0 {
            return Err(SmuError::InvalidArgument(format!(
                "{} must be a positive number, got {}",
                name, limit
            )));
        }
        Ok(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.voltage_limit, 20.0);
        assert_eq!(config.save_mode, SaveMode::Batch);
        assert_eq!(config.wire_mode, WireMode::TwoWire);
    }

    #[test]
    fn test_step_must_be_positive() {
        let mut config = SweepConfig::default();
        assert!(matches!(config.set_step(0.0), Err(SmuError::InvalidArgument(_))));
        assert!(matches!(config.set_step(-0.5), Err(SmuError::InvalidArgument(_))));
        assert!(config.set_step(f64::NAN).is_err());
        assert_eq!(config.step, 0.1);

        config.set_step(0.25).unwrap();
        assert_eq!(config.step, 0.25);
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let mut config = SweepConfig::default();
        assert!(matches!(
            config.set_range(2.0, 1.0),
            Err(SmuError::InvalidArgument(_))
        ));
        assert_eq!((config.start, config.end), (0.0, 10.0));

        config.set_range(-1.0, -1.0).unwrap();
        assert_eq!((config.start, config.end), (-1.0, -1.0));
    }

    #[test]
    fn test_limits_must_be_positive() {
        let mut config = SweepConfig::default();
        assert!(config.set_voltage_limit(0.0).is_err());
        assert!(config.set_current_limit(f64::INFINITY).is_err());
        config.set_voltage_limit(5.0).unwrap();
        assert_eq!(config.voltage_limit, 5.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SweepConfig = serde_json::from_str(r#"{"start": 1.0, "end": 2.0}"#).unwrap();
        assert_eq!(config.step, 0.1);
        assert_eq!(config.average_count, AverageCount::SINGLE);
        assert!(config.validate().is_ok());
    }
}
