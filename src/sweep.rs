//! Sweep point generation and run outcomes.
//!
//! The plan is computed once from a validated [`SweepConfig`] when a run starts; the run
//! controller then walks it point by point, driving the instrument between cancellation checks.

use crate::{
    error::{AppResult, SmuError},
    sweep_config::SweepConfig,
};
use std::fmt;

/// Relative tolerance absorbing floating-point error in `(end - start) / step`, so that
/// nominally exact divisions such as `0.3 / 0.1` include the final point.
const STEP_TOLERANCE: f64 = 1e-9;

/// Upper bound on the points of a single run.
pub const MAX_POINTS: usize = 1_000_000;

/// Setpoints of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPlan {
    start: f64,
    end: f64,
    step: f64,
    total: usize,
}

impl SweepPlan {
    /// Builds the plan for an already validated configuration.
    pub fn new(config: &SweepConfig) -> AppResult<Self> {
        Self::from_bounds(config.start, config.end, config.step)
    }

    /// Plan for `start..=end` in increments of `step` (`step > 0`, `start <= end`).
    ///
    /// Fails with `InvalidArgument` when the range holds more than [`MAX_POINTS`] steps.
    pub fn from_bounds(start: f64, end: f64, step: f64) -> AppResult<Self> {
        let ratio = (end - start) / step;
        let slack = STEP_TOLERANCE * ratio.abs().max(1.0);
        let intervals = (ratio + slack).floor().max(0.0);
        if !intervals.is_finite() || intervals >= MAX_POINTS as f64 {
            return Err(SmuError::InvalidArgument(format!(
                "sweep from {} to {} in steps of {} exceeds {} points",
                start, end, step, MAX_POINTS
            )));
        }
        Ok(Self {
            start,
            end,
            step,
            total: intervals as usize + 1,
        })
    }

    /// Number of points the run will take.
    pub fn total_steps(&self) -> usize {
        self.total
    }

    /// Setpoint of point `index`, never beyond `end`.
    pub fn setpoint(&self, index: usize) -> f64 {
        (self.start + index as f64 * self.step).min(self.end)
    }

    /// Fraction of the run completed once point `index` is done.
    pub fn progress(&self, index: usize) -> f64 {
        (index + 1) as f64 / self.total as f64
    }

    /// Iterates `(index, setpoint)` over the whole plan.
    pub fn points(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.total).map(move |i| (i, self.setpoint(i)))
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    /// Every planned point was measured.
    Completed {
        /// Points taken
        points: usize,
    },
    /// `stop()` or `shutdown()` ended the run between points.
    Cancelled {
        /// Points taken before cancellation
        points: usize,
    },
    /// A measurement, device or storage error ended the run.
    Faulted {
        /// Points taken before the fault
        points: usize,
        /// Error description reported to observers
        reason: String,
    },
}

impl fmt::Display for SweepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepOutcome::Completed { points } => write!(f, "completed ({} points)", points),
            SweepOutcome::Cancelled { points } => write!(f, "cancelled ({} points)", points),
            SweepOutcome::Faulted { points, reason } => {
                write!(f, "faulted after {} points: {}", points, reason)
            }
        }
    }
}
