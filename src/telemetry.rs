//! Live push channel for run progress.
//!
//! Each observer gets its own bounded `mpsc` queue. Publishing never waits: when an
//! observer's queue is full the event is dropped for that observer only, so a stalled consumer
//! can neither slow down the sweep nor starve the others. Observers whose receiver was dropped
//! are pruned on the next publish. Late subscribers only see events published after they
//! subscribed.
//!
//! Events serialize to the JSON shape consumed by front ends:
//!
//! ```json
//! {"status":"running","time":"...","x":"0.5","y":"0.0005","requested_x":0.5,"progress":0.66,
//!  "conditions":{"x_start":0.0,"x_end":1.0,"step":0.5,...}}
//! {"status":"done"}
//! {"status":"error","message":"..."}
//! ```

use crate::core::{AverageCount, MeasurementPoint, SaveMode, WireMode};
use crate::sweep_config::SweepConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-observer queue length.
pub const DEFAULT_CAPACITY: usize = 256;

/// Sweep parameters attached to every point event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    /// First setpoint
    pub x_start: f64,
    /// Last setpoint
    pub x_end: f64,
    /// Setpoint increment
    pub step: f64,
    /// Persistence mode of the run
    pub save_mode: SaveMode,
    /// Sensing mode
    pub wire_mode: WireMode,
    /// Voltage compliance
    pub voltage_limit: f64,
    /// Current compliance
    pub current_limit: f64,
    /// Readings averaged per point
    pub average_count: AverageCount,
}

impl From<&SweepConfig> for Conditions {
    fn from(config: &SweepConfig) -> Self {
        Self {
            x_start: config.start,
            x_end: config.end,
            step: config.step,
            save_mode: config.save_mode,
            wire_mode: config.wire_mode,
            voltage_limit: config.voltage_limit,
            current_limit: config.current_limit,
            average_count: config.average_count,
        }
    }
}

/// One measured point as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEvent {
    /// RFC 3339 timestamp
    pub time: String,
    /// Source value reported by the instrument
    pub x: String,
    /// Measured value reported by the instrument
    pub y: String,
    /// Setpoint the sweep asked for
    pub requested_x: f64,
    /// Fraction of the run completed, in `(0, 1]`
    pub progress: f64,
    /// Sweep parameters in effect
    pub conditions: Conditions,
}

impl PointEvent {
    /// Event for `point` at the given progress.
    pub fn new(point: &MeasurementPoint, progress: f64, conditions: Conditions) -> Self {
        Self {
            time: point.time_string(),
            x: point.measured_x.clone(),
            y: point.y.clone(),
            requested_x: point.requested_x,
            progress,
            conditions,
        }
    }
}

/// Messages on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TelemetryEvent {
    /// A point was measured.
    Running(PointEvent),
    /// The run ended normally or was stopped.
    Done,
    /// The run ended with a fault.
    Error {
        /// Description of the fault
        message: String,
    },
}

impl TelemetryEvent {
    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TelemetryEvent::Running(_))
    }

    /// JSON text of the event.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"unserializable event: {}"}}"#, e)
        })
    }
}

/// Fan-out of [`TelemetryEvent`]s to any number of observers.
pub struct Telemetry {
    subscribers: Mutex<Vec<mpsc::Sender<TelemetryEvent>>>,
    capacity: usize,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Telemetry {
    /// Creates a channel whose observers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> mpsc::Receiver<TelemetryEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers `event` to every observer without waiting.
    ///
    /// Returns the number of observers that received it.
    pub fn publish(&self, event: TelemetryEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Telemetry observer queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Telemetry observer disconnected");
                false
            }
        });

        delivered
    }

    /// Number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_event(progress: f64) -> TelemetryEvent {
        let point = MeasurementPoint::now(0.5, "0.5", "0.0005");
        TelemetryEvent::Running(PointEvent::new(
            &point,
            progress,
            Conditions::from(&SweepConfig::default()),
        ))
    }

    #[test]
    fn test_event_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&point_event(0.5).to_json()).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["x"], "0.5");
        assert_eq!(json["y"], "0.0005");
        assert_eq!(json["requested_x"], 0.5);
        assert_eq!(json["conditions"]["x_end"], 10.0);
        assert_eq!(json["conditions"]["wire_mode"], "2wire");
        assert_eq!(json["conditions"]["save_mode"], "batch");
        assert_eq!(json["conditions"]["average_count"], 1);

        assert_eq!(TelemetryEvent::Done.to_json(), r#"{"status":"done"}"#);
        assert_eq!(
            TelemetryEvent::Error {
                message: "boom".into()
            }
            .to_json(),
            r#"{"status":"error","message":"boom"}"#
        );
    }

    #[test]
    fn test_terminal_detection() {
        assert!(!point_event(0.1).is_terminal());
        assert!(TelemetryEvent::Done.is_terminal());
    }

    #[tokio::test]
    async fn test_fan_out_to_all_observers() {
        let telemetry = Telemetry::new(8);
        let mut a = telemetry.subscribe();
        let mut b = telemetry.subscribe();

        assert_eq!(telemetry.publish(TelemetryEvent::Done), 2);
        assert_eq!(a.recv().await, Some(TelemetryEvent::Done));
        assert_eq!(b.recv().await, Some(TelemetryEvent::Done));
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_observer_only() {
        let telemetry = Telemetry::new(1);
        let mut slow = telemetry.subscribe();
        let mut fast = telemetry.subscribe();

        assert_eq!(telemetry.publish(point_event(0.5)), 2);
        assert!(fast.recv().await.is_some());

        // slow still holds the first event
        assert_eq!(telemetry.publish(TelemetryEvent::Done), 1);
        assert_eq!(fast.recv().await, Some(TelemetryEvent::Done));
        assert!(matches!(slow.recv().await, Some(TelemetryEvent::Running(_))));
        assert!(slow.try_recv().is_err());
        assert_eq!(telemetry.subscriber_count(), 2);
    }

    #[test]
    fn test_closed_observers_are_pruned() {
        let telemetry = Telemetry::default();
        let rx = telemetry.subscribe();
        let _kept = telemetry.subscribe();
        drop(rx);

        assert_eq!(telemetry.publish(TelemetryEvent::Done), 1);
        assert_eq!(telemetry.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let telemetry = Telemetry::default();
        telemetry.publish(TelemetryEvent::Done);
        let mut late = telemetry.subscribe();
        assert!(late.try_recv().is_err());
    }
}
