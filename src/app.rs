//! Client handle for the run controller.
//!
//! `ControllerHandle` is a cheap, cloneable front end to the [`RunController`] task. Each
//! method sends one [`ControlCommand`] and awaits its reply. Transports (a websocket server,
//! a CLI, tests) hold handles; they never touch controller state directly.

use crate::{
    app_actor::RunController,
    core::{SaveMode, WireMode},
    error::{AppResult, SmuError},
    instrument::{Connector, PortSelector},
    messages::{Ack, ControlCommand, InitReport, RunStatus},
    telemetry::TelemetryEvent,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Default command queue length.
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Sender side of the controller's command channel.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<ControlCommand>,
}

impl ControllerHandle {
    /// Spawns `controller` on the current runtime and returns a handle to it.
    pub fn spawn<C: Connector>(
        controller: RunController<C>,
        command_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(command_capacity.max(1));
        let task = tokio::spawn(controller.run(command_rx));
        (Self { command_tx }, task)
    }

    async fn request<R>(&self, (command, response): (ControlCommand, oneshot::Receiver<R>)) -> AppResult<R> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SmuError::ControllerUnavailable)?;
        response.await.map_err(|_| SmuError::ControllerUnavailable)
    }

    /// Opens the instrument and runs its initialization sequence.
    pub async fn init(&self, port: PortSelector) -> AppResult<InitReport> {
        self.request(ControlCommand::init(port)).await?
    }

    /// Starts a sweep; returns once the run has been accepted.
    pub async fn start(&self) -> AppResult<Ack> {
        self.request(ControlCommand::start()).await?
    }

    /// Cancels the active sweep; returns once the controller is idle again.
    pub async fn stop(&self) -> AppResult<Ack> {
        self.request(ControlCommand::stop()).await
    }

    /// Sets the setpoint increment.
    pub async fn set_step(&self, step: f64) -> AppResult<()> {
        self.request(ControlCommand::set_step(step)).await?
    }

    /// Sets the sweep bounds; `start` must not exceed `end`.
    pub async fn set_range(&self, start: f64, end: f64) -> AppResult<()> {
        self.request(ControlCommand::set_range(start, end)).await?
    }

    /// Chooses batch or realtime persistence for the next run.
    pub async fn set_save_mode(&self, mode: SaveMode) -> AppResult<()> {
        self.request(ControlCommand::set_save_mode(mode)).await?
    }

    /// Switches 2-wire / 4-wire sensing on the instrument.
    pub async fn set_wire_mode(&self, mode: WireMode) -> AppResult<()> {
        self.request(ControlCommand::set_wire_mode(mode)).await?
    }

    /// Sets the voltage compliance; setpoints are clamped to it.
    pub async fn set_voltage_limit(&self, limit: f64) -> AppResult<()> {
        self.request(ControlCommand::set_voltage_limit(limit)).await?
    }

    /// Sets the current compliance.
    pub async fn set_current_limit(&self, limit: f64) -> AppResult<()> {
        self.request(ControlCommand::set_current_limit(limit)).await?
    }

    /// Sets the averaging count; only 1, 3, 5 and 10 are accepted.
    pub async fn set_average_count(&self, count: u32) -> AppResult<()> {
        self.request(ControlCommand::set_average_count(count)).await?
    }

    /// Discards buffered points.
    pub async fn clear_data(&self) -> AppResult<()> {
        self.request(ControlCommand::clear_data()).await?
    }

    /// Snapshot of run state, configuration and session.
    pub async fn status(&self) -> AppResult<RunStatus> {
        self.request(ControlCommand::status()).await
    }

    /// Registers a telemetry observer.
    pub async fn subscribe(&self) -> AppResult<mpsc::Receiver<TelemetryEvent>> {
        self.request(ControlCommand::subscribe()).await
    }

    /// Stops any run (with the full shutdown sequence) and ends the controller task.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(ControlCommand::shutdown()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunState;
    use crate::data::TsvStore;
    use crate::instrument::{MockConnector, MockInstrument, SettleTiming};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let dir = tempdir().unwrap();
        let controller = RunController::new(
            MockConnector::new(MockInstrument::new()),
            Box::new(TsvStore::new(dir.path().join("out.csv"))),
        )
        .with_timing(SettleTiming::NONE);
        let (handle, task) = ControllerHandle::spawn(controller, DEFAULT_COMMAND_CAPACITY);

        handle.set_step(0.5).await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.config.step, 0.5);
        assert!(status.device_identity.is_none());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.status().await,
            Err(SmuError::ControllerUnavailable)
        ));
    }
}
