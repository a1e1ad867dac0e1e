//! Actor-based run controller
//!
//! All controller state (run state, sweep configuration, instrument session, data sink and
//! telemetry) lives in a single async task that processes [`ControlCommand`]s via
//! message-passing. There is no shared mutable state: the task is the only writer, so a
//! configuration change can never interleave with sweep traffic on the serial link.
//!
//! While idle the task is parked on the command channel. While a sweep is running the task
//! keeps serving commands during each point exchange, answering `status`/`subscribe` and
//! rejecting every mutation with `InvalidState`. Cancellation takes effect between points, and
//! `stop` is acknowledged only after the shutdown sequence has returned the controller to `Idle`.
//!
//! Every exit from a run goes through the same shutdown sequence:
//! 1. disable the source output (if a session exists)
//! 2. flush buffered points (batch mode) and clear the buffer on success
//! 3. return to `Idle`
//! 4. publish the terminal telemetry event

use crate::{
    core::{AverageCount, RunState, SaveMode, WireMode},
    data::{DataSink, PointStore},
    error::{AppResult, SmuError},
    instrument::{Connector, PortSelector, SettleTiming, SmuDriver},
    messages::{Ack, ControlCommand, ControlStatus, InitReport, RunStatus},
    sweep::{SweepOutcome, SweepPlan},
    sweep_config::SweepConfig,
    telemetry::{self, Conditions, PointEvent, Telemetry, TelemetryEvent},
};
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    oneshot,
};
use tracing::{debug, error, info, warn};

/// Session details that stay readable while the driver is busy with a point.
#[derive(Debug, Clone, Default)]
struct SessionInfo {
    identity: Option<String>,
    port: Option<String>,
}

/// Requests collected from commands served during a run.
#[derive(Default)]
struct RunSignals {
    cancel: bool,
    stop_requests: Vec<oneshot::Sender<Ack>>,
    shutdown: Option<oneshot::Sender<()>>,
    channel_open: bool,
}

/// Actor that owns the instrument session and executes sweeps
pub struct RunController<C: Connector> {
    connector: C,
    timing: SettleTiming,
    state: RunState,
    config: SweepConfig,
    driver: Option<SmuDriver<C::Transport>>,
    sink: DataSink,
    telemetry: Telemetry,
}

impl<C: Connector> RunController<C> {
    /// Creates an idle controller with default configuration and instrument timing.
    pub fn new(connector: C, store: Box<dyn PointStore>) -> Self {
        Self {
            connector,
            timing: SettleTiming::INSTRUMENT,
            state: RunState::Idle,
            config: SweepConfig::default(),
            driver: None,
            sink: DataSink::new(store),
            telemetry: Telemetry::new(telemetry::DEFAULT_CAPACITY),
        }
    }

    /// Initial sweep configuration.
    pub fn with_config(mut self, config: SweepConfig) -> Self {
        self.config = config;
        self
    }

    /// Settle delays used by sessions opened by this controller.
    pub fn with_timing(mut self, timing: SettleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Per-observer telemetry queue length.
    pub fn with_telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry = Telemetry::new(capacity);
        self
    }

    /// Runs the actor event loop, processing commands until shutdown
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<ControlCommand>) {
        info!("RunController started");

        while let Some(command) = command_rx.recv().await {
            match command {
                ControlCommand::Init { port, response } => {
                    let result = self.init(port).await;
                    let _ = response.send(result);
                }

                ControlCommand::Start { response } => match self.begin_run() {
                    Ok(plan) => {
                        let _ = response.send(Ok(Ack::started()));
                        let signals = self.execute_run(plan, &mut command_rx).await;
                        if let Some(response) = signals.shutdown {
                            info!("Shutdown command received during run");
                            let _ = response.send(());
                            break;
                        }
                        if !signals.channel_open {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = response.send(Err(e));
                    }
                },

                ControlCommand::Stop { response } => {
                    debug!("Stop requested with no active run");
                    let _ = response.send(Ack::stopped());
                }

                ControlCommand::SetStep { step, response } => {
                    let result = self.set_step(step);
                    let _ = response.send(result);
                }

                ControlCommand::SetRange {
                    start,
                    end,
                    response,
                } => {
                    let result = self.set_range(start, end);
                    let _ = response.send(result);
                }

                ControlCommand::SetSaveMode { mode, response } => {
                    let result = self.set_save_mode(mode);
                    let _ = response.send(result);
                }

                ControlCommand::SetWireMode { mode, response } => {
                    let result = self.set_wire_mode(mode).await;
                    let _ = response.send(result);
                }

                ControlCommand::SetVoltageLimit { limit, response } => {
                    let result = self.set_voltage_limit(limit).await;
                    let _ = response.send(result);
                }

                ControlCommand::SetCurrentLimit { limit, response } => {
                    let result = self.set_current_limit(limit).await;
                    let _ = response.send(result);
                }

                ControlCommand::SetAverageCount { count, response } => {
                    let result = self.set_average_count(count).await;
                    let _ = response.send(result);
                }

                ControlCommand::ClearData { response } => {
                    let result = self.clear_data();
                    let _ = response.send(result);
                }

                ControlCommand::Status { response } => {
                    let _ = response.send(self.status());
                }

                ControlCommand::Subscribe { response } => {
                    let _ = response.send(self.telemetry.subscribe());
                }

                ControlCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    let _ = response.send(());
                    break; // Exit event loop
                }
            }
        }

        info!("RunController shutting down");
    }

    fn status(&self) -> RunStatus {
        RunStatus {
            state: self.state,
            config: self.config.clone(),
            buffered_points: self.sink.buffered_len(),
            device_identity: self.driver.as_ref().map(|d| d.identity().to_string()),
            port: self.driver.as_ref().map(|d| d.port().to_string()),
        }
    }

    fn ensure_idle(&self, operation: &str) -> AppResult<()> {
        if self.state == RunState::Running {
            return Err(SmuError::busy(operation));
        }
        Ok(())
    }

    fn driver_mut(&mut self) -> AppResult<&mut SmuDriver<C::Transport>> {
        self.driver.as_mut().ok_or(SmuError::NotInitialized)
    }

    /// Opens a new instrument session, replacing any previous one.
    ///
    /// The old session is closed first so the same device can be reopened; if the new open
    /// fails the controller is left without a session.
    async fn init(&mut self, port: PortSelector) -> AppResult<InitReport> {
        self.ensure_idle("initialize")?;

        if self.driver.take().is_some() {
            info!("Closing previous instrument session");
        }

        let driver = SmuDriver::open(&self.connector, &port, self.timing)
            .await
            .map_err(|e| {
                error!(port = %port, error = %e, "Instrument initialization failed");
                e
            })?;

        // The reset put the instrument back to its defaults
        let applied = *driver.applied();
        self.config.set_wire_mode(applied.wire_mode);
        self.config.set_voltage_limit(applied.voltage_limit)?;
        self.config.set_current_limit(applied.current_limit)?;
        self.config.set_average_count(applied.average_count);

        let report = InitReport {
            status: ControlStatus::Standby,
            device_identity: driver.identity().to_string(),
            port: driver.port().to_string(),
        };
        self.driver = Some(driver);
        Ok(report)
    }

    fn set_step(&mut self, step: f64) -> AppResult<()> {
        self.ensure_idle("set step")?;
        self.config.set_step(step)?;
        info!(step, "Step updated");
        Ok(())
    }

    fn set_range(&mut self, start: f64, end: f64) -> AppResult<()> {
        self.ensure_idle("set range")?;
        self.config.set_range(start, end)?;
        info!(start, end, "Range updated");
        Ok(())
    }

    fn set_save_mode(&mut self, mode: SaveMode) -> AppResult<()> {
        self.ensure_idle("set save mode")?;
        self.config.set_save_mode(mode);
        info!(%mode, "Save mode updated");
        Ok(())
    }

    async fn set_wire_mode(&mut self, mode: WireMode) -> AppResult<()> {
        self.ensure_idle("set wire mode")?;
        self.driver_mut()?.apply_wire_mode(mode).await?;
        self.config.set_wire_mode(mode);
        Ok(())
    }

    async fn set_voltage_limit(&mut self, limit: f64) -> AppResult<()> {
        self.ensure_idle("set voltage limit")?;
        SweepConfig::check_limit("voltage limit", limit)?;
        self.driver_mut()?.apply_voltage_limit(limit).await?;
        self.config.set_voltage_limit(limit)
    }

    async fn set_current_limit(&mut self, limit: f64) -> AppResult<()> {
        self.ensure_idle("set current limit")?;
        SweepConfig::check_limit("current limit", limit)?;
        self.driver_mut()?.apply_current_limit(limit).await?;
        self.config.set_current_limit(limit)
    }

    async fn set_average_count(&mut self, count: u32) -> AppResult<()> {
        self.ensure_idle("set average count")?;
        let count = AverageCount::try_from(count)?;
        self.driver_mut()?.apply_average_count(count).await?;
        self.config.set_average_count(count);
        Ok(())
    }

    fn clear_data(&mut self) -> AppResult<()> {
        self.ensure_idle("clear data")?;
        let dropped = self.sink.buffered_len();
        self.sink.clear();
        info!(dropped, "Measurement buffer cleared");
        Ok(())
    }

    /// Validates the configuration and enters `Running`.
    fn begin_run(&mut self) -> AppResult<SweepPlan> {
        if self.state == RunState::Running {
            return Err(SmuError::InvalidState(
                "a measurement is already running".into(),
            ));
        }
        self.config.validate()?;

        let plan = SweepPlan::new(&self.config)?;
        self.sink.begin_run(self.config.save_mode);
        self.state = RunState::Running;
        info!(
            start = self.config.start,
            end = self.config.end,
            step = self.config.step,
            points = plan.total_steps(),
            save_mode = %self.config.save_mode,
            "Sweep started"
        );
        Ok(plan)
    }

    /// Walks the plan, then runs the shutdown sequence.
    async fn execute_run(
        &mut self,
        plan: SweepPlan,
        command_rx: &mut mpsc::Receiver<ControlCommand>,
    ) -> RunSignals {
        let mut signals = RunSignals {
            channel_open: true,
            ..RunSignals::default()
        };
        let session = SessionInfo {
            identity: self.driver.as_ref().map(|d| d.identity().to_string()),
            port: self.driver.as_ref().map(|d| d.port().to_string()),
        };
        let conditions = Conditions::from(&self.config);
        let mut taken = 0;

        let outcome = 'run: {
            let Some(driver) = self.driver.as_mut() else {
                break 'run SweepOutcome::Faulted {
                    points: 0,
                    reason: SmuError::NotInitialized.to_string(),
                };
            };

            for (index, setpoint) in plan.points() {
                // Commands that arrived while the previous point was being stored
                while signals.channel_open {
                    match command_rx.try_recv() {
                        Ok(command) => serve_during_run(
                            command,
                            &self.config,
                            &self.sink,
                            &self.telemetry,
                            &session,
                            &mut signals,
                        ),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            signals.channel_open = false;
                            signals.cancel = true;
                        }
                    }
                }
                if signals.cancel {
                    break 'run SweepOutcome::Cancelled { points: taken };
                }

                let result = {
                    let acquisition = driver.acquire(setpoint);
                    tokio::pin!(acquisition);
                    loop {
                        tokio::select! {
                            biased;
                            result = &mut acquisition => break result,
                            command = command_rx.recv(), if signals.channel_open => match command {
                                Some(command) => serve_during_run(
                                    command,
                                    &self.config,
                                    &self.sink,
                                    &self.telemetry,
                                    &session,
                                    &mut signals,
                                ),
                                None => {
                                    warn!("All controller handles dropped, cancelling run");
                                    signals.channel_open = false;
                                    signals.cancel = true;
                                }
                            },
                        }
                    }
                };

                let point = match result {
                    Ok(point) => point,
                    Err(e) => {
                        error!(index, setpoint, error = %e, "Measurement failed");
                        break 'run SweepOutcome::Faulted {
                            points: taken,
                            reason: e.to_string(),
                        };
                    }
                };
                taken += 1;

                let event = TelemetryEvent::Running(PointEvent::new(
                    &point,
                    plan.progress(index),
                    conditions.clone(),
                ));
                if let Err(e) = self.sink.append(point).await {
                    error!(index, error = %e, "Failed to store measurement");
                    break 'run SweepOutcome::Faulted {
                        points: taken,
                        reason: e.to_string(),
                    };
                }
                self.telemetry.publish(event);
            }

            SweepOutcome::Completed { points: taken }
        };

        self.finish_run(outcome).await;

        // Stop callers are answered once the controller is idle again
        for response in signals.stop_requests.drain(..) {
            let _ = response.send(Ack::stopped());
        }
        signals
    }

    async fn finish_run(&mut self, outcome: SweepOutcome) {
        if let Some(driver) = self.driver.as_mut() {
            if let Err(e) = driver.shutdown_output().await {
                warn!(error = %e, "Failed to disable source output");
            }
        }

        let flush_error = match self.sink.flush().await {
            Ok(_) => None,
            Err(e) => {
                error!(error = %e, location = %self.sink.location(), "Failed to save measurements");
                Some(format!("failed to save measurements: {}", e))
            }
        };

        self.state = RunState::Idle;

        let event = match (&outcome, flush_error) {
            (SweepOutcome::Faulted { reason, .. }, Some(flush)) => TelemetryEvent::Error {
                message: format!("{}; {}", reason, flush),
            },
            (SweepOutcome::Faulted { reason, .. }, None) => TelemetryEvent::Error {
                message: reason.clone(),
            },
            (_, Some(flush)) => TelemetryEvent::Error { message: flush },
            (_, None) => TelemetryEvent::Done,
        };
        info!(%outcome, "Sweep finished");
        self.telemetry.publish(event);
    }
}

/// Serves one command that arrived while a sweep is running.
fn serve_during_run(
    command: ControlCommand,
    config: &SweepConfig,
    sink: &DataSink,
    telemetry: &Telemetry,
    session: &SessionInfo,
    signals: &mut RunSignals,
) {
    let name = command.name();
    match command {
        ControlCommand::Stop { response } => {
            info!("Stop requested, cancelling after the current point");
            signals.cancel = true;
            signals.stop_requests.push(response);
        }

        ControlCommand::Shutdown { response } => {
            signals.cancel = true;
            signals.shutdown = Some(response);
        }

        ControlCommand::Status { response } => {
            let _ = response.send(RunStatus {
                state: RunState::Running,
                config: config.clone(),
                buffered_points: sink.buffered_len(),
                device_identity: session.identity.clone(),
                port: session.port.clone(),
            });
        }

        ControlCommand::Subscribe { response } => {
            let _ = response.send(telemetry.subscribe());
        }

        ControlCommand::Start { response } => {
            let _ = response.send(Err(SmuError::InvalidState(
                "a measurement is already running".into(),
            )));
        }

        ControlCommand::Init { response, .. } => {
            let _ = response.send(Err(SmuError::busy(name)));
        }

        ControlCommand::SetStep { response, .. }
        | ControlCommand::SetRange { response, .. }
        | ControlCommand::SetSaveMode { response, .. }
        | ControlCommand::SetWireMode { response, .. }
        | ControlCommand::SetVoltageLimit { response, .. }
        | ControlCommand::SetCurrentLimit { response, .. }
        | ControlCommand::SetAverageCount { response, .. }
        | ControlCommand::ClearData { response } => {
            debug!(command = name, "Rejected while running");
            let _ = response.send(Err(SmuError::busy(name)));
        }
    }
}
