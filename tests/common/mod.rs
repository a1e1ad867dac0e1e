//! Shared helpers for controller integration tests.

#![allow(dead_code)]

use smu_sweep::{
    data::TsvStore,
    instrument::{MockConnector, MockInstrument, PortSelector, SettleTiming},
    telemetry::{PointEvent, TelemetryEvent},
    ControllerHandle, RunController,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle};

pub struct Harness {
    pub handle: ControllerHandle,
    pub task: JoinHandle<()>,
    pub instrument: MockInstrument,
    pub store_path: PathBuf,
    _dir: TempDir,
}

/// Controller on a scripted instrument with real settle delays (run under a paused clock).
pub fn spawn_controller() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("measurement.csv");
    spawn_with_store(dir, store_path)
}

/// Controller whose store lives in a directory that does not exist, so every write fails.
pub fn spawn_with_broken_store() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("missing").join("measurement.csv");
    spawn_with_store(dir, store_path)
}

fn spawn_with_store(dir: TempDir, store_path: PathBuf) -> Harness {
    let instrument = MockInstrument::new();
    let controller = RunController::new(
        MockConnector::new(instrument.clone()),
        Box::new(TsvStore::new(&store_path)),
    )
    .with_timing(SettleTiming::INSTRUMENT);
    let (handle, task) = ControllerHandle::spawn(controller, 16);

    Harness {
        handle,
        task,
        instrument,
        store_path,
        _dir: dir,
    }
}

/// Spawned controller with an initialized session.
pub async fn initialized_controller() -> Harness {
    let harness = spawn_controller();
    harness.handle.init(PortSelector::Auto).await.unwrap();
    harness
}

/// Receives events until the terminal one.
pub async fn collect_run(
    events: &mut mpsc::Receiver<TelemetryEvent>,
) -> (Vec<PointEvent>, TelemetryEvent) {
    let mut points = Vec::new();
    loop {
        match events.recv().await {
            Some(TelemetryEvent::Running(point)) => points.push(point),
            Some(terminal) => return (points, terminal),
            None => panic!("telemetry closed before the terminal event"),
        }
    }
}

/// Lines of the store file; empty when it does not exist.
pub fn store_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|c| c.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn output_off_count(instrument: &MockInstrument) -> usize {
    instrument
        .written()
        .iter()
        .filter(|line| line.as_str() == ":OUTP:STATE 0")
        .count()
}
