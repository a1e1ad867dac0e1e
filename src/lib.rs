//! Core library for the smu-sweep controller.
//!
//! Drives a source-measure unit over a serial link through a voltage sweep, streams each
//! measured point to observers and persists the results in batch or realtime mode.
//!
//! # Architecture
//!
//! ```text
//! ControllerHandle --[ControlCommand]--> RunController (single task)
//!                                          |-- SweepConfig
//!                                          |-- SmuDriver --> Transport (serial / mock)
//!                                          |-- DataSink  --> PointStore (TSV file)
//!                                          `-- Telemetry --> observers
//! ```
//!
//! The binary (`smu-sweep`) is a thin CLI over [`app::ControllerHandle`]; any other front end
//! (websocket server, GUI) talks to the controller the same way.

pub mod app;
pub mod app_actor;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod instrument;
pub mod messages;
pub mod sweep;
pub mod sweep_config;
pub mod telemetry;

pub use app::ControllerHandle;
pub use app_actor::RunController;
pub use error::{AppResult, SmuError};
