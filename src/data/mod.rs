//! Measurement persistence.

pub mod sink;
pub mod storage;

pub use sink::DataSink;
pub use storage::{PointStore, TsvStore, DEFAULT_STORE_PATH};
