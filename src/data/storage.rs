//! Persistent point stores.
//!
//! The production store is an append-only tab-separated text file:
//!
//! ```text
//! time\tx\ty
//! 2024-05-01T12:00:00.000000+00:00\t+5.000000E-01\t+1.234000E-04
//! ```
//!
//! The header is written only when the file does not exist yet, so several runs accumulate in
//! the same file.

use crate::core::MeasurementPoint;
use crate::error::{AppResult, SmuError};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::debug;

/// Default store file name, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "measurement.csv";

/// Column names of the header row.
pub const HEADER: [&str; 3] = ["time", "x", "y"];

/// Destination for measurement points.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Appends the points in order, in one operation.
    async fn append(&mut self, points: &[MeasurementPoint]) -> AppResult<()>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Tab-separated file store.
#[derive(Debug, Clone)]
pub struct TsvStore {
    path: PathBuf,
}

impl TsvStore {
    /// Store writing to `path`; the file is created on the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PointStore for TsvStore {
    async fn append(&mut self, points: &[MeasurementPoint]) -> AppResult<()> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                SmuError::Storage(format!("cannot open {}: {}", self.path.display(), e))
            })?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(HEADER)?;
        }
        for point in points {
            writer.write_record([
                point.time_string().as_str(),
                point.measured_x.as_str(),
                point.y.as_str(),
            ])?;
        }
        writer.flush()?;

        debug!(path = %self.path.display(), count = points.len(), "Points appended");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn point(x: &str, y: &str) -> MeasurementPoint {
        MeasurementPoint::now(0.0, x, y)
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("measurement.csv");
        let mut store = TsvStore::new(&path);

        store.append(&[point("0", "0")]).await.unwrap();
        store.append(&[point("0.5", "0.0005"), point("1", "0.001")]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "time\tx\ty");
        assert!(lines[2].ends_with("\t0.5\t0.0005"));
        assert_eq!(lines.iter().filter(|l| **l == "time\tx\ty").count(), 1);
    }

    #[tokio::test]
    async fn test_existing_file_gets_no_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.csv");
        std::fs::write(&path, "").unwrap();

        let mut store = TsvStore::new(&path);
        store.append(&[point("1", "2")]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(!contents.starts_with("time"));
    }

    #[tokio::test]
    async fn test_row_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let mut store = TsvStore::new(&path);
        let p = point("+5.0E-01", "+1.2E-04");
        store.append(std::slice::from_ref(&p)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let row: Vec<&str> = contents.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(row, vec![p.time_string().as_str(), "+5.0E-01", "+1.2E-04"]);
    }

    #[tokio::test]
    async fn test_unwritable_location() {
        let dir = tempdir().unwrap();
        let mut store = TsvStore::new(dir.path().join("missing").join("out.csv"));
        let err = store.append(&[point("1", "2")]).await.unwrap_err();
        assert!(matches!(err, SmuError::Storage(_)));
    }
}
