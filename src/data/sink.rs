//! Save-mode aware point sink.

use super::storage::PointStore;
use crate::core::{MeasurementPoint, SaveMode};
use crate::error::AppResult;
use tracing::info;

/// Routes measurement points to the store, immediately or at the end of a run.
///
/// In [`SaveMode::Batch`] points accumulate in memory until [`DataSink::flush`]; in
/// [`SaveMode::Realtime`] every point is appended to the store as it arrives and the buffer
/// stays empty.
pub struct DataSink {
    store: Box<dyn PointStore>,
    mode: SaveMode,
    buffer: Vec<MeasurementPoint>,
}

impl DataSink {
    /// Creates a batch-mode sink writing to `store`.
    pub fn new(store: Box<dyn PointStore>) -> Self {
        Self {
            store,
            mode: SaveMode::Batch,
            buffer: Vec::new(),
        }
    }

    /// Prepares for a new run: empties the buffer and fixes the save mode.
    pub fn begin_run(&mut self, mode: SaveMode) {
        self.buffer.clear();
        self.mode = mode;
    }

    /// Accepts one point.
    pub async fn append(&mut self, point: MeasurementPoint) -> AppResult<()> {
        match self.mode {
            SaveMode::Batch => {
                self.buffer.push(point);
                Ok(())
            }
            SaveMode::Realtime => self.store.append(std::slice::from_ref(&point)).await,
        }
    }

    /// Writes buffered points in one append and empties the buffer on success.
    ///
    /// Does nothing in realtime mode or with an empty buffer. Returns the number of points
    /// written; on failure the buffer is kept.
    pub async fn flush(&mut self) -> AppResult<usize> {
        if self.mode != SaveMode::Batch || self.buffer.is_empty() {
            return Ok(0);
        }
        self.store.append(&self.buffer).await?;
        let count = self.buffer.len();
        self.buffer.clear();
        info!(count, location = %self.store.location(), "Batch flushed");
        Ok(count)
    }

    /// Drops every buffered point.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of points waiting for a flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Location of the backing store.
    pub fn location(&self) -> String {
        self.store.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::TsvStore;
    use tempfile::tempdir;

    fn line_count(path: &std::path::Path) -> usize {
        std::fs::read_to_string(path)
            .map(|c| c.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_batch_defers_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.csv");
        let mut sink = DataSink::new(Box::new(TsvStore::new(&path)));
        sink.begin_run(SaveMode::Batch);

        sink.append(MeasurementPoint::now(0.0, "0", "0")).await.unwrap();
        sink.append(MeasurementPoint::now(0.5, "0.5", "0.0005")).await.unwrap();
        assert_eq!(sink.buffered_len(), 2);
        assert!(!path.exists());

        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(line_count(&path), 3);

        // Second flush has nothing left to write
        assert_eq!(sink.flush().await.unwrap(), 0);
        assert_eq!(line_count(&path), 3);
    }

    #[tokio::test]
    async fn test_realtime_writes_each_point() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("realtime.csv");
        let mut sink = DataSink::new(Box::new(TsvStore::new(&path)));
        sink.begin_run(SaveMode::Realtime);

        sink.append(MeasurementPoint::now(0.0, "0", "0")).await.unwrap();
        assert_eq!(line_count(&path), 2);
        sink.append(MeasurementPoint::now(1.0, "1", "0.001")).await.unwrap();
        assert_eq!(line_count(&path), 3);

        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(sink.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer() {
        let dir = tempdir().unwrap();
        let mut sink = DataSink::new(Box::new(TsvStore::new(
            dir.path().join("absent").join("out.csv"),
        )));
        sink.begin_run(SaveMode::Batch);
        sink.append(MeasurementPoint::now(0.0, "0", "0")).await.unwrap();

        assert!(sink.flush().await.is_err());
        assert_eq!(sink.buffered_len(), 1);
    }

    #[tokio::test]
    async fn test_begin_run_clears_buffer() {
        let dir = tempdir().unwrap();
        let mut sink = DataSink::new(Box::new(TsvStore::new(dir.path().join("x.csv"))));
        sink.append(MeasurementPoint::now(0.0, "0", "0")).await.unwrap();
        sink.begin_run(SaveMode::Realtime);
        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(sink.mode, SaveMode::Realtime);
    }
}
