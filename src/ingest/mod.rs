pub mod coordinator;

use crate::config::IngestConfig;
use crate::eve::filters::EveFilter;
use crate::eve::reader::{EveReader, ReaderError};
use crate::ingest::coordinator::IngestCoordinator;
use crate::storage::sink::{EventSink, SinkError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Delay after the completion notification so a waiter racing the final
/// events can observe it before the loop exits.
const COMPLETION_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Per-source progress reporting state.
///
/// A percentage is reported only when strictly greater than the last value
/// reported for the source, bounding log volume to at most 100 lines per
/// input.
struct ProgressTracker {
    last_percent: u64,
}

impl ProgressTracker {
    fn new() -> Self {
        Self { last_percent: 0 }
    }

    fn update(&mut self, offset: u64, size: Option<u64>) -> Option<u64> {
        let size = size.filter(|s| *s > 0)?;
        let percent = (offset * 100 / size).min(100);
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// The ingestion control loop.
///
/// Pulls events from each input in order, runs the filter chain, submits to
/// the sink, and commits on the batch threshold or at end of input. The stop
/// signal is cooperative, checked once per iteration, and a final commit is
/// always attempted before exiting on stop so a partial batch is not lost.
pub struct IngestRunner {
    inputs: Vec<PathBuf>,
    batch_size: u64,
    filters: Vec<Box<dyn EveFilter>>,
    sink: Arc<dyn EventSink>,
    coordinator: Arc<IngestCoordinator>,
    stop: watch::Receiver<bool>,
    count: u64,
}

impl IngestRunner {
    pub fn new(
        config: &IngestConfig,
        filters: Vec<Box<dyn EveFilter>>,
        sink: Arc<dyn EventSink>,
        coordinator: Arc<IngestCoordinator>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inputs: config.inputs.clone(),
            batch_size: config.batch_size.max(1),
            filters,
            sink,
            coordinator,
            stop,
            count: 0,
        }
    }

    /// Run to completion. Returns the cumulative event count.
    ///
    /// Decode and commit errors are fatal: the backend is trusted, and
    /// failing fast beats silently corrupting or duplicating a batch. The
    /// stop signal is the only non-error path to early exit.
    pub async fn run(mut self) -> Result<u64, IngestError> {
        let total_inputs = self.inputs.len();
        // Submitted but not yet committed. Carries across inputs: an
        // intermediate end-of-stream advances to the next input without
        // forcing a commit.
        let mut queued: u64 = 0;
        let mut stopped = false;

        'inputs: for (i, path) in self.inputs.clone().iter().enumerate() {
            let last = i + 1 == total_inputs;
            let mut reader = EveReader::open(path)?;
            let size = reader.file_size();
            info!(
                path = %path.display(),
                bytes = size.unwrap_or(0),
                "Reading"
            );
            let mut progress = ProgressTracker::new();

            loop {
                if *self.stop.borrow() {
                    stopped = true;
                    break 'inputs;
                }

                match reader.next_event()? {
                    Some(mut event) => {
                        for filter in &self.filters {
                            filter.filter(&mut event);
                        }
                        self.sink.submit(event).await?;
                        queued += 1;
                        self.count += 1;

                        if self.count % self.batch_size == 0 {
                            self.sink.commit().await?;
                            queued = 0;
                        }

                        if let Some(percent) = progress.update(reader.offset(), size) {
                            info!(
                                path = %path.display(),
                                events = self.count,
                                percent,
                                "Progress"
                            );
                        }
                    }
                    None => {
                        if !last {
                            // Advance to the next input.
                            break;
                        }
                        if queued > 0 {
                            self.sink.commit().await?;
                        }
                        info!(events = self.count, "Finished reading all inputs");
                        self.coordinator.notify_done();
                        tokio::time::sleep(COMPLETION_GRACE).await;
                        break 'inputs;
                    }
                }
            }
        }

        if stopped {
            // Flush whatever was batched before the stop.
            self.sink.commit().await?;
            info!(events = self.count, "Stopped, partial batch committed");
        }

        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eve::filters::TagsFilter;
    use crate::storage::sink::SqliteEventSink;
    use crate::storage::SqliteService;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_events(count: usize, start_sec: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..count {
            writeln!(
                file,
                r#"{{"timestamp": "2024-01-01T00:{:02}:{:02}.000000+0000", "event_type": "alert"}}"#,
                (start_sec + i) / 60,
                (start_sec + i) % 60
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn runner(
        inputs: Vec<PathBuf>,
        batch_size: u64,
        sink: Arc<dyn EventSink>,
        coordinator: Arc<IngestCoordinator>,
        stop: watch::Receiver<bool>,
    ) -> IngestRunner {
        let config = IngestConfig { batch_size, inputs };
        IngestRunner::new(
            &config,
            vec![Box::new(TagsFilter)],
            sink,
            coordinator,
            stop,
        )
    }

    #[tokio::test]
    async fn test_ingests_all_events() {
        let file = write_events(25, 0);
        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        let sink = Arc::new(SqliteEventSink::new(db.clone()));
        let coordinator = Arc::new(IngestCoordinator::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let count = runner(
            vec![file.path().to_path_buf()],
            10,
            sink,
            coordinator.clone(),
            stop_rx,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(count, 25);
        assert_eq!(db.event_count().await.unwrap(), 25);
        assert!(coordinator.is_done());
    }

    #[tokio::test]
    async fn test_malformed_event_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "alert"}}"#).unwrap();
        writeln!(file, "garbage").unwrap();
        file.flush().unwrap();

        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        let sink = Arc::new(SqliteEventSink::new(db));
        let coordinator = Arc::new(IngestCoordinator::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let err = runner(
            vec![file.path().to_path_buf()],
            10,
            sink,
            coordinator.clone(),
            stop_rx,
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Reader(ReaderError::Malformed { .. })));
        assert!(!coordinator.is_done());
    }

    #[tokio::test]
    async fn test_failed_run_unblocks_waiter() {
        // The runner task cancels the coordinator when the run errors, so a
        // waiter resolves instead of hanging on a run that will never finish.
        use crate::ingest::coordinator::IngestOutcome;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not an event").unwrap();
        file.flush().unwrap();

        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        let sink = Arc::new(SqliteEventSink::new(db));
        let coordinator = Arc::new(IngestCoordinator::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let r = runner(
            vec![file.path().to_path_buf()],
            10,
            sink,
            coordinator.clone(),
            stop_rx,
        );
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                if r.run().await.is_err() {
                    coordinator.cancel();
                }
            }
        });

        assert_eq!(coordinator.wait().await, IngestOutcome::Cancelled);
        assert!(!coordinator.is_done());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        let sink = Arc::new(SqliteEventSink::new(db));
        let coordinator = Arc::new(IngestCoordinator::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let err = runner(
            vec![PathBuf::from("/nonexistent/eve.json")],
            10,
            sink,
            coordinator,
            stop_rx,
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Reader(ReaderError::NotFound(_))));
    }

    #[test]
    fn test_progress_strictly_increasing_and_bounded() {
        let mut tracker = ProgressTracker::new();
        let size = Some(200u64);

        let mut reported = Vec::new();
        for offset in [0, 1, 2, 50, 50, 100, 90, 200, 300] {
            if let Some(percent) = tracker.update(offset, size) {
                reported.push(percent);
            }
        }

        assert_eq!(reported, vec![1, 25, 50, 100]);
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
        assert!(reported.iter().all(|p| *p <= 100));
    }

    #[test]
    fn test_progress_unknown_size_reports_nothing() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.update(100, None).is_none());
        assert!(tracker.update(100, Some(0)).is_none());
    }
}
