//! Progress reporting for chunked transfers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::stats::{FileStats, TransferStatsTracker};

/// Trait for receiving transfer progress updates.
///
/// Files are identified by a display key that is unique among the transfers
/// in flight: the local path of a download, or the path below the mirrored
/// root of an upload. All methods have default no-op implementations.
pub trait TransferProgress: Send + Sync {
    /// Called when a file transfer starts moving bytes.
    fn on_file_start(&self, _name: &str, _size: u64) {}

    /// Called with the cumulative number of bytes moved for `name`.
    fn on_progress(&self, _name: &str, _cumulative: u64, _speed: u64) {}

    /// Called when a file transfer completes successfully.
    fn on_file_complete(&self, _name: &str, _stats: &FileStats) {}

    /// Called when a file transfer fails.
    fn on_file_error(&self, _name: &str, _error: &str) {}

    /// Called when a remote directory is created during mirroring.
    fn on_directory_created(&self, _path: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// Shared cumulative byte counter for one file.
///
/// Workers call [`add`](Self::add) as bytes arrive or leave. The observer
/// only ever sees a cumulative total larger than the previous one it saw,
/// even when workers race.
pub struct ProgressCounter {
    name: String,
    total: AtomicU64,
    reported: Mutex<u64>,
    stats: TransferStatsTracker,
    observer: Arc<dyn TransferProgress>,
}

impl ProgressCounter {
    /// Creates a counter for a file of `size` bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64, observer: Arc<dyn TransferProgress>) -> Self {
        Self {
            name: name.into(),
            total: AtomicU64::new(0),
            reported: Mutex::new(0),
            stats: TransferStatsTracker::new(size),
            observer,
        }
    }

    /// Adds `delta` bytes and returns the new cumulative total.
    pub fn add(&self, delta: u64) -> u64 {
        if delta == 0 {
            return self.total();
        }
        let cumulative = self.total.fetch_add(delta, Ordering::AcqRel) + delta;
        let speed = self.stats.record_bytes(delta);
        if let Ok(mut reported) = self.reported.lock()
            && cumulative > *reported
        {
            *reported = cumulative;
            self.observer.on_progress(&self.name, cumulative, speed);
        }
        cumulative
    }

    /// Cumulative bytes recorded so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Name of the file being tracked.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Final statistics for the file.
    #[must_use]
    pub fn file_stats(&self, chunks: usize) -> FileStats {
        self.stats.file_stats(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl TransferProgress for Recorder {
        fn on_progress(&self, _name: &str, cumulative: u64, _speed: u64) {
            self.seen.lock().unwrap().push(cumulative);
        }
    }

    #[test]
    fn no_progress_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoProgress>();
        assert_send_sync::<ProgressCounter>();
    }

    #[test]
    fn counter_reports_cumulative_totals() {
        let recorder = Arc::new(Recorder::default());
        let counter = ProgressCounter::new("a.bin", 30, recorder.clone());
        assert_eq!(counter.add(10), 10);
        assert_eq!(counter.add(0), 10);
        assert_eq!(counter.add(20), 30);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![10, 30]);
    }

    #[tokio::test]
    async fn concurrent_adds_are_monotonic() {
        let recorder = Arc::new(Recorder::default());
        let counter = Arc::new(ProgressCounter::new("b.bin", 8_000, recorder.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        counter.add(10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.total(), 8_000);
        let seen = recorder.seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&8_000));
    }
}
