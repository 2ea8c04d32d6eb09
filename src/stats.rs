//! Transfer statistics types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics for a single file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    /// Total size of the file in bytes.
    pub size: u64,
    /// Number of chunks the file was split into.
    pub chunks: usize,
    /// Time taken to transfer the file.
    pub elapsed: Duration,
    /// Average speed in bytes per second.
    pub average_speed: u64,
    /// Peak speed in bytes per second.
    pub peak_speed: u64,
}

impl FileStats {
    /// Stats for a file the remote already held; nothing was transferred.
    #[must_use]
    pub const fn reused(size: u64) -> Self {
        Self {
            size,
            chunks: 0,
            elapsed: Duration::ZERO,
            average_speed: 0,
            peak_speed: 0,
        }
    }
}

/// Aggregate outcome of a multi-file operation.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Files whose bytes were transferred.
    pub files_transferred: usize,
    /// Files satisfied by the remote's content-identity reuse.
    pub files_reused: usize,
    /// Files that failed.
    pub files_failed: usize,
    /// Files declined by the conflict policy.
    pub files_cancelled: usize,
    /// Files never attempted because their remote directory was unavailable.
    pub files_skipped: usize,
    /// Remote directories created or reused.
    pub directories: usize,
    /// Total bytes moved.
    pub total_bytes: u64,
    /// Total elapsed time.
    pub elapsed: Duration,
    /// Highest per-file peak speed in bytes per second.
    pub peak_speed: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    /// Creates empty session stats.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files_transferred: 0,
            files_reused: 0,
            files_failed: 0,
            files_cancelled: 0,
            files_skipped: 0,
            directories: 0,
            total_bytes: 0,
            elapsed: Duration::ZERO,
            peak_speed: 0,
        }
    }

    /// Whether every eligible file ended up on the remote.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.files_failed == 0 && self.files_skipped == 0
    }

    /// Number of files that reached a final outcome.
    #[must_use]
    pub const fn files_total(&self) -> usize {
        self.files_transferred
            + self.files_reused
            + self.files_failed
            + self.files_cancelled
            + self.files_skipped
    }

    /// Returns the average speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Tracks bytes and speed for one file while its chunks are in flight.
pub struct TransferStatsTracker {
    start_time: Instant,
    total_bytes: u64,
    transferred: AtomicU64,
    peak_speed: AtomicU64,
}

impl TransferStatsTracker {
    /// Creates a tracker for a file of the given size.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes,
            transferred: AtomicU64::new(0),
            peak_speed: AtomicU64::new(0),
        }
    }

    /// Records transferred bytes and returns the current speed (bytes/sec).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn record_bytes(&self, bytes: u64) -> u64 {
        let total = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs > 0.0 {
            let speed = (total as f64 / secs) as u64;
            self.peak_speed.fetch_max(speed, Ordering::Relaxed);
            speed
        } else {
            0
        }
    }

    /// Bytes recorded so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Returns the elapsed time since the transfer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the peak speed recorded.
    #[must_use]
    pub fn peak_speed(&self) -> u64 {
        self.peak_speed.load(Ordering::Relaxed)
    }

    /// Returns the average speed in bytes per second over the whole file.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }

    /// Final statistics for the file.
    #[must_use]
    pub fn file_stats(&self, chunks: usize) -> FileStats {
        FileStats {
            size: self.total_bytes,
            chunks,
            elapsed: self.elapsed(),
            average_speed: self.average_speed(),
            peak_speed: self.peak_speed(),
        }
    }
}

/// Accumulates session statistics as files finish.
pub struct SessionStatsBuilder {
    stats: SessionStats,
    start_time: Instant,
}

impl Default for SessionStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatsBuilder {
    /// Creates a new builder; the session clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: SessionStats::new(),
            start_time: Instant::now(),
        }
    }

    /// Records a file whose bytes were transferred.
    pub fn add_transfer(&mut self, file_stats: &FileStats) {
        self.stats.files_transferred += 1;
        self.stats.total_bytes += file_stats.size;
        self.stats.peak_speed = self.stats.peak_speed.max(file_stats.peak_speed);
    }

    /// Records a file satisfied by content reuse.
    pub const fn add_reused(&mut self) {
        self.stats.files_reused += 1;
    }

    /// Records a failed file.
    pub const fn add_failed(&mut self) {
        self.stats.files_failed += 1;
    }

    /// Records a file declined by the conflict policy.
    pub const fn add_cancelled(&mut self) {
        self.stats.files_cancelled += 1;
    }

    /// Records files skipped because their directory was unavailable.
    pub const fn add_skipped(&mut self, count: usize) {
        self.stats.files_skipped += count;
    }

    /// Records a created or reused remote directory.
    pub const fn add_directory(&mut self) {
        self.stats.directories += 1;
    }

    /// Builds the final session statistics.
    #[must_use]
    pub fn build(self) -> SessionStats {
        SessionStats {
            elapsed: self.start_time.elapsed(),
            ..self.stats
        }
    }
}
