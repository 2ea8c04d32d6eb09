//! The chunked transfer engine: jobs, chunk results, workers and coordinators.

pub mod download;
mod pool;
pub mod upload;
mod worker;

use std::path::Path;

use uuid::Uuid;

use crate::error::Error;
use crate::plan::{ChunkDescriptor, plan_parts, plan_ranges};

pub use download::Downloader;
pub use pool::ChunkProgress;
pub use upload::{UploadOutcome, Uploader};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Immutable description of one file's transfer.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Random id; names the job's temporary sinks.
    pub id: Uuid,
    /// Local path (upload) or URL (download).
    pub source: String,
    /// Remote name (upload) or local path (download).
    pub destination: String,
    /// Total size in bytes.
    pub total_size: u64,
    /// Upload or download.
    pub direction: Direction,
    /// Number of chunk workers.
    pub concurrency: usize,
    /// Bytes per chunk.
    pub part_size: u64,
}

impl TransferJob {
    /// Describes an upload of `size` bytes in fixed `part_size` parts.
    #[must_use]
    pub fn upload(
        source: &Path,
        destination: impl Into<String>,
        size: u64,
        concurrency: usize,
        part_size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.display().to_string(),
            destination: destination.into(),
            total_size: size,
            direction: Direction::Upload,
            concurrency: concurrency.max(1),
            part_size: part_size.max(1),
        }
    }

    /// Describes a download of `size` bytes split across `concurrency` ranges.
    #[must_use]
    pub fn download(url: &str, destination: &Path, size: u64, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            id: Uuid::new_v4(),
            source: url.to_string(),
            destination: destination.display().to_string(),
            total_size: size,
            direction: Direction::Download,
            concurrency,
            part_size: size.div_ceil(concurrency as u64).max(1),
        }
    }

    /// Plans the job's chunks.
    #[must_use]
    pub fn plan(&self) -> Vec<ChunkDescriptor> {
        match self.direction {
            Direction::Upload => plan_parts(self.total_size, self.part_size),
            Direction::Download => plan_ranges(self.total_size, self.concurrency),
        }
    }
}

/// How one chunk ended.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// All bytes of the chunk were moved.
    Success,
    /// The chunk failed after exhausting its retries.
    Failure(Error),
    /// The chunk was never started because a sibling had already failed.
    Skipped,
}

/// Result of one chunk, produced once by the pool and never mutated.
#[derive(Debug)]
pub struct ChunkResult {
    /// Index of the descriptor this result belongs to.
    pub index: usize,
    /// Success or failure.
    pub outcome: ChunkOutcome,
    /// Bytes moved by the final attempt.
    pub bytes: u64,
    /// Content tag issued by the remote for uploaded parts.
    pub tag: Option<String>,
}

impl ChunkResult {
    /// Whether the chunk succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Success)
    }
}
