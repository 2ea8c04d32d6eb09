//! pan-transfer - chunked parallel uploads and downloads for a cloud drive.
//!
//! Files are split into byte ranges that move concurrently: uploads go
//! through the drive's multipart protocol, downloads through HTTP `Range`
//! requests against any host that honors them. Whole directory trees can be
//! mirrored with a bounded number of files in flight.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use pan_transfer::{
//!     AuthContext, ConflictPolicy, FileId, HttpDrive, MirrorOptions, TransferConfig, Uploader,
//!     build_http_client, config::RemoteConfig,
//! };
//!
//! # async fn example() -> pan_transfer::Result<()> {
//! let remote = RemoteConfig::default();
//! let http = build_http_client(&remote)?;
//! let auth = AuthContext::bearer("token", FileId::ROOT)?;
//! let drive = HttpDrive::new(http, remote.base_url, auth);
//!
//! let uploader = Uploader::new(drive, TransferConfig::default());
//! let stats = uploader
//!     .upload_directory(
//!         Path::new("./site"),
//!         FileId::ROOT,
//!         ConflictPolicy::KeepBoth,
//!         &MirrorOptions::default(),
//!     )
//!     .await?;
//! println!("Uploaded {} files", stats.files_transferred);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod format;
pub mod fs;
pub mod hash;
pub mod mirror;
pub mod plan;
pub mod progress;
pub mod remote;
pub mod stats;
#[cfg(test)]
mod testing;
pub mod transfer;

// Re-export main types for convenience
pub use config::{AppConfig, RetryPolicy, TransferConfig};
pub use conflict::{ConflictChoice, ConflictDecision, ConflictPolicy, ConflictPrompt};
pub use error::{Error, Result};
pub use format::{format_bytes, format_duration, format_speed};
pub use fs::{FileSystem, TokioFileSystem};
pub use mirror::{MirrorOptions, RemoteDirectoryMap};
pub use plan::{ChunkDescriptor, plan_parts, plan_ranges};
pub use progress::{NoProgress, TransferProgress};
pub use remote::{
    AuthContext, FileId, HttpDrive, HttpRangeSource, RangeSource, RemoteDrive, build_http_client,
};
pub use stats::{FileStats, SessionStats};
pub use transfer::{ChunkResult, Downloader, TransferJob, UploadOutcome, Uploader};
