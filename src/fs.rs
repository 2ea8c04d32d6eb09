//! File system abstraction for testability.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Abstraction over the local file operations the transfer engine needs.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Returns the size of a regular file, or `None` if it does not exist.
    async fn file_size(&self, path: &Path) -> Option<u64>;

    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// Every call uses its own handle, so concurrent reads of different
    /// ranges of one file never interfere.
    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes>;

    /// Creates (or truncates) a file for writing.
    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File>;

    /// Appends the whole content of `src` to `dest`.
    async fn append_file(&self, dest: &mut tokio::fs::File, src: &Path) -> std::io::Result<u64>;

    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Renames a file, replacing the destination.
    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Removes a file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn file_size(&self, path: &Path) -> Option<u64> {
        tokio::fs::metadata(path)
            .await
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len())
    }

    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes> {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let len = usize::try_from(length)
            .map_err(|_| std::io::Error::other("range does not fit in memory"))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }

    async fn append_file(&self, dest: &mut tokio::fs::File, src: &Path) -> std::io::Result<u64> {
        let mut src = tokio::fs::File::open(src).await?;
        tokio::io::copy(&mut src, dest).await
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}
