//! Download coordinator: parallel ranges into sinks, then reassembly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::progress::{NoProgress, ProgressCounter, TransferProgress};
use crate::remote::RangeSource;
use crate::stats::FileStats;

use super::pool::{aggregate, run_chunks};
use super::{TransferJob, worker};

/// Returns the `.part` path the assembled file is written to before rename.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Returns the temporary sink of one range: `<dest>.<job-id>.part<index>`.
fn sink_path(dest: &Path, job: &TransferJob, index: usize) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(format!(".{}.part{index}", job.id));
    PathBuf::from(name)
}

/// Downloads URLs from a [`RangeSource`] into local files.
pub struct Downloader<S: RangeSource, F: FileSystem = TokioFileSystem> {
    source: S,
    config: TransferConfig,
    fs: F,
    progress: Arc<dyn TransferProgress>,
}

impl<S: RangeSource> Downloader<S, TokioFileSystem> {
    /// Creates a new downloader with the default file system.
    #[must_use]
    pub fn new(source: S, config: TransferConfig) -> Self {
        Self::with_fs(source, config, TokioFileSystem)
    }
}

impl<S: RangeSource, F: FileSystem> Downloader<S, F> {
    /// Creates a new downloader with a custom file system implementation.
    #[must_use]
    pub fn with_fs(source: S, config: TransferConfig, fs: F) -> Self {
        Self {
            source,
            config,
            fs,
            progress: Arc::new(NoProgress),
        }
    }

    /// Attaches a progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn TransferProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a reference to the range source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    async fn ensure_parent_dir(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Downloads `url` to `dest` using `concurrency` parallel ranges.
    ///
    /// With `force_single` (or a concurrency of 1) the resource is fetched in
    /// one request instead. The destination only appears once every byte has
    /// arrived; a failed download leaves no file at `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RangeUnsupported`] if the host does not honor byte
    /// ranges, [`Error::PartialTransfer`] if any range failed, or the first
    /// network or I/O error.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        concurrency: usize,
        force_single: bool,
    ) -> Result<FileStats> {
        let name = dest.display().to_string();
        self.ensure_parent_dir(dest).await?;

        let result = if force_single || concurrency <= 1 {
            self.download_single(url, dest, &name).await
        } else {
            self.download_ranges(url, dest, &name, concurrency).await
        };
        match result {
            Ok(stats) => {
                self.progress.on_file_complete(&name, &stats);
                log::info!("Downloaded {} ({} bytes)", dest.display(), stats.size);
                Ok(stats)
            }
            Err(e) => {
                self.progress.on_file_error(&name, &e.to_string());
                Err(e)
            }
        }
    }

    async fn download_ranges(
        &self,
        url: &str,
        dest: &Path,
        name: &str,
        concurrency: usize,
    ) -> Result<FileStats> {
        let size = self.source.content_length(url).await?;
        let job = TransferJob::download(url, dest, size, concurrency);
        let ranges = job.plan();
        let sinks: Vec<PathBuf> = ranges.iter().map(|r| sink_path(dest, &job, r.index)).collect();
        log::debug!(
            "Downloading {url} ({size} bytes) in {} range(s), job {}",
            ranges.len(),
            job.id
        );

        let counter = Arc::new(ProgressCounter::new(name, size, Arc::clone(&self.progress)));
        self.progress.on_file_start(name, size);

        let source = &self.source;
        let fs = &self.fs;
        let sinks_ref = &sinks;
        let results = run_chunks(
            &ranges,
            job.concurrency,
            &self.config.retry,
            &counter,
            |range, progress| async move {
                worker::download_range(source, fs, url, range, &sinks_ref[range.index], &progress)
                    .await
            },
        )
        .await;

        let assembled = match aggregate(results, ranges.len()) {
            Ok(_) => self.assemble(dest, &sinks).await,
            Err(e) => Err(e),
        };
        self.remove_all(&sinks).await;
        let written = assembled?;

        if written != size {
            let _ = self.fs.remove_file(dest).await;
            return Err(Error::malformed(
                url,
                format!("assembled {written} bytes, expected {size}"),
            ));
        }
        Ok(counter.file_stats(ranges.len()))
    }

    /// Concatenates the sinks in index order into `dest`.
    async fn assemble(&self, dest: &Path, sinks: &[PathBuf]) -> Result<u64> {
        let part = part_path(dest);
        let mut out = self.fs.create_file(&part).await?;
        let mut written = 0;
        for sink in sinks {
            match self.fs.append_file(&mut out, sink).await {
                Ok(n) => written += n,
                Err(e) => {
                    drop(out);
                    let _ = self.fs.remove_file(&part).await;
                    return Err(e.into());
                }
            }
        }
        out.flush().await?;
        drop(out);
        self.fs.rename_file(&part, dest).await?;
        Ok(written)
    }

    async fn remove_all(&self, sinks: &[PathBuf]) {
        for sink in sinks {
            if let Err(e) = self.fs.remove_file(sink).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!("Could not remove {}: {e}", sink.display());
            }
        }
    }

    async fn download_single(&self, url: &str, dest: &Path, name: &str) -> Result<FileStats> {
        let response = self.source.fetch_all(url).await?;
        let expected = response.content_length;
        let counter = ProgressCounter::new(name, expected.unwrap_or(0), Arc::clone(&self.progress));
        self.progress.on_file_start(name, expected.unwrap_or(0));

        let part = part_path(dest);
        let mut out = self.fs.create_file(&part).await?;
        let mut body = response.body;
        let streamed: Result<u64> = async {
            let mut written = 0u64;
            while let Some(bytes) = body.next().await {
                let bytes = bytes?;
                out.write_all(&bytes).await?;
                written += bytes.len() as u64;
                counter.add(bytes.len() as u64);
            }
            out.flush().await?;
            Ok(written)
        }
        .await;
        drop(out);

        let written = match streamed {
            Ok(n) if expected.is_none_or(|len| len == n) => n,
            Ok(n) => {
                let _ = self.fs.remove_file(&part).await;
                return Err(Error::malformed(
                    url,
                    format!("received {n} bytes, announced {expected:?}"),
                ));
            }
            Err(e) => {
                let _ = self.fs.remove_file(&part).await;
                return Err(e);
            }
        };
        self.fs.rename_file(&part, dest).await?;
        log::debug!("Single-stream download of {url} wrote {written} bytes");
        Ok(counter.file_stats(1))
    }
}
