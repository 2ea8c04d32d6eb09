//! Upload coordinator: negotiate, push parts in parallel, complete.

use std::path::Path;
use std::sync::Arc;

use crate::config::TransferConfig;
use crate::conflict::{ConflictPolicy, ConflictPrompt, ConflictResolver, DeclinePrompt};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::hash::file_md5;
use crate::progress::{NoProgress, ProgressCounter, TransferProgress};
use crate::remote::{
    CODE_DUPLICATE, CompletedPart, FileId, Negotiation, RemoteDrive, UploadRequest,
    UploadSession,
};
use crate::stats::FileStats;

use super::pool::{aggregate, run_chunks};
use super::{ChunkResult, TransferJob, worker};

/// How an upload ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// All parts were sent and the file was finalized.
    Uploaded(FileStats),
    /// The remote already had identical content; no bytes were sent.
    Reused,
}

/// Returns the final path component as a UTF-8 name.
pub(crate) fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))
}

/// Uploads local files and directory trees to a [`RemoteDrive`].
pub struct Uploader<D: RemoteDrive, F: FileSystem = TokioFileSystem> {
    pub(crate) drive: D,
    pub(crate) config: TransferConfig,
    pub(crate) fs: F,
    pub(crate) progress: Arc<dyn TransferProgress>,
    prompt: Arc<dyn ConflictPrompt>,
}

impl<D: RemoteDrive> Uploader<D, TokioFileSystem> {
    /// Creates an uploader with the default file system.
    #[must_use]
    pub fn new(drive: D, config: TransferConfig) -> Self {
        Self::with_fs(drive, config, TokioFileSystem)
    }
}

impl<D: RemoteDrive, F: FileSystem> Uploader<D, F> {
    /// Creates an uploader with a custom file system implementation.
    #[must_use]
    pub fn with_fs(drive: D, config: TransferConfig, fs: F) -> Self {
        Self {
            drive,
            config,
            fs,
            progress: Arc::new(NoProgress),
            prompt: Arc::new(DeclinePrompt),
        }
    }

    /// Attaches a progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn TransferProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Attaches the prompt consulted by [`ConflictPolicy::Ask`].
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn ConflictPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Returns a reference to the remote drive.
    #[must_use]
    pub const fn drive(&self) -> &D {
        &self.drive
    }

    /// Returns a reference to the transfer configuration.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads one file into the remote directory `parent`.
    ///
    /// The file is uploaded under its own name. Same-named files in `parent`
    /// are handled according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConflictCancelled`] when the policy declines,
    /// [`Error::PartialTransfer`] when any part failed (the session is then
    /// never completed), or the first remote or I/O error.
    pub async fn upload_file(
        &self,
        path: &Path,
        parent: FileId,
        policy: ConflictPolicy,
    ) -> Result<UploadOutcome> {
        self.config.validate_file()?;
        let name = entry_name(path)?;
        self.upload_labeled(path, &name, parent, policy).await
    }

    /// Uploads one file, reporting progress under `label`.
    ///
    /// `label` must be unique among the uploads running at the same time.
    pub(crate) async fn upload_labeled(
        &self,
        path: &Path,
        label: &str,
        parent: FileId,
        policy: ConflictPolicy,
    ) -> Result<UploadOutcome> {
        let name = entry_name(path)?;
        match self.transfer_file(path, &name, label, parent, policy).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if !matches!(e, Error::ConflictCancelled { .. }) {
                    self.progress.on_file_error(label, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn transfer_file(
        &self,
        path: &Path,
        name: &str,
        label: &str,
        parent: FileId,
        policy: ConflictPolicy,
    ) -> Result<UploadOutcome> {
        let size = self
            .fs
            .file_size(path)
            .await
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        let mut resolver = ConflictResolver::new(&self.drive, policy, self.prompt.as_ref());
        let duplicate = resolver.before_upload(name, parent).await?;
        let etag = file_md5(path).await?;

        let mut request = UploadRequest {
            name: name.to_string(),
            parent,
            size,
            etag,
            duplicate,
        };
        let mut renegotiated = false;
        let session = loop {
            match self.drive.negotiate_upload(&request).await? {
                Negotiation::Reused { file_id } => {
                    log::info!("{label}: content already on the remote ({file_id:?}), reused");
                    self.progress.on_file_start(label, size);
                    self.progress.on_file_complete(label, &FileStats::reused(size));
                    return Ok(UploadOutcome::Reused);
                }
                Negotiation::Session(session) => break session,
                Negotiation::Duplicate if !renegotiated => {
                    request.duplicate = resolver.on_duplicate(name, parent).await?;
                    renegotiated = true;
                }
                Negotiation::Duplicate => {
                    return Err(Error::remote(
                        CODE_DUPLICATE,
                        format!("{name} still conflicts after resolution"),
                    ));
                }
            }
        };

        let job = TransferJob::upload(
            path,
            name,
            size,
            self.config.chunk_concurrency,
            self.config.part_size,
        );
        let stats = self.send_parts(&job, path, label, &session).await?;
        Ok(UploadOutcome::Uploaded(stats))
    }

    async fn send_parts(
        &self,
        job: &TransferJob,
        path: &Path,
        label: &str,
        session: &UploadSession,
    ) -> Result<FileStats> {
        let parts = job.plan();
        log::debug!(
            "Uploading {label} ({} bytes) as {} part(s), job {}",
            job.total_size,
            parts.len(),
            job.id
        );
        let counter = Arc::new(ProgressCounter::new(
            label,
            job.total_size,
            Arc::clone(&self.progress),
        ));
        self.progress.on_file_start(label, job.total_size);

        let drive = &self.drive;
        let fs = &self.fs;
        let results = run_chunks(
            &parts,
            job.concurrency,
            &self.config.retry,
            &counter,
            |part, progress| async move {
                worker::upload_part(drive, fs, session, path, part, &progress).await
            },
        )
        .await;

        let completed = completed_parts(aggregate(results, parts.len())?)?;
        self.drive.complete_multipart(session, &completed).await?;

        if job.total_size > self.config.large_file_threshold {
            let grace = self.config.large_file_grace();
            log::debug!("Waiting {grace:?} for the remote to assemble {label}");
            tokio::time::sleep(grace).await;
        }
        self.drive.finalize_upload(session).await?;

        let stats = counter.file_stats(parts.len());
        self.progress.on_file_complete(label, &stats);
        log::info!("Uploaded {label} ({} bytes)", job.total_size);
        Ok(stats)
    }
}

/// Builds the completion list from sorted, gap-free results.
fn completed_parts(results: Vec<ChunkResult>) -> Result<Vec<CompletedPart>> {
    results
        .into_iter()
        .map(|result| {
            let number = result.index;
            result
                .tag
                .map(|etag| CompletedPart { number, etag })
                .ok_or_else(|| Error::malformed("part upload", format!("part {number} has no tag")))
        })
        .collect()
}
