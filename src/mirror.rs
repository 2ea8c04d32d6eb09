//! Mirrors a local directory tree onto the remote drive.
//!
//! The tree is walked once. Directories are created (or reused) in walk
//! order and each one's remote id is published to a [`RemoteDirectoryMap`]
//! before anything below it is looked at. Files are handed over a channel to
//! a bounded pool of file uploads that runs while the walk is still creating
//! directories.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use walkdir::WalkDir;

use crate::conflict::ConflictPolicy;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::remote::{FileId, RemoteDrive};
use crate::stats::{SessionStats, SessionStatsBuilder};
use crate::transfer::upload::entry_name;
use crate::transfer::{UploadOutcome, Uploader};

/// Directory names that are never mirrored.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "venv",
    ".venv",
    "__pycache__",
    "node_modules",
    ".idea",
    ".mypy_cache",
    ".pytest_cache",
];

fn is_excluded(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| EXCLUDED_DIRS.contains(&n))
}

/// Options of a directory upload.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Only upload files with one of these extensions (case-insensitive,
    /// without the dot). Empty means every file.
    pub extensions: Vec<String>,
    /// Name of the remote root directory; defaults to the local name.
    pub remote_name: Option<String>,
}

impl MirrorOptions {
    /// Restricts the upload to the given extensions.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Uploads the tree under a different remote name.
    #[must_use]
    pub fn with_remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Whether a file passes the extension filter.
    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }
}

/// Local directory path to remote directory id, shared by the walk and the
/// file uploads.
///
/// Each path is published exactly once; readers only ever see ids that were
/// fully created.
#[derive(Debug, Default)]
pub struct RemoteDirectoryMap {
    ids: RwLock<HashMap<PathBuf, FileId>>,
}

impl RemoteDirectoryMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the remote id of a local directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryUnavailable`] if the path was already
    /// published or the map is poisoned.
    pub fn publish(&self, path: &Path, id: FileId) -> Result<()> {
        let mut ids = self
            .ids
            .write()
            .map_err(|_| Error::DirectoryUnavailable("directory map poisoned".into()))?;
        if ids.contains_key(path) {
            return Err(Error::DirectoryUnavailable(format!(
                "{} published twice",
                path.display()
            )));
        }
        ids.insert(path.to_path_buf(), id);
        Ok(())
    }

    /// Looks up the remote id of a local directory.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<FileId> {
        self.ids.read().ok()?.get(path).copied()
    }

    /// Number of published directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.read().map_or(0, |ids| ids.len())
    }

    /// Whether nothing has been published yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct WalkItem {
    path: PathBuf,
    is_dir: bool,
}

/// Walks `root` in pre-order, pruning excluded directories.
///
/// Returns the entries below `root` and the number of unreadable ones.
fn walk(root: &Path) -> (Vec<WalkItem>, usize) {
    let mut items = Vec::new();
    let mut unreadable = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && is_excluded(e.file_name())));
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Cannot read {e}");
                unreadable += 1;
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_file() {
            items.push(WalkItem {
                path: entry.into_path(),
                is_dir: file_type.is_dir(),
            });
        } else {
            log::debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }
    (items, unreadable)
}

impl<D: RemoteDrive, F: FileSystem> Uploader<D, F> {
    /// Returns the id of directory `name` under `parent`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent cannot be listed or the directory
    /// cannot be created.
    pub async fn ensure_directory(&self, name: &str, parent: FileId) -> Result<FileId> {
        let existing = self
            .drive
            .list_directory(parent)
            .await?
            .into_iter()
            .find(|e| e.is_dir() && e.name == name);
        if let Some(entry) = existing {
            log::debug!("Reusing remote directory {name} ({})", entry.id);
            return Ok(entry.id);
        }
        let id = self.drive.create_directory(name, parent).await?;
        log::debug!("Created remote directory {name} ({id})");
        Ok(id)
    }

    /// Uploads the tree under `root` into the remote directory `parent`.
    ///
    /// A directory that cannot be created is logged and its whole subtree is
    /// skipped; every other file is still attempted. Per-file failures are
    /// tallied in the returned stats rather than returned as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, `root` is not a
    /// directory, or the remote root directory cannot be created.
    pub async fn upload_directory(
        &self,
        root: &Path,
        parent: FileId,
        policy: ConflictPolicy,
        options: &MirrorOptions,
    ) -> Result<SessionStats> {
        self.config.validate()?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|_| Error::InvalidPath(root.display().to_string()))?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(Error::InvalidPath(root.display().to_string()));
        }
        let root_name = match &options.remote_name {
            Some(name) => name.clone(),
            None => entry_name(&root)?,
        };

        let walk_root = root.clone();
        let (items, unreadable) = tokio::task::spawn_blocking(move || walk(&walk_root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let mut builder = SessionStatsBuilder::new();
        let root_id = self
            .ensure_directory(&root_name, parent)
            .await
            .map_err(|e| Error::DirectoryUnavailable(format!("{root_name}: {e}")))?;
        let directories = RemoteDirectoryMap::new();
        directories.publish(&root, root_id)?;
        builder.add_directory();
        self.progress.on_directory_created(&root_name);
        log::info!(
            "Mirroring {} into {root_name} ({} entries)",
            root.display(),
            items.len()
        );

        let concurrency = self.config.file_concurrency.max(1);
        let (tx, rx) = mpsc::channel::<PathBuf>(concurrency);
        let directories = &directories;
        let root = root.as_path();
        let root_name = root_name.as_str();

        let walker = async {
            let mut tx = tx;
            let mut created = 0usize;
            let mut skipped = 0usize;
            for item in items {
                let Some(parent_id) = item.path.parent().and_then(|p| directories.get(p)) else {
                    if !item.is_dir && options.accepts(&item.path) {
                        skipped += 1;
                    }
                    continue;
                };
                if !item.is_dir {
                    if options.accepts(&item.path) && tx.send(item.path).await.is_err() {
                        break;
                    }
                    continue;
                }

                let relative = item.path.strip_prefix(root).unwrap_or(&item.path);
                let created_id = match entry_name(&item.path) {
                    Ok(name) => self.ensure_directory(&name, parent_id).await,
                    Err(e) => Err(e),
                };
                match created_id.and_then(|id| directories.publish(&item.path, id)) {
                    Ok(()) => {
                        created += 1;
                        let display = format!("{root_name}/{}", relative.display());
                        self.progress.on_directory_created(&display);
                    }
                    Err(e) => {
                        log::error!("Skipping {}: {e}", relative.display());
                    }
                }
            }
            (created, skipped)
        };

        let uploads = rx
            .map(|path| async move {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                let label = format!("{root_name}/{}", relative.display());
                let result = match path.parent().and_then(|p| directories.get(p)) {
                    Some(parent_id) => self.upload_labeled(&path, &label, parent_id, policy).await,
                    None => Err(Error::DirectoryUnavailable(path.display().to_string())),
                };
                (path, result)
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>();

        let ((created, skipped), results) = tokio::join!(walker, uploads);

        for _ in 0..created {
            builder.add_directory();
        }
        builder.add_skipped(skipped + unreadable);
        for (path, result) in results {
            match result {
                Ok(UploadOutcome::Uploaded(stats)) => builder.add_transfer(&stats),
                Ok(UploadOutcome::Reused) => builder.add_reused(),
                Err(Error::ConflictCancelled { .. }) => builder.add_cancelled(),
                Err(e) => {
                    log::error!("Upload of {} failed: {e}", path.display());
                    builder.add_failed();
                }
            }
        }
        Ok(builder.build())
    }
}
