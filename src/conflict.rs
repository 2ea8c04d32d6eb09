//! Same-name conflict handling for uploads.
//!
//! Before an upload negotiates a session, the target directory is probed for
//! a file of the same name. The [`ConflictPolicy`] decides what happens then,
//! and the same decision is reused when the remote itself reports a duplicate
//! during negotiation.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::remote::{CODE_DUPLICATE, DuplicateMode, FileId, RemoteDrive, RemoteEntry};

/// What to do when the destination already holds a same-named file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Upload next to the existing file; the remote derives a new name.
    #[default]
    KeepBoth,
    /// Delete the existing file, then upload.
    Overwrite,
    /// Skip the file.
    Cancel,
    /// Ask a [`ConflictPrompt`] once per conflicting file.
    Ask,
}

/// Answer of a [`ConflictPrompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepBoth,
    Overwrite,
    Cancel,
}

/// Interactive source of conflict decisions for [`ConflictPolicy::Ask`].
///
/// Other uploads keep running while a prompt waits for its answer.
#[async_trait]
pub trait ConflictPrompt: Send + Sync {
    /// Chooses how to handle an existing remote file called `name`.
    async fn choose(&self, name: &str) -> ConflictChoice;
}

/// Prompt that always declines, used when no interactive prompt is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclinePrompt;

#[async_trait]
impl ConflictPrompt for DeclinePrompt {
    async fn choose(&self, _name: &str) -> ConflictChoice {
        ConflictChoice::Cancel
    }
}

/// Result of probing the destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    NotFound,
    Found(RemoteEntry),
}

/// The decision taken for one conflicting file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Proceed and keep both files.
    KeepBoth,
    /// Proceed in overwrite mode, after deleting `replaced` if it was known.
    Overwrite {
        /// The entry that was deleted.
        replaced: Option<RemoteEntry>,
    },
    /// Do not upload.
    Cancel,
}

impl ConflictDecision {
    /// Duplicate mode to negotiate with, or [`Error::ConflictCancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConflictCancelled`] for [`ConflictDecision::Cancel`].
    pub fn duplicate_mode(&self, name: &str) -> Result<DuplicateMode> {
        match self {
            Self::KeepBoth => Ok(DuplicateMode::KeepBoth),
            Self::Overwrite { .. } => Ok(DuplicateMode::Overwrite),
            Self::Cancel => Err(Error::ConflictCancelled {
                name: name.to_string(),
            }),
        }
    }
}

/// Applies a [`ConflictPolicy`] to one file.
///
/// With [`ConflictPolicy::Ask`] the prompt is consulted at most once; later
/// conflicts for the same file reuse the first answer.
pub struct ConflictResolver<'a, D: ?Sized> {
    drive: &'a D,
    policy: ConflictPolicy,
    prompt: &'a dyn ConflictPrompt,
    answered: Option<ConflictChoice>,
}

impl<'a, D: RemoteDrive + ?Sized> ConflictResolver<'a, D> {
    /// Creates a resolver for one file.
    pub fn new(drive: &'a D, policy: ConflictPolicy, prompt: &'a dyn ConflictPrompt) -> Self {
        Self {
            drive,
            policy,
            prompt,
            answered: None,
        }
    }

    /// Looks for a file called `name` directly under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub async fn probe(&self, name: &str, parent: FileId) -> Result<Probe> {
        let entries = self.drive.list_directory(parent).await?;
        Ok(entries
            .into_iter()
            .find(|entry| !entry.is_dir() && entry.name == name)
            .map_or(Probe::NotFound, Probe::Found))
    }

    async fn choice(&mut self, name: &str) -> ConflictChoice {
        match self.policy {
            ConflictPolicy::KeepBoth => ConflictChoice::KeepBoth,
            ConflictPolicy::Overwrite => ConflictChoice::Overwrite,
            ConflictPolicy::Cancel => ConflictChoice::Cancel,
            ConflictPolicy::Ask => {
                if let Some(answer) = self.answered {
                    return answer;
                }
                let answer = self.prompt.choose(name).await;
                self.answered = Some(answer);
                answer
            }
        }
    }

    /// Decides what to do about `existing`, deleting it for overwrite.
    ///
    /// After a delete the directory is probed again; a file that is still
    /// listed fails the upload instead of racing the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete or the re-probe fails.
    pub async fn decide(
        &mut self,
        name: &str,
        parent: FileId,
        existing: Option<RemoteEntry>,
    ) -> Result<ConflictDecision> {
        match self.choice(name).await {
            ConflictChoice::KeepBoth => Ok(ConflictDecision::KeepBoth),
            ConflictChoice::Cancel => {
                log::info!("Skipping {name}: a file with that name already exists");
                Ok(ConflictDecision::Cancel)
            }
            ConflictChoice::Overwrite => {
                if let Some(entry) = &existing {
                    log::info!("Deleting existing {name} ({}) before upload", entry.id);
                    self.drive.delete_entry(entry).await?;
                    if let Probe::Found(still) = self.probe(name, parent).await?
                        && still.id == entry.id
                    {
                        return Err(Error::remote(
                            CODE_DUPLICATE,
                            format!("{name} is still listed after delete"),
                        ));
                    }
                }
                Ok(ConflictDecision::Overwrite { replaced: existing })
            }
        }
    }

    /// Runs the pre-upload probe and returns the duplicate mode to negotiate with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConflictCancelled`] when the policy declines, or any
    /// remote error from probing or deleting.
    pub async fn before_upload(&mut self, name: &str, parent: FileId) -> Result<DuplicateMode> {
        match self.probe(name, parent).await? {
            Probe::NotFound => Ok(DuplicateMode::Reject),
            Probe::Found(entry) => self
                .decide(name, parent, Some(entry))
                .await?
                .duplicate_mode(name),
        }
    }

    /// Handles a duplicate reported by the negotiation itself.
    ///
    /// # Errors
    ///
    /// Same as [`before_upload`](Self::before_upload).
    pub async fn on_duplicate(&mut self, name: &str, parent: FileId) -> Result<DuplicateMode> {
        let existing = match self.probe(name, parent).await? {
            Probe::Found(entry) => Some(entry),
            Probe::NotFound => None,
        };
        self.decide(name, parent, existing)
            .await?
            .duplicate_mode(name)
    }
}
