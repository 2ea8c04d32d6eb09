//! In-memory remotes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::progress::TransferProgress;
use crate::remote::{
    CompletedPart, DuplicateMode, EntryKind, FileId, Negotiation, RangeResponse, RangeSource,
    RemoteDrive, RemoteEntry, UploadRequest, UploadSession,
};
use crate::stats::FileStats;

#[derive(Default)]
struct DriveState {
    next_id: u64,
    entries: HashMap<FileId, Vec<RemoteEntry>>,
    pending: HashMap<String, UploadRequest>,
    requests: Vec<UploadRequest>,
    parts: Vec<(usize, u64)>,
    completed: Vec<(FileId, Vec<CompletedPart>)>,
    finalized: Vec<FileId>,
    events: Vec<String>,
    timeline: Vec<(&'static str, Instant)>,
}

impl DriveState {
    fn allocate(&mut self) -> FileId {
        self.next_id += 1;
        FileId(1000 + self.next_id)
    }

    fn file_named(&self, parent: FileId, name: &str) -> Option<&RemoteEntry> {
        self.entries
            .get(&parent)?
            .iter()
            .find(|e| !e.is_dir() && e.name == name)
    }
}

/// A drive that keeps its tree in memory and records every call.
#[derive(Default)]
pub struct MockDrive {
    state: Mutex<DriveState>,
    deletes: AtomicUsize,
    failing_parts: HashSet<usize>,
    failing_dirs: HashSet<String>,
    reuse: HashSet<String>,
    duplicates_left: AtomicUsize,
}

impl MockDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upload of part `number` fail with a non-retryable error.
    pub fn failing_part(mut self, number: usize) -> Self {
        self.failing_parts.insert(number);
        self
    }

    /// Makes creating a directory called `name` fail.
    pub fn failing_dir(mut self, name: &str) -> Self {
        self.failing_dirs.insert(name.to_string());
        self
    }

    /// Reports content with this MD5 as already present.
    pub fn reusing(mut self, etag: &str) -> Self {
        self.reuse.insert(etag.to_string());
        self
    }

    /// Answers the first negotiation with a duplicate status.
    pub fn duplicate_once(self) -> Self {
        self.duplicates_left.store(1, Ordering::SeqCst);
        self
    }

    pub fn add_file(&self, parent: FileId, name: &str, size: u64) -> FileId {
        self.add_entry(parent, name, EntryKind::File, size)
    }

    pub fn add_dir(&self, parent: FileId, name: &str) -> FileId {
        self.add_entry(parent, name, EntryKind::Directory, 0)
    }

    fn add_entry(&self, parent: FileId, name: &str, kind: EntryKind, size: u64) -> FileId {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate();
        state.entries.entry(parent).or_default().push(RemoteEntry {
            id,
            name: name.to_string(),
            kind,
            size,
        });
        id
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn part_sizes(&self) -> Vec<(usize, u64)> {
        self.state.lock().unwrap().parts.clone()
    }

    pub fn completed(&self) -> Vec<(FileId, Vec<CompletedPart>)> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn finalized(&self) -> Vec<FileId> {
        self.state.lock().unwrap().finalized.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// When each `complete` and `finalize` call arrived, in call order.
    pub fn timeline(&self) -> Vec<(&'static str, Instant)> {
        self.state.lock().unwrap().timeline.clone()
    }

    pub fn names_in(&self, parent: FileId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&parent)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn dir_id(&self, parent: FileId, name: &str) -> Option<FileId> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&parent)?
            .iter()
            .find(|e| e.is_dir() && e.name == name)
            .map(|e| e.id)
    }
}

#[async_trait]
impl RemoteDrive for MockDrive {
    async fn negotiate_upload(&self, request: &UploadRequest) -> Result<Negotiation> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state
            .events
            .push(format!("negotiate {} in {}", request.name, request.parent));

        if self.reuse.contains(&request.etag) {
            return Ok(Negotiation::Reused { file_id: None });
        }
        let forced = self
            .duplicates_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let exists = state.file_named(request.parent, &request.name).is_some();
        if request.duplicate == DuplicateMode::Reject && (forced || exists) {
            return Ok(Negotiation::Duplicate);
        }

        let file_id = state.allocate();
        let upload_id = format!("upload-{}", file_id.0);
        state.pending.insert(upload_id.clone(), request.clone());
        Ok(Negotiation::Session(UploadSession {
            bucket: "bucket".into(),
            key: format!("key-{}", file_id.0),
            upload_id,
            file_id,
            storage_node: "node".into(),
        }))
    }

    async fn list_directory(&self, parent: FileId) -> Result<Vec<RemoteEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .entries
            .get(&parent)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_entry(&self, entry: &RemoteEntry) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        for entries in state.entries.values_mut() {
            entries.retain(|e| e.id != entry.id);
        }
        Ok(())
    }

    async fn create_directory(&self, name: &str, parent: FileId) -> Result<FileId> {
        if self.failing_dirs.contains(name) {
            return Err(Error::remote(403, format!("cannot create {name}")));
        }
        let id = self.add_entry(parent, name, EntryKind::Directory, 0);
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("mkdir {name} in {parent} -> {id}"));
        Ok(id)
    }

    async fn part_upload_url(&self, session: &UploadSession, part: usize) -> Result<String> {
        Ok(format!("mock://{}/{part}", session.upload_id))
    }

    async fn upload_part(&self, url: &str, body: Bytes) -> Result<String> {
        let part: usize = url
            .rsplit('/')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| Error::malformed(url, "bad part url"))?;
        if self.failing_parts.contains(&part) {
            return Err(Error::remote(400, format!("part {part} rejected")));
        }
        self.state
            .lock()
            .unwrap()
            .parts
            .push((part, body.len() as u64));
        Ok(format!("etag-{part}"))
    }

    async fn complete_multipart(&self, session: &UploadSession, parts: &[CompletedPart]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.completed.push((session.file_id, parts.to_vec()));
        state.timeline.push(("complete", Instant::now()));
        Ok(())
    }

    async fn finalize_upload(&self, session: &UploadSession) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(request) = state.pending.remove(&session.upload_id) else {
            return Err(Error::remote(404, "unknown upload"));
        };
        let mut name = request.name.clone();
        if request.duplicate == DuplicateMode::KeepBoth
            && state.file_named(request.parent, &name).is_some()
        {
            name = format!("{name}(1)");
        }
        state.finalized.push(session.file_id);
        state.timeline.push(("finalize", Instant::now()));
        state
            .entries
            .entry(request.parent)
            .or_default()
            .push(RemoteEntry {
                id: session.file_id,
                name,
                kind: EntryKind::File,
                size: request.size,
            });
        Ok(())
    }
}

/// How a [`MockSource`] answers range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// 206 with exactly the requested bytes.
    Honor,
    /// 200 with the whole body.
    Ignore,
    /// 206 with one byte missing.
    Short,
}

/// A file host serving one in-memory resource.
pub struct MockSource {
    data: Bytes,
    mode: RangeMode,
    failing_offset: Option<u64>,
    pub requests: Mutex<Vec<Option<(u64, u64)>>>,
}

impl MockSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            mode: RangeMode::Honor,
            failing_offset: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub const fn with_mode(mut self, mode: RangeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Fails the range starting at `offset` with a non-retryable status.
    pub const fn failing_at(mut self, offset: u64) -> Self {
        self.failing_offset = Some(offset);
        self
    }

    fn respond(partial: bool, body: Bytes) -> RangeResponse {
        let len = body.len() as u64;
        let mid = body.len() / 2;
        let pieces = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        RangeResponse {
            partial,
            content_length: Some(len),
            body: futures::stream::iter(pieces).boxed(),
        }
    }
}

#[async_trait]
impl RangeSource for MockSource {
    async fn content_length(&self, _url: &str) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(&self, _url: &str, start: u64, end: u64) -> Result<RangeResponse> {
        self.requests.lock().unwrap().push(Some((start, end)));
        if self.failing_offset == Some(start) {
            return Err(Error::remote(403, "forbidden"));
        }
        let from = usize::try_from(start).unwrap();
        let to = usize::try_from(end).unwrap() + 1;
        Ok(match self.mode {
            RangeMode::Honor => Self::respond(true, self.data.slice(from..to)),
            RangeMode::Ignore => Self::respond(false, self.data.clone()),
            RangeMode::Short => {
                let mut response = Self::respond(true, self.data.slice(from..to - 1));
                response.content_length = None;
                response
            }
        })
    }

    async fn fetch_all(&self, _url: &str) -> Result<RangeResponse> {
        self.requests.lock().unwrap().push(None);
        Ok(Self::respond(false, self.data.clone()))
    }
}

/// Observer that records the keys it is called with.
#[derive(Default)]
pub struct RecordingProgress {
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    completions: Notify,
}

impl RecordingProgress {
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Waits until the file with key `name` has completed.
    pub async fn wait_for(&self, name: &str) {
        loop {
            let done = self.completed.lock().unwrap().iter().any(|n| n == name);
            if done {
                return;
            }
            self.completions.notified().await;
        }
    }
}

impl TransferProgress for RecordingProgress {
    fn on_file_start(&self, name: &str, _size: u64) {
        self.started.lock().unwrap().push(name.to_string());
    }

    fn on_file_complete(&self, name: &str, _stats: &FileStats) {
        self.completed.lock().unwrap().push(name.to_string());
        self.completions.notify_one();
    }
}
