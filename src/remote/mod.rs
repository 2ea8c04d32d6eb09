//! Boundary to the remote drive and to plain range-capable file hosts.
//!
//! The transfer engine only talks to the outside world through the
//! [`RemoteDrive`] and [`RangeSource`] traits. [`HttpDrive`] and
//! [`HttpRangeSource`] are the reqwest-backed implementations; tests use
//! in-memory ones.

mod api;
mod http;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use api::{ApiResponse, CODE_DUPLICATE};
pub use http::{HttpDrive, HttpRangeSource, build_http_client};

/// Identifier of a remote file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    /// The root of the drive.
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a remote entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Remote identifier.
    pub id: FileId,
    /// Entry name within its parent.
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

impl RemoteEntry {
    /// Whether this entry is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// How the remote should treat a same-named entry during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateMode {
    /// Report the duplicate back to the caller.
    #[default]
    Reject,
    /// Store the new file next to the existing one under a derived name.
    KeepBoth,
    /// Replace the existing entry.
    Overwrite,
}

impl DuplicateMode {
    /// Wire value of the `duplicate` negotiation field.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Reject => 0,
            Self::KeepBoth => 1,
            Self::Overwrite => 2,
        }
    }
}

/// Parameters of an upload negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// File name on the remote.
    pub name: String,
    /// Parent directory.
    pub parent: FileId,
    /// Total size in bytes.
    pub size: u64,
    /// Hex MD5 of the whole file.
    pub etag: String,
    /// Duplicate handling requested from the remote.
    pub duplicate: DuplicateMode,
}

/// A negotiated multipart upload, shared read-only by every part worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Object-store bucket.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
    /// Multipart upload id.
    pub upload_id: String,
    /// Remote file the upload will become.
    pub file_id: FileId,
    /// Storage node serving the bucket.
    pub storage_node: String,
}

/// Outcome of an upload negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The remote already holds identical content; nothing to upload.
    Reused {
        /// Remote id of the new entry, when reported.
        file_id: Option<FileId>,
    },
    /// Upload the parts through this session.
    Session(UploadSession),
    /// A same-named entry exists and `DuplicateMode::Reject` was requested.
    Duplicate,
}

/// A successfully uploaded part, as listed in the completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub number: usize,
    /// Content tag returned by the store for this part.
    pub etag: String,
}

/// Operations of the remote drive API used by the upload engine.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    /// Starts an upload, or learns that the content is already present.
    async fn negotiate_upload(&self, request: &UploadRequest) -> Result<Negotiation>;

    /// Lists the entries of a directory.
    async fn list_directory(&self, parent: FileId) -> Result<Vec<RemoteEntry>>;

    /// Deletes an entry.
    async fn delete_entry(&self, entry: &RemoteEntry) -> Result<()>;

    /// Creates a directory and returns its id.
    async fn create_directory(&self, name: &str, parent: FileId) -> Result<FileId>;

    /// Requests a presigned URL for one part.
    async fn part_upload_url(&self, session: &UploadSession, part: usize) -> Result<String>;

    /// Sends a part's bytes to its presigned URL and returns the content tag.
    async fn upload_part(&self, url: &str, body: Bytes) -> Result<String>;

    /// Stitches uploaded parts, listed in ascending part order, into one object.
    async fn complete_multipart(&self, session: &UploadSession, parts: &[CompletedPart]) -> Result<()>;

    /// Closes the upload session and makes the file visible.
    async fn finalize_upload(&self, session: &UploadSession) -> Result<()>;
}

/// Body of a ranged (or whole) fetch.
pub struct RangeResponse {
    /// Whether the server answered 206 Partial Content.
    pub partial: bool,
    /// Length announced by the server for this body.
    pub content_length: Option<u64>,
    /// The body bytes.
    pub body: BoxStream<'static, Result<Bytes>>,
}

/// A file host that serves byte ranges over plain URLs.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Total size of the resource.
    async fn content_length(&self, url: &str) -> Result<u64>;

    /// Fetches the inclusive byte range `start..=end`.
    async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse>;

    /// Fetches the whole resource.
    async fn fetch_all(&self, url: &str) -> Result<RangeResponse>;
}

/// Maps an API path to a signature pair attached as a query parameter.
pub trait RequestSigner: Send + Sync {
    /// Returns `(name, value)` for `path`, or `None` to send unsigned.
    fn sign(&self, path: &str) -> Option<(String, String)>;
}

/// Signer that never signs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn sign(&self, _path: &str) -> Option<(String, String)> {
        None
    }
}

/// Authorization material and working directory of a logged-in session.
///
/// Built once at startup and passed explicitly to the HTTP drive.
#[derive(Debug, Clone)]
pub struct AuthContext {
    headers: HeaderMap,
    cwd: FileId,
}

impl AuthContext {
    /// Creates a context from prepared request headers.
    #[must_use]
    pub const fn new(headers: HeaderMap, cwd: FileId) -> Self {
        Self { headers, cwd }
    }

    /// Creates a context authorized by a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the token is not a valid header value.
    pub fn bearer(token: &str, cwd: FileId) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::Config("token contains invalid header characters".into()))?;
        headers.insert(AUTHORIZATION, value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self { headers, cwd })
    }

    /// Headers to attach to every API request.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The session's current working directory.
    #[must_use]
    pub const fn cwd(&self) -> FileId {
        self.cwd
    }
}
