//! Error types for the pan-transfer library.

use thiserror::Error;

/// Errors that can occur during transfer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote API answered with a non-zero status code.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Status code reported by the remote API (or HTTP status).
        code: i64,
        /// Message attached to the status.
        message: String,
    },

    /// The remote API answered with a body that could not be trusted.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        /// API path that produced the response.
        endpoint: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The server ignored or mangled a requested byte range.
    #[error("range {start}-{end} not honored: {reason}")]
    RangeUnsupported {
        /// First requested byte.
        start: u64,
        /// Last requested byte (inclusive).
        end: u64,
        /// What the server did instead.
        reason: String,
    },

    /// One or more chunks of a file failed; the file as a whole failed.
    #[error("{failed} of {total} chunk(s) failed")]
    PartialTransfer {
        /// Number of failed chunks.
        failed: usize,
        /// Number of planned chunks.
        total: usize,
    },

    /// A same-named remote entry exists and the policy declined to proceed.
    #[error("cancelled by conflict policy: {name}")]
    ConflictCancelled {
        /// Name of the conflicting entry.
        name: String,
    },

    /// I/O error on the local side.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A local path that is not a usable file or directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A remote directory id could not be created or published.
    #[error("remote directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether a chunk that failed with this error may be attempted again.
    ///
    /// Only transient transport failures and server-side overload are
    /// retryable. Protocol violations and local I/O are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => is_transient(e),
            Self::Remote { code, .. } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }

    pub(crate) fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn malformed(endpoint: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

/// Connect, timeout and body-stream failures, including a body error that
/// surfaces wrapped in a decode error while streaming.
fn is_transient(e: &reqwest::Error) -> bool {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        return true;
    }
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        if let Some(inner) = inner.downcast_ref::<reqwest::Error>()
            && (inner.is_body() || inner.is_timeout() || inner.is_connect())
        {
            return true;
        }
        if inner.is::<std::io::Error>() {
            return true;
        }
        source = inner.source();
    }
    false
}

/// A specialized `Result` type for pan-transfer operations.
pub type Result<T> = std::result::Result<T, Error>;
