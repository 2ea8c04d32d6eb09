//! Wire shapes of the drive API and their validation.
//!
//! Every response is an envelope `{ code, message, data }`. It is decoded
//! into an [`ApiResponse`] before any field is trusted, then each call
//! converts its typed payload into the domain types of [`super`].

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{EntryKind, FileId, Negotiation, RemoteEntry, UploadSession};
use crate::error::{Error, Result};

/// Status code for success.
pub const CODE_OK: i64 = 0;
/// Status code reported when a same-named file already exists.
pub const CODE_DUPLICATE: i64 = 5060;

/// A decoded API response: the typed payload, or the remote's error status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse<T> {
    /// `code == 0` with a payload.
    Ok(T),
    /// Any other code.
    Err {
        /// Remote status code.
        code: i64,
        /// Remote message.
        message: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl Envelope {
    fn parse(endpoint: &str, body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::malformed(endpoint, e.to_string()))
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Decodes a response body whose success variant must carry `data`.
    ///
    /// The payload is only interpreted as `T` once the status says success,
    /// so error responses with arbitrary `data` still decode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the body is not an envelope,
    /// or reports success without a well-formed payload.
    pub fn decode(endpoint: &str, body: &[u8]) -> Result<Self> {
        let envelope = Envelope::parse(endpoint, body)?;
        if envelope.code != CODE_OK {
            return Ok(Self::Err {
                code: envelope.code,
                message: envelope.message,
            });
        }
        let data = envelope
            .data
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::malformed(endpoint, "success without data"))?;
        serde_json::from_value(data)
            .map(Self::Ok)
            .map_err(|e| Error::malformed(endpoint, e.to_string()))
    }

    /// Converts into a `Result`, mapping remote errors to [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns the remote status as an error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(data) => Ok(data),
            Self::Err { code, message } => Err(Error::remote(code, message)),
        }
    }
}

impl ApiResponse<()> {
    /// Decodes a response where only the status code matters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the body is not an envelope.
    pub fn decode_status(endpoint: &str, body: &[u8]) -> Result<Self> {
        let envelope = Envelope::parse(endpoint, body)?;
        if envelope.code == CODE_OK {
            Ok(Self::Ok(()))
        } else {
            Ok(Self::Err {
                code: envelope.code,
                message: envelope.message,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadRequestData {
    #[serde(default)]
    pub reuse: bool,
    #[serde(default)]
    pub file_id: Option<u64>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub storage_node: Option<String>,
}

/// Interprets the negotiation response, including the duplicate status.
pub fn negotiation(endpoint: &str, body: &[u8]) -> Result<Negotiation> {
    match ApiResponse::<UploadRequestData>::decode(endpoint, body)? {
        ApiResponse::Err { code, .. } if code == CODE_DUPLICATE => Ok(Negotiation::Duplicate),
        ApiResponse::Err { code, message } => Err(Error::remote(code, message)),
        ApiResponse::Ok(data) if data.reuse => Ok(Negotiation::Reused {
            file_id: data.file_id.map(FileId),
        }),
        ApiResponse::Ok(data) => {
            let missing = |field: &str| Error::malformed(endpoint, format!("missing {field}"));
            Ok(Negotiation::Session(UploadSession {
                bucket: data.bucket.ok_or_else(|| missing("Bucket"))?,
                key: data.key.ok_or_else(|| missing("Key"))?,
                upload_id: data.upload_id.ok_or_else(|| missing("UploadId"))?,
                file_id: FileId(data.file_id.ok_or_else(|| missing("FileId"))?),
                storage_node: data.storage_node.ok_or_else(|| missing("StorageNode"))?,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListData {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub info_list: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListEntry {
    pub file_id: u64,
    pub file_name: String,
    #[serde(rename = "Type")]
    pub kind: u8,
    #[serde(default)]
    pub size: u64,
}

impl From<ListEntry> for RemoteEntry {
    fn from(entry: ListEntry) -> Self {
        Self {
            id: FileId(entry.file_id),
            name: entry.file_name,
            kind: if entry.kind == 1 {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: entry.size,
        }
    }
}

/// Page marker the listing uses when there are no further pages.
pub const LAST_PAGE: &str = "-1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MkdirData {
    pub info: MkdirInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MkdirInfo {
    pub file_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignData {
    pub presigned_urls: std::collections::HashMap<String, String>,
}
