//! Chunk workers: move one descriptor's bytes in either direction.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::pool::{ChunkProgress, Transferred};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::plan::ChunkDescriptor;
use crate::remote::{RangeSource, RemoteDrive, UploadSession};

fn range_error(chunk: ChunkDescriptor, reason: impl Into<String>) -> Error {
    Error::RangeUnsupported {
        start: chunk.offset,
        end: chunk.end(),
        reason: reason.into(),
    }
}

/// Downloads one byte range into its own sink file.
///
/// The server must answer with partial content. A full-body answer is only
/// accepted when the range already is the whole resource. Any byte count
/// other than the descriptor's length fails the chunk.
pub async fn download_range<S, F>(
    source: &S,
    fs: &F,
    url: &str,
    chunk: ChunkDescriptor,
    sink: &Path,
    progress: &ChunkProgress,
) -> Result<Transferred>
where
    S: RangeSource + ?Sized,
    F: FileSystem + ?Sized,
{
    let mut file = fs.create_file(sink).await?;
    if chunk.is_empty() {
        return Ok(Transferred {
            bytes: 0,
            tag: None,
        });
    }

    let response = source.fetch_range(url, chunk.offset, chunk.end()).await?;
    let whole_resource = chunk.offset == 0 && response.content_length == Some(chunk.length);
    if !response.partial && !whole_resource {
        return Err(range_error(chunk, "server ignored the Range header"));
    }
    if let Some(announced) = response.content_length
        && announced != chunk.length
    {
        return Err(range_error(
            chunk,
            format!("server announced {announced} bytes"),
        ));
    }

    let mut body = response.body;
    let mut written = 0u64;
    while let Some(bytes) = body.next().await {
        let bytes = bytes?;
        written += bytes.len() as u64;
        if written > chunk.length {
            return Err(range_error(chunk, "server sent more bytes than requested"));
        }
        file.write_all(&bytes).await?;
        progress.advance(bytes.len() as u64);
    }
    file.flush().await?;

    if written != chunk.length {
        return Err(range_error(
            chunk,
            format!("received {written} of {} bytes", chunk.length),
        ));
    }
    Ok(Transferred {
        bytes: written,
        tag: None,
    })
}

/// Uploads one part of a multipart session and returns its content tag.
pub async fn upload_part<D, F>(
    drive: &D,
    fs: &F,
    session: &UploadSession,
    path: &Path,
    chunk: ChunkDescriptor,
    progress: &ChunkProgress,
) -> Result<Transferred>
where
    D: RemoteDrive + ?Sized,
    F: FileSystem + ?Sized,
{
    let url = drive.part_upload_url(session, chunk.index).await?;
    let data = fs.read_range(path, chunk.offset, chunk.length).await?;
    let tag = drive.upload_part(&url, data).await?;
    progress.advance(chunk.length);
    log::debug!("Part {} uploaded ({} bytes)", chunk.index, chunk.length);
    Ok(Transferred {
        bytes: chunk.length,
        tag: Some(tag),
    })
}
