//! Whole-file content digest sent to the remote at negotiation.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

const READ_BUF: usize = 64 * 1024;

/// Computes the lowercase hex MD5 of a file, streaming it in 64 KiB reads.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
