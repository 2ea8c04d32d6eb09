//! reqwest-backed implementations of the remote traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, ETAG, RANGE};
use serde_json::json;

use super::api::{self, ApiResponse, LAST_PAGE, ListData, MkdirData, PresignData};
use super::{
    AuthContext, CompletedPart, FileId, Negotiation, RangeResponse, RangeSource, RemoteDrive,
    RemoteEntry, RequestSigner, UploadRequest, UploadSession, Unsigned,
};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

const UPLOAD_REQUEST: &str = "/b/api/file/upload_request";
const LIST_DIRECTORY: &str = "/b/api/file/list/new";
const TRASH: &str = "/b/api/file/trash";
const PRESIGN_PARTS: &str = "/b/api/file/s3_repare_upload_parts_batch";
const COMPLETE_MULTIPART: &str = "/b/api/file/s3_complete_multipart_upload";
const UPLOAD_COMPLETE: &str = "/b/api/file/upload_complete";
const LIST_PAGE_SIZE: u32 = 100;

/// Builds a configured HTTP client for drive and file-host requests.
///
/// `timeout_secs` bounds connecting and each read, not the whole request:
/// a body that keeps arriving is never cut off, a stalled one is.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(config: &RemoteConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.timeout_secs))
        .read_timeout(Duration::from_secs(config.timeout_secs))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(16)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Turns a non-success HTTP status into [`Error::Remote`].
fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::remote(
            i64::from(status.as_u16()),
            status.canonical_reason().unwrap_or("unexpected status"),
        ))
    }
}

/// The drive API over HTTPS.
pub struct HttpDrive {
    http: reqwest::Client,
    base_url: String,
    auth: AuthContext,
    signer: Arc<dyn RequestSigner>,
}

impl HttpDrive {
    /// Creates a drive client that sends unsigned requests.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, auth: AuthContext) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            signer: Arc::new(Unsigned),
        }
    }

    /// Attaches a request signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// The authenticated context in use.
    #[must_use]
    pub const fn auth(&self) -> &AuthContext {
        &self.auth
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .headers(self.auth.headers().clone());
        if let Some((name, value)) = self.signer.sign(path) {
            builder = builder.query(&[(name, value)]);
        }
        builder
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<Bytes> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        Ok(check_status(response)?.bytes().await?)
    }

    async fn post_status(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let bytes = self.post(path, body).await?;
        ApiResponse::<()>::decode_status(path, &bytes)?.into_result()
    }

    fn session_body(session: &UploadSession) -> serde_json::Value {
        json!({
            "bucket": session.bucket,
            "key": session.key,
            "uploadId": session.upload_id,
            "storageNode": session.storage_node,
        })
    }
}

#[async_trait]
impl RemoteDrive for HttpDrive {
    async fn negotiate_upload(&self, request: &UploadRequest) -> Result<Negotiation> {
        let body = json!({
            "driveId": 0,
            "etag": request.etag,
            "fileName": request.name,
            "parentFileId": request.parent.0,
            "size": request.size,
            "type": 0,
            "duplicate": request.duplicate.code(),
        });
        let bytes = self.post(UPLOAD_REQUEST, &body).await?;
        api::negotiation(UPLOAD_REQUEST, &bytes)
    }

    async fn list_directory(&self, parent: FileId) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self
                .request(reqwest::Method::GET, LIST_DIRECTORY)
                .query(&[
                    ("driveId", "0".to_string()),
                    ("limit", LIST_PAGE_SIZE.to_string()),
                    ("orderBy", "file_name".to_string()),
                    ("orderDirection", "asc".to_string()),
                    ("parentFileId", parent.to_string()),
                    ("trashed", "false".to_string()),
                    ("Page", page.to_string()),
                ])
                .send()
                .await?;
            let bytes = check_status(response)?.bytes().await?;
            let data = ApiResponse::<ListData>::decode(LIST_DIRECTORY, &bytes)?.into_result()?;
            let fetched = data.info_list.len();
            entries.extend(data.info_list.into_iter().map(RemoteEntry::from));

            let last = data.next.as_deref().is_none_or(|next| next == LAST_PAGE);
            if last || fetched == 0 {
                break;
            }
            page += 1;
        }
        Ok(entries)
    }

    async fn delete_entry(&self, entry: &RemoteEntry) -> Result<()> {
        let body = json!({
            "driveId": 0,
            "operation": true,
            "fileTrashInfoList": [{
                "FileId": entry.id.0,
                "FileName": entry.name,
                "Type": u8::from(entry.is_dir()),
                "Size": entry.size,
            }],
        });
        self.post_status(TRASH, &body).await
    }

    async fn create_directory(&self, name: &str, parent: FileId) -> Result<FileId> {
        let body = json!({
            "driveId": 0,
            "etag": "",
            "fileName": name,
            "parentFileId": parent.0,
            "size": 0,
            "type": 1,
            "duplicate": 1,
            "NotReuse": true,
            "event": "newCreateFolder",
            "operateType": 1,
        });
        let bytes = self.post(UPLOAD_REQUEST, &body).await?;
        let data = ApiResponse::<MkdirData>::decode(UPLOAD_REQUEST, &bytes)?.into_result()?;
        Ok(FileId(data.info.file_id))
    }

    async fn part_upload_url(&self, session: &UploadSession, part: usize) -> Result<String> {
        let mut body = Self::session_body(session);
        body["partNumberStart"] = json!(part);
        body["partNumberEnd"] = json!(part + 1);
        let bytes = self.post(PRESIGN_PARTS, &body).await?;
        let mut data = ApiResponse::<PresignData>::decode(PRESIGN_PARTS, &bytes)?.into_result()?;
        data.presigned_urls
            .remove(&part.to_string())
            .ok_or_else(|| Error::malformed(PRESIGN_PARTS, format!("no URL for part {part}")))
    }

    async fn upload_part(&self, url: &str, body: Bytes) -> Result<String> {
        let response = self.http.put(url).body(body).send().await?;
        let response = check_status(response)?;
        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|tag| tag.trim_matches('"').to_string())
            .ok_or_else(|| Error::malformed("part upload", "response has no ETag"))
    }

    async fn complete_multipart(&self, session: &UploadSession, parts: &[CompletedPart]) -> Result<()> {
        let mut body = Self::session_body(session);
        body["parts"] = parts
            .iter()
            .map(|p| json!({ "PartNumber": p.number, "ETag": p.etag }))
            .collect();
        self.post_status(COMPLETE_MULTIPART, &body).await
    }

    async fn finalize_upload(&self, session: &UploadSession) -> Result<()> {
        self.post_status(UPLOAD_COMPLETE, &json!({ "fileId": session.file_id.0 }))
            .await
    }
}

/// Plain HTTP(S) file host with `Range` support.
#[derive(Debug, Clone)]
pub struct HttpRangeSource {
    http: reqwest::Client,
}

impl HttpRangeSource {
    /// Creates a range source on top of an HTTP client.
    #[must_use]
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, url: &str, range: Option<(u64, u64)>) -> Result<RangeResponse> {
        let mut request = self.http.get(url);
        if let Some((start, end)) = range {
            request = request.header(RANGE, format!("bytes={start}-{end}"));
        }
        let response = check_status(request.send().await?)?;
        Ok(RangeResponse {
            partial: response.status() == StatusCode::PARTIAL_CONTENT,
            content_length: response.content_length(),
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from))
                .boxed(),
        })
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn content_length(&self, url: &str) -> Result<u64> {
        let response = check_status(self.http.head(url).send().await?)?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::malformed(url, "HEAD response has no content-length"))
    }

    async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse> {
        self.fetch(url, Some((start, end))).await
    }

    async fn fetch_all(&self, url: &str) -> Result<RangeResponse> {
        self.fetch(url, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, TransferConfig};
    use crate::transfer::Downloader;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Request {
        method: String,
        range: Option<(usize, usize)>,
    }

    async fn read_request(stream: &mut TcpStream) -> Option<Request> {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&head);
        let method = text.split_whitespace().next()?.to_string();
        let range = text.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if !name.eq_ignore_ascii_case("range") {
                return None;
            }
            let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
            Some((start.parse().ok()?, end.parse().ok()?))
        });
        Some(Request { method, range })
    }

    /// Serves one request per connection with `handler` and returns the URL.
    async fn serve<H, Fut>(handler: H) -> String
    where
        H: Fn(Request, TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Some(request) = read_request(&mut stream).await {
                        (*handler)(request, stream).await;
                    }
                });
            }
        });
        format!("http://{addr}/file.bin")
    }

    fn client(timeout_secs: u64) -> reqwest::Client {
        build_http_client(&RemoteConfig {
            timeout_secs,
            ..RemoteConfig::default()
        })
        .unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn slow_but_steady_body_outlives_the_timeout() {
        let data = Arc::new(payload(8));
        let url = serve({
            let data = Arc::clone(&data);
            move |_, mut stream| {
                let data = Arc::clone(&data);
                async move {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        data.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    for byte in data.iter() {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        let _ = stream.write_all(&[*byte]).await;
                    }
                }
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.bin");
        let downloader = Downloader::new(HttpRangeSource::new(client(1)), TransferConfig::new());
        let stats = downloader.download_file(&url, &dest, 1, true).await.unwrap();

        assert_eq!(stats.size, 8);
        assert_eq!(std::fs::read(&dest).unwrap(), *data);
    }

    #[tokio::test]
    async fn stalled_body_times_out_as_retryable() {
        let url = serve(|_, mut stream| async move {
            let head = "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\nab";
            let _ = stream.write_all(head.as_bytes()).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stalled.bin");
        let downloader = Downloader::new(HttpRangeSource::new(client(1)), TransferConfig::new());
        let err = downloader.download_file(&url, &dest, 1, true).await.unwrap_err();

        assert!(matches!(err, Error::Network(_)), "{err:?}");
        assert!(err.is_retryable());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn dropped_range_body_is_retried() {
        let data = Arc::new(payload(50));
        let gets = Arc::new(AtomicUsize::new(0));
        let url = serve({
            let data = Arc::clone(&data);
            let gets = Arc::clone(&gets);
            move |request, mut stream| {
                let data = Arc::clone(&data);
                let gets = Arc::clone(&gets);
                async move {
                    if request.method == "HEAD" {
                        let head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            data.len()
                        );
                        let _ = stream.write_all(head.as_bytes()).await;
                        return;
                    }
                    let (start, end) = request.range.unwrap_or((0, data.len() - 1));
                    let body = &data[start..=end];
                    let head = format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{}\r\nConnection: close\r\n\r\n",
                        body.len(),
                        data.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let first = gets.fetch_add(1, Ordering::SeqCst) == 0;
                    let sent = if first { &body[..10] } else { body };
                    let _ = stream.write_all(sent).await;
                }
            }
        })
        .await;

        let retry = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let config = TransferConfig::new().with_retry(retry);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ranges.bin");
        let downloader = Downloader::new(HttpRangeSource::new(client(5)), config);
        downloader.download_file(&url, &dest, 2, false).await.unwrap();

        assert_eq!(gets.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::read(&dest).unwrap(), *data);
    }
}
