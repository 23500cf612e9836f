//! HTTP utilities
//!
//! Streaming transfer of single files against negotiated storage locations.
//! Uploads stream the local file as the request body (or as a multipart part
//! for presigned-POST style locations); downloads stream into a `.part` file
//! while hashing, leaving the final rename to the verifier.

use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::files::{create_temp_path, ensure_parent_dir, remove_partial};
use crate::transfer::config::TransferConfig;
use crate::transfer::core::validation::{Checksum, StreamingDigest};
use crate::transfer::core::{
    FileOperation, HttpMethod, ProgressCallback, ProgressEvent, RemoteLocation, Result, TransferError,
    TransferUnit,
};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const MAX_ERROR_BODY: usize = 512;

/// A completed download that has not been verified yet
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub temp_path: PathBuf,
    pub bytes: u64,
    /// Digest computed while streaming, in the algorithm of the expected checksum
    pub digest: Option<Checksum>,
}

/// Throttles progress events to one per interval
struct ProgressTicker {
    path: String,
    total: u64,
    started: Instant,
    last: Instant,
    callback: Option<ProgressCallback>,
}

impl ProgressTicker {
    fn new(path: &str, total: u64, callback: Option<ProgressCallback>) -> Self {
        let now = Instant::now();
        Self {
            path: path.to_string(),
            total,
            started: now,
            last: now,
            callback,
        }
    }

    fn tick(&mut self, transferred: u64) {
        let Some(ref callback) = self.callback else { return };
        let now = Instant::now();
        if now.duration_since(self.last) < PROGRESS_INTERVAL && transferred < self.total {
            return;
        }
        self.last = now;

        let elapsed = self.started.elapsed().as_secs_f64();
        let speed_bps = if elapsed > 0.0 { transferred as f64 / elapsed } else { 0.0 };
        callback(ProgressEvent::UnitProgress {
            path: self.path.clone(),
            transferred,
            total: self.total,
            speed_bps,
        });
    }
}

/// Strip the query string, which carries signatures on presigned URLs
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}

/// Map a non-success storage response onto the error taxonomy
///
/// Object stores answer an expired signature with 400, 403 or 410 and a
/// body mentioning the expiry; that case is renegotiated rather than retried.
pub fn status_error(relative_path: &str, url: &str, status: u16, body: &str) -> TransferError {
    let expired = matches!(status, 400 | 403 | 410) && body.to_ascii_lowercase().contains("expired");
    if expired {
        return TransferError::LocationExpired {
            path: relative_path.to_string(),
        };
    }

    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    TransferError::HttpStatus {
        url: redact_url(url),
        status,
        body,
    }
}

fn transport_error(error: reqwest::Error, url: &str, timeout: Duration) -> TransferError {
    if error.is_timeout() {
        TransferError::NetworkTimeout {
            url: redact_url(url),
            duration_secs: timeout.as_secs(),
        }
    } else {
        TransferError::HttpRequest {
            url: redact_url(url),
            source: error.without_url(),
        }
    }
}

/// HTTP client for moving file bytes to and from storage locations
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransferError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
                suggestion: None,
            })?;

        Ok(Self { client })
    }

    fn request(&self, location: &RemoteLocation, timeout: Duration) -> RequestBuilder {
        let mut request = match location.method {
            HttpMethod::Put => self.client.put(&location.url),
            HttpMethod::Post => self.client.post(&location.url),
            HttpMethod::Get => self.client.get(&location.url),
        };
        for (name, value) in &location.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.timeout(timeout)
    }

    async fn check_status(response: Response, location: &RemoteLocation) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(&location.relative_path, &location.url, status.as_u16(), &body))
    }

    /// Stream one local file to its negotiated location
    ///
    /// The file must still have the size recorded at scan time; a file that
    /// changed underneath the transfer is rejected before any bytes are sent.
    pub async fn upload_file(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        timeout: Duration,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<u64> {
        debug!("Uploading {} to {}", unit.relative_path, redact_url(&location.url));

        let file = fs::File::open(&unit.local_path)
            .await
            .map_err(|e| TransferError::io(&unit.local_path, FileOperation::Read, e))?;
        let on_disk = file
            .metadata()
            .await
            .map_err(|e| TransferError::io(&unit.local_path, FileOperation::Metadata, e))?
            .len();
        if on_disk != unit.size {
            return Err(TransferError::Validation {
                message: format!(
                    "{} changed since it was scanned ({} bytes, now {})",
                    unit.relative_path, unit.size, on_disk
                ),
                path: Some(unit.relative_path.clone()),
            });
        }

        let mut ticker = ProgressTicker::new(&unit.relative_path, unit.size, progress_callback);
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                sent += chunk.len() as u64;
                ticker.tick(sent);
            }
        });
        let body = Body::wrap_stream(stream);

        let request = match &location.form_fields {
            Some(fields) => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                let file_name = unit
                    .relative_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(unit.relative_path.as_str())
                    .to_string();
                form = form.part("file", Part::stream_with_length(body, unit.size).file_name(file_name));
                self.request(location, timeout).multipart(form)
            }
            None => self
                .request(location, timeout)
                .header(reqwest::header::CONTENT_LENGTH, unit.size)
                .body(body),
        };

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, &location.url, timeout))?;
        Self::check_status(response, location).await?;

        debug!("Uploaded {} ({} bytes)", unit.relative_path, unit.size);
        Ok(unit.size)
    }

    /// Stream a location's content into `<dest>.part`
    ///
    /// Never touches `dest` itself. On any error or cancellation the partial
    /// file is removed before returning.
    pub async fn download_to_file(
        &self,
        location: &RemoteLocation,
        dest_path: &Path,
        expected: Option<&Checksum>,
        total: u64,
        timeout: Duration,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<DownloadedFile> {
        let temp_path = create_temp_path(dest_path);
        let result = self
            .stream_to_temp(location, &temp_path, expected, total, timeout, cancel, progress_callback)
            .await;

        if result.is_err() {
            remove_partial(&temp_path).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_to_temp(
        &self,
        location: &RemoteLocation,
        temp_path: &Path,
        expected: Option<&Checksum>,
        total: u64,
        timeout: Duration,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<DownloadedFile> {
        debug!("Stream downloading {} to {}", redact_url(&location.url), temp_path.display());

        ensure_parent_dir(temp_path).await?;
        remove_partial(temp_path).await;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::cancelled(Some(&location.relative_path))),
            response = self.request(location, timeout).send() => {
                response.map_err(|e| transport_error(e, &location.url, timeout))?
            }
        };
        let response = Self::check_status(response, location).await?;

        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| TransferError::io(temp_path, FileOperation::Create, e))?;

        let mut digest = expected.map(StreamingDigest::like);
        let mut ticker = ProgressTicker::new(&location.relative_path, total, progress_callback);
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(TransferError::cancelled(Some(&location.relative_path)));
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| transport_error(e, &location.url, timeout))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(temp_path, FileOperation::Write, e))?;
            if let Some(ref mut digest) = digest {
                digest.update(&chunk);
            }
            downloaded += chunk.len() as u64;
            ticker.tick(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| TransferError::io(temp_path, FileOperation::Write, e))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::io(temp_path, FileOperation::Write, e))?;

        debug!("Stream download completed: {} bytes", downloaded);
        Ok(DownloadedFile {
            temp_path: temp_path.to_path_buf(),
            bytes: downloaded,
            digest: digest.map(StreamingDigest::finalize),
        })
    }
}
