//! Chunked media upload
//!
//! A session moves through INIT, sequential APPEND segments, FINALIZE and,
//! when the server asks for it, a STATUS poll loop that sleeps for the
//! server-provided interval between polls. Every call must return 2xx; any
//! other status aborts the session and the remote handle is left orphaned.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::config::{Config, MAX_CHUNK_SIZE};
use crate::credentials::{Authorization, Credential};
use crate::error::{Result, UploadError, UploadPhase};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{ProcessingInfo, ProcessingState};

/// Poll interval used when the server does not provide `check_after_secs`
pub const DEFAULT_CHECK_AFTER_SECS: u64 = 5;

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub media_id: String,
    pub total_bytes: u64,
    /// Number of APPEND calls made
    pub segments: u32,
    /// Number of STATUS calls made
    pub polls: u32,
    /// Total time slept waiting for processing
    pub waited: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    media_id_string: Option<String>,
    #[serde(default)]
    media_id: Option<serde_json::Value>,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

impl UploadResponse {
    fn media_id(&self) -> Option<String> {
        if let Some(id) = &self.media_id_string {
            return Some(id.clone());
        }
        match &self.media_id {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Uploads media files through the chunked upload protocol
pub struct MediaUploader {
    transport: Arc<dyn Transport>,
    credential: Arc<dyn Credential>,
    upload_url: String,
    media_type: String,
    media_category: String,
    chunk_size: usize,
    max_wait_secs: Option<u64>,
}

impl MediaUploader {
    /// Create an uploader from configuration
    ///
    /// # Errors
    ///
    /// Returns `UploadError::ChunkSize` if `[upload] chunk_size` is zero or
    /// above the 5 MiB protocol limit.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        credential: Arc<dyn Credential>,
    ) -> Result<Self> {
        let chunk_size = config.upload.chunk_size;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            tracing::error!("Invalid upload chunk size {}", chunk_size);
            return Err(UploadError::ChunkSize(chunk_size).into());
        }

        Ok(Self {
            transport,
            credential,
            upload_url: config.api.upload_url.clone(),
            media_type: config.media.media_type.clone(),
            media_category: config.media.media_category.clone(),
            chunk_size,
            max_wait_secs: config.upload.max_processing_wait_secs,
        })
    }

    /// Upload a file and wait until the server finished processing it
    pub async fn upload(&self, path: &Path) -> Result<UploadOutcome> {
        let source_err = |source: std::io::Error| UploadError::Source {
            path: path.to_path_buf(),
            source,
        };

        let total_bytes = tokio::fs::metadata(path).await.map_err(source_err)?.len();
        let auth = self.credential.acquire().await?;

        tracing::info!("Starting upload of {} ({} bytes)", path.display(), total_bytes);

        let mut session = UploadSession {
            uploader: self,
            auth,
            path: path.to_path_buf(),
            media_id: String::new(),
            total_bytes,
            segment_index: 0,
            polls: 0,
            waited_secs: 0,
        };

        session.init().await?;
        session.append_all().await?;
        let processing = session.finalize().await?;
        session.wait_for_processing(processing).await?;

        tracing::info!("Upload of media {} complete", session.media_id);

        Ok(UploadOutcome {
            media_id: session.media_id,
            total_bytes,
            segments: session.segment_index,
            polls: session.polls,
            waited: Duration::from_secs(session.waited_secs),
        })
    }
}

/// State of one upload in progress
struct UploadSession<'a> {
    uploader: &'a MediaUploader,
    auth: Authorization,
    path: PathBuf,
    media_id: String,
    total_bytes: u64,
    segment_index: u32,
    polls: u32,
    waited_secs: u64,
}

impl UploadSession<'_> {
    async fn send(&self, phase: UploadPhase, mut request: HttpRequest) -> Result<HttpResponse> {
        self.auth.authorize(&mut request);
        let response = self.uploader.transport.send(request).await?;

        if !response.is_success() {
            tracing::error!(
                "{} for media '{}' failed: {} {}",
                phase,
                self.media_id,
                response.status,
                response.body
            );
            return Err(UploadError::Rejected {
                phase,
                status: response.status,
                body: response.body,
            }
            .into());
        }
        Ok(response)
    }

    fn parse(&self, phase: UploadPhase, response: &HttpResponse) -> Result<UploadResponse> {
        if response.body.trim().is_empty() {
            return Ok(UploadResponse {
                media_id_string: None,
                media_id: None,
                processing_info: None,
            });
        }
        response.json().map_err(|e| {
            UploadError::MalformedResponse {
                phase,
                reason: format!("{} in {}", e, response.body),
            }
            .into()
        })
    }

    async fn init(&mut self) -> Result<()> {
        let uploader = self.uploader;
        let request = HttpRequest::post(&uploader.upload_url).form(vec![
            ("command".to_string(), "INIT".to_string()),
            ("media_type".to_string(), uploader.media_type.clone()),
            ("total_bytes".to_string(), self.total_bytes.to_string()),
            ("media_category".to_string(), uploader.media_category.clone()),
        ]);

        let response = self.send(UploadPhase::Init, request).await?;
        let parsed = self.parse(UploadPhase::Init, &response)?;
        self.media_id = parsed.media_id().ok_or_else(|| UploadError::MalformedResponse {
            phase: UploadPhase::Init,
            reason: format!("no media_id in {}", response.body),
        })?;

        tracing::info!("Media ID: {}", self.media_id);
        Ok(())
    }

    async fn append_all(&mut self) -> Result<()> {
        let source_err = |source: std::io::Error| UploadError::Source {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&self.path).await.map_err(source_err)?;

        let chunk_size = self.uploader.chunk_size as u64;
        let mut sent: u64 = 0;

        while sent < self.total_bytes {
            let len = chunk_size.min(self.total_bytes - sent) as usize;
            let mut chunk = vec![0u8; len];
            let read = read_full(&mut file, &mut chunk).await.map_err(|source| UploadError::Source {
                path: self.path.clone(),
                source,
            })?;
            if read < len {
                tracing::error!("{} shrank during upload", self.path.display());
                return Err(UploadError::ShortRead {
                    path: self.path.clone(),
                    sent: sent + read as u64,
                    total: self.total_bytes,
                }
                .into());
            }

            let request = HttpRequest::post(&self.uploader.upload_url).multipart(
                vec![
                    ("command".to_string(), "APPEND".to_string()),
                    ("media_id".to_string(), self.media_id.clone()),
                    ("segment_index".to_string(), self.segment_index.to_string()),
                ],
                "media",
                chunk,
            );
            self.send(UploadPhase::Append, request).await?;

            self.segment_index += 1;
            sent += len as u64;
            tracing::info!(
                "Uploaded segment {} ({:.1}%)",
                self.segment_index - 1,
                sent as f64 / self.total_bytes as f64 * 100.0
            );
        }

        tracing::info!("Upload chunks complete ({} segments)", self.segment_index);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Option<ProcessingInfo>> {
        let request = HttpRequest::post(&self.uploader.upload_url).form(vec![
            ("command".to_string(), "FINALIZE".to_string()),
            ("media_id".to_string(), self.media_id.clone()),
        ]);

        let response = self.send(UploadPhase::Finalize, request).await?;
        Ok(self.parse(UploadPhase::Finalize, &response)?.processing_info)
    }

    async fn status(&mut self) -> Result<Option<ProcessingInfo>> {
        let request = HttpRequest::get(&self.uploader.upload_url)
            .query("command", "STATUS")
            .query("media_id", self.media_id.clone());

        self.polls += 1;
        let response = self.send(UploadPhase::Status, request).await?;
        Ok(self.parse(UploadPhase::Status, &response)?.processing_info)
    }

    /// Poll until processing reaches a terminal state
    ///
    /// A response without `processing_info` counts as succeeded.
    async fn wait_for_processing(&mut self, mut info: Option<ProcessingInfo>) -> Result<()> {
        let mut warned_unbounded = false;

        while let Some(current) = info {
            tracing::info!("Media processing state: {}", current.state);

            match current.state {
                ProcessingState::Succeeded => return Ok(()),
                ProcessingState::Failed => {
                    let reason = current
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no error details".to_string());
                    tracing::error!("Processing of media {} failed: {}", self.media_id, reason);
                    return Err(UploadError::ProcessingFailed {
                        media_id: self.media_id.clone(),
                        reason,
                    }
                    .into());
                }
                ProcessingState::Pending | ProcessingState::InProgress => {
                    let delay = current.check_after_secs.unwrap_or(DEFAULT_CHECK_AFTER_SECS);

                    match self.uploader.max_wait_secs {
                        Some(limit) if self.waited_secs + delay > limit => {
                            tracing::error!(
                                "Processing of media {} exceeded {}s wait limit",
                                self.media_id,
                                limit
                            );
                            return Err(UploadError::ProcessingTimeout {
                                media_id: self.media_id.clone(),
                                waited_secs: self.waited_secs,
                                limit_secs: limit,
                            }
                            .into());
                        }
                        Some(_) => {}
                        None if !warned_unbounded => {
                            tracing::warn!(
                                "No processing wait limit configured; polling until media {} leaves {}",
                                self.media_id,
                                current.state
                            );
                            warned_unbounded = true;
                        }
                        None => {}
                    }

                    tracing::info!("Checking after {} seconds", delay);
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    self.waited_secs += delay;

                    info = self.status().await?;
                }
            }
        }

        Ok(())
    }
}

/// Fill `buf` unless the reader hits end of file first
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
