use crate::cleanup::TempArtifact;
use crate::config::RelayConfig;
use crate::upload_receiver::{timestamped_file_name, BufferedData, BufferedFile};
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Prefix for files written only to hand a memory buffer to the provider
pub const TEMP_PREFIX: &str = "temp";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Gemini API upload timeout")]
    Timeout,

    #[error("GOOGLE_API_KEY is not configured")]
    MissingApiKey,

    #[error("{message}")]
    Provider { status: u16, message: String },

    #[error("Unexpected response from Gemini API: {0}")]
    Protocol(String),

    #[error("Gemini API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to stage file for upload: {0}")]
    Io(#[from] io::Error),

    #[error("Upload task failed: {0}")]
    Task(String),
}

/// Document-ingestion API that accepts files by path
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestionClient: Send + Sync {
    /// Upload the file and return the provider's metadata object
    async fn upload(
        &self,
        file_path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<Value, RelayError>;
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: Value,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Client for the Gemini Files API resumable upload protocol
pub struct GeminiFilesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiFilesClient {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder().build()?;

        if config.api_key.is_none() {
            warn!("GOOGLE_API_KEY is not set, uploads will be rejected");
        }

        info!(base_url = %config.base_url, "Gemini Files client initialized");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl IngestionClient for GeminiFilesClient {
    #[instrument(skip(self, file_path), fields(file_path = %file_path.display()))]
    async fn upload(
        &self,
        file_path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<Value, RelayError> {
        let api_key = self.api_key.as_deref().ok_or(RelayError::MissingApiKey)?;
        let data = tokio::fs::read(file_path).await?;
        let size = data.len().to_string();

        // Open the resumable session
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", api_key)])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.as_str())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check_status(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RelayError::Protocol("missing x-goog-upload-url header".to_string()))?
            .to_string();

        debug!(size_bytes = data.len(), "Resumable upload session opened");

        // Send the bytes and finalize in one request
        let response = self
            .http
            .post(upload_url)
            .header(CONTENT_LENGTH, size.as_str())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: UploadFileResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Protocol(e.to_string()))?;

        Ok(body.file)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ProviderErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
    };

    Err(RelayError::Provider {
        status: status.as_u16(),
        message,
    })
}

/// Forwards buffered uploads to the ingestion API under a client-side time bound.
///
/// The provider call runs as a detached task raced against a timer. When the
/// timer wins the call is abandoned rather than cancelled: the Files API has no
/// cancel primitive, and the bound exists only to cap how long the client waits.
pub struct Relay {
    client: Arc<dyn IngestionClient>,
    uploads_dir: PathBuf,
    timeout: Duration,
}

impl Relay {
    pub fn new(client: Arc<dyn IngestionClient>, uploads_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            client,
            uploads_dir: uploads_dir.into(),
            timeout,
        }
    }

    /// Relay a buffered upload and remove its disk artifact on every outcome
    #[instrument(skip(self, file), fields(original_name = %file.original_name, size_bytes = file.size_bytes))]
    pub async fn forward(&self, file: BufferedFile) -> Result<Value, RelayError> {
        let BufferedFile {
            original_name,
            mime_type,
            data,
            ..
        } = file;

        let artifact = match data {
            BufferedData::Disk(artifact) => artifact,
            BufferedData::Memory(bytes) => self.materialize(&bytes, &original_name).await?,
        };

        let result = self
            .relay(artifact.path(), &mime_type, &original_name)
            .await;

        artifact.cleanup().await;

        result
    }

    /// Write a memory buffer to a distinctly named temp file
    async fn materialize(&self, bytes: &[u8], original_name: &str) -> Result<TempArtifact, RelayError> {
        let artifact = TempArtifact::new(
            self.uploads_dir
                .join(timestamped_file_name(Some(TEMP_PREFIX), original_name)),
        );
        tokio::fs::write(artifact.path(), bytes).await?;

        debug!(path = %artifact.path().display(), "Materialized memory buffer");

        Ok(artifact)
    }

    /// Upload a disk-resident file, giving up after the configured timeout
    pub async fn relay(
        &self,
        file_path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<Value, RelayError> {
        let client = Arc::clone(&self.client);
        let file_path = file_path.to_path_buf();
        let mime_type = mime_type.to_string();
        let display_name = display_name.to_string();

        let started = Instant::now();
        let call = tokio::spawn(async move {
            client.upload(&file_path, &mime_type, &display_name).await
        });

        let result = tokio::select! {
            joined = call => match joined {
                Ok(result) => result,
                Err(e) => Err(RelayError::Task(e.to_string())),
            },
            _ = tokio::time::sleep(self.timeout) => {
                warn!(timeout_secs = self.timeout.as_secs_f64(), "Relay call timed out, abandoning it");
                metrics::counter!("gateway.relay.timeouts").increment(1);
                Err(RelayError::Timeout)
            }
        };

        metrics::histogram!("gateway.relay.duration_seconds").record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("gateway.relay.failed").increment(1);
            warn!(error = %e, "Relay call failed");
        }

        result
    }
}
