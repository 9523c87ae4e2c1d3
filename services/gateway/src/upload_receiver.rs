use crate::cleanup::TempArtifact;
use crate::config::StorageConfig;
use crate::storage_selector::StorageMode;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Multipart field carrying the upload
pub const FILE_FIELD: &str = "file";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("File too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Too many files: limit is {limit} per request")]
    TooManyFiles { limit: usize },

    #[error("Unexpected file field '{field}': files must be sent as 'file'")]
    UnexpectedField { field: String },

    #[error("Malformed multipart body: {0}")]
    Malformed(String),

    #[error("Failed to buffer upload: {0}")]
    Io(#[from] io::Error),
}

/// An accepted upload, buffered according to the chosen [`StorageMode`]
#[derive(Debug)]
pub struct BufferedFile {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub data: BufferedData,
}

/// The single active representation of an upload's bytes
#[derive(Debug)]
pub enum BufferedData {
    Memory(Bytes),
    Disk(TempArtifact),
}

impl BufferedFile {
    pub fn storage_mode(&self) -> StorageMode {
        match self.data {
            BufferedData::Memory(_) => StorageMode::Memory,
            BufferedData::Disk(_) => StorageMode::Disk,
        }
    }
}

/// Accepts the single file part of an upload request and buffers it in
/// memory or in the uploads directory.
pub struct UploadReceiver {
    uploads_dir: PathBuf,
    max_file_size: u64,
    max_files: usize,
}

impl UploadReceiver {
    pub fn new(uploads_dir: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            max_file_size: config.max_file_size_bytes,
            max_files: config.max_files,
        }
    }

    /// Create the uploads directory if it does not exist yet
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        info!(path = %self.uploads_dir.display(), "Uploads directory ready");
        Ok(())
    }

    /// Consume the multipart body, buffering its file part per `mode`.
    ///
    /// Text fields are skipped. A file part under any name other than
    /// [`FILE_FIELD`] is rejected, as is a second file part. If reception
    /// fails after a disk buffer was started, the partial file is removed.
    #[instrument(skip(self, multipart, mode), fields(mode = %mode))]
    pub async fn receive(
        &self,
        mut multipart: Multipart,
        mode: StorageMode,
    ) -> Result<BufferedFile, ReceiveError> {
        let mut received: Option<BufferedFile> = None;
        let mut file_count = 0usize;

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| self.map_multipart_error(e))?
        {
            let original_name = match field.file_name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };

            let field_name = field.name().unwrap_or_default();
            if field_name != FILE_FIELD {
                return Err(ReceiveError::UnexpectedField {
                    field: field_name.to_string(),
                });
            }

            file_count += 1;
            if file_count > self.max_files {
                return Err(ReceiveError::TooManyFiles {
                    limit: self.max_files,
                });
            }

            let mime_type = field
                .content_type()
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string();

            let (size_bytes, data) = match mode {
                StorageMode::Memory => self.buffer_in_memory(&mut field).await?,
                StorageMode::Disk => self.buffer_on_disk(&mut field, &original_name).await?,
            };

            debug!(
                original_name = %original_name,
                mime_type = %mime_type,
                size_bytes = size_bytes,
                "File part buffered"
            );
            metrics::counter!("gateway.bytes.received").increment(size_bytes);

            received = Some(BufferedFile {
                original_name,
                mime_type,
                size_bytes,
                data,
            });
        }

        received.ok_or(ReceiveError::NoFileUploaded)
    }

    async fn buffer_in_memory(
        &self,
        field: &mut Field<'_>,
    ) -> Result<(u64, BufferedData), ReceiveError> {
        let mut buffer = BytesMut::new();

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| self.map_multipart_error(e))?
        {
            self.check_size(buffer.len() as u64 + chunk.len() as u64)?;
            buffer.extend_from_slice(&chunk);
        }

        Ok((buffer.len() as u64, BufferedData::Memory(buffer.freeze())))
    }

    async fn buffer_on_disk(
        &self,
        field: &mut Field<'_>,
        original_name: &str,
    ) -> Result<(u64, BufferedData), ReceiveError> {
        // Declared before the file handle so the partial file is removed after it closes
        let artifact = TempArtifact::new(
            self.uploads_dir
                .join(timestamped_file_name(None, original_name)),
        );
        let mut file = tokio::fs::File::create(artifact.path()).await?;
        let mut size_bytes = 0u64;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| self.map_multipart_error(e))?
        {
            size_bytes += chunk.len() as u64;
            self.check_size(size_bytes)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok((size_bytes, BufferedData::Disk(artifact)))
    }

    fn check_size(&self, size_bytes: u64) -> Result<(), ReceiveError> {
        if size_bytes > self.max_file_size {
            return Err(ReceiveError::PayloadTooLarge {
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    fn map_multipart_error(&self, error: MultipartError) -> ReceiveError {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ReceiveError::PayloadTooLarge {
                limit: self.max_file_size,
            }
        } else {
            ReceiveError::Malformed(error.body_text())
        }
    }
}

/// Build a collision-resistant file name: `[prefix-]<unix millis>-<sanitized name>`
pub(crate) fn timestamped_file_name(prefix: Option<&str>, original_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let name = sanitize_file_name(original_name);
    match prefix {
        Some(prefix) => format!("{prefix}-{millis}-{name}"),
        None => format!("{millis}-{name}"),
    }
}

/// Sanitize a client-supplied file name so it stays inside the uploads directory
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}
