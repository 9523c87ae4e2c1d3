use crate::relay_client::RelayError;
use crate::storage_selector::StorageMode;
use crate::upload_receiver::ReceiveError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to upload clients
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request did not carry an acceptable file
    #[error(transparent)]
    Rejected(ReceiveError),

    /// The file was accepted but could not be buffered or relayed
    #[error("Failed to upload file: {details}")]
    Processing {
        storage_type: StorageMode,
        details: String,
    },
}

impl GatewayError {
    /// Classify a receiver failure; local I/O trouble is ours, not the client's
    pub fn from_receive(error: ReceiveError, storage_type: StorageMode) -> Self {
        match error {
            ReceiveError::Io(e) => GatewayError::Processing {
                storage_type,
                details: e.to_string(),
            },
            other => GatewayError::Rejected(other),
        }
    }

    pub fn from_relay(error: RelayError, storage_type: StorageMode) -> Self {
        GatewayError::Processing {
            storage_type,
            details: error.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Rejected(_) => StatusCode::BAD_REQUEST,
            GatewayError::Processing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body for client errors
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body for processing failures
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailureResponse {
    pub error: String,
    pub details: String,
    pub storage_type: StorageMode,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            GatewayError::Rejected(e) => {
                tracing::debug!(error = %e, "Upload rejected");
                metrics::counter!("gateway.uploads.rejected").increment(1);
                (status, Json(ErrorResponse { error: e.to_string() })).into_response()
            }
            GatewayError::Processing {
                storage_type,
                details,
            } => {
                tracing::error!(storage_type = %storage_type, details = %details, "Upload processing failed");
                (
                    status,
                    Json(UploadFailureResponse {
                        error: "Failed to upload file".to_string(),
                        details,
                        storage_type,
                    }),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_receive_errors_are_client_errors() {
        let err = GatewayError::from_receive(ReceiveError::NoFileUploaded, StorageMode::Memory);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = GatewayError::from_receive(ReceiveError::TooManyFiles { limit: 1 }, StorageMode::Disk);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_local_io_failure_is_a_processing_error() {
        let err = GatewayError::from_receive(
            ReceiveError::Io(io::Error::new(io::ErrorKind::Other, "disk full")),
            StorageMode::Disk,
        );
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            err,
            GatewayError::Processing { storage_type: StorageMode::Disk, ref details } if details == "disk full"
        ));
    }

    #[test]
    fn test_failure_body_uses_camel_case() {
        let body = serde_json::to_value(UploadFailureResponse {
            error: "Failed to upload file".to_string(),
            details: "Gemini API upload timeout".to_string(),
            storage_type: StorageMode::Memory,
        })
        .unwrap();

        assert_eq!(body["storageType"], "memory");
        assert_eq!(body["details"], "Gemini API upload timeout");
    }
}
