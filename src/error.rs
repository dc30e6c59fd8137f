use http::StatusCode;
use thiserror::Error;

use crate::client::ClientError;
use crate::retry::RetryError;

#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    #[error("Invalid resource properties: {0}")]
    Validation(String),

    #[error("Mapping conflict on index '{index}': {detail}. The live index was left unchanged; use a new indexName and reindex to change field types")]
    MappingConflict { index: String, detail: String },

    #[error("Cluster rejected {operation} ({status}): {reason}")]
    Rejected {
        operation: String,
        status: u16,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out during {operation} after {attempts} attempt(s) in {elapsed_ms} ms: {last_error}")]
    Timeout {
        operation: String,
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<serde_json::Error> for ProvisionError {
    fn from(e: serde_json::Error) -> Self {
        ProvisionError::Json(e.to_string())
    }
}

impl ProvisionError {
    /// Attach operation context to a retry outcome. Idempotency-tolerated
    /// failures (NotFound, AlreadyExists) must be matched by the caller
    /// before reaching this conversion.
    pub fn from_retry(operation: &str, index: &str, err: RetryError) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            } => ProvisionError::Timeout {
                operation: operation.to_string(),
                attempts,
                elapsed_ms: elapsed.as_millis() as u64,
                last_error: last.to_string(),
            },
            RetryError::Failed(e) => Self::from_client(operation, index, e),
        }
    }

    pub fn from_client(operation: &str, index: &str, err: ClientError) -> Self {
        match err {
            ClientError::MappingConflict(detail) => ProvisionError::MappingConflict {
                index: index.to_string(),
                detail,
            },
            ClientError::NotFound(reason) => ProvisionError::Rejected {
                operation: operation.to_string(),
                status: 404,
                reason,
            },
            ClientError::AlreadyExists(reason) => ProvisionError::Rejected {
                operation: operation.to_string(),
                status: 409,
                reason,
            },
            ClientError::Rejected { status, reason } => ProvisionError::Rejected {
                operation: operation.to_string(),
                status,
                reason,
            },
            ClientError::Unavailable { status, reason } => {
                ProvisionError::Transport(format!("{operation} returned {status}: {reason}"))
            }
            ClientError::Transport(msg) => ProvisionError::Transport(format!("{operation}: {msg}")),
            ClientError::Decode(msg) => ProvisionError::Json(format!("{operation}: {msg}")),
        }
    }

    /// Stable machine-readable kind, used in failure reasons and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Validation(_) => "validation_error",
            ProvisionError::MappingConflict { .. } => "mapping_conflict",
            ProvisionError::Rejected { .. } => "rejected",
            ProvisionError::Transport(_) => "transient_network_error",
            ProvisionError::Timeout { .. } => "timeout",
            ProvisionError::Config(_) => "config_error",
            ProvisionError::Json(_) => "json_error",
        }
    }

    /// Retryable failures are propagated so the orchestrator redelivers the
    /// event; everything else is reported as a failed lifecycle response.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::Transport(_) | ProvisionError::Timeout { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProvisionError::Validation(_) => StatusCode::BAD_REQUEST,
            ProvisionError::MappingConflict { .. } => StatusCode::CONFLICT,
            ProvisionError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProvisionError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProvisionError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProvisionError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProvisionError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }
}

// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for ProvisionError {
    fn into_response(self) -> Response {
        let suggestion = match &self {
            ProvisionError::Transport(_) | ProvisionError::Timeout { .. } => {
                Some("Redeliver the event; the cluster may still be attaching to the network".to_string())
            }
            ProvisionError::MappingConflict { .. } => {
                Some("Field types cannot change in place; provision a new index".to_string())
            }
            ProvisionError::Config(_) => {
                Some("Check INDEXKEEPER_* environment variables or the config file".to_string())
            }
            _ => None,
        };

        let error_response = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            suggestion,
        };

        let mut response = (self.status_code(), Json(error_response)).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert("Retry-After", http::HeaderValue::from_static("5"));
        }
        response
    }
}
