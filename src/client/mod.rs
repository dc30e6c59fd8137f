//! Transport-only access to a cluster's index administration API.
//!
//! Implementations translate HTTP into [`ClientError`] and nothing more: no
//! retries, no decisions. Retry lives in [`crate::retry`], decisions in
//! [`crate::reconciler`].

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{IndexBody, LiveIndexState};

/// Errors from a single request to the cluster.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("index not found: {0}")]
    NotFound(String),

    #[error("index already exists: {0}")]
    AlreadyExists(String),

    #[error("mapping conflict: {0}")]
    MappingConflict(String),

    #[error("rejected with {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("cluster unavailable ({status}): {reason}")]
    Unavailable { status: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transient failures are worth retrying: connection problems (including
    /// the cold-start gap before a private endpoint becomes reachable),
    /// timeouts, throttling and 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::Unavailable { .. }
        )
    }
}

/// Index administration for one cluster endpoint.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Normalized endpoint this client talks to.
    fn endpoint(&self) -> &str;

    /// `GET /{index}`. A missing index is `Ok` with `exists == false`.
    async fn get_index(&self, name: &str) -> Result<LiveIndexState, ClientError>;

    async fn exists(&self, name: &str) -> Result<bool, ClientError> {
        Ok(self.get_index(name).await?.exists)
    }

    /// `PUT /{index}`. Fails with `AlreadyExists` when the index is present.
    async fn create(&self, name: &str, body: &IndexBody) -> Result<(), ClientError>;

    /// `PUT /{index}/_mapping` with an additive delta.
    async fn put_mapping(&self, name: &str, delta: &Value) -> Result<(), ClientError>;

    /// `DELETE /{index}`. Fails with `NotFound` when the index is absent.
    async fn delete(&self, name: &str) -> Result<(), ClientError>;
}

/// Builds a [`SearchClient`] for an endpoint named in a lifecycle event.
pub trait Connector: Send + Sync {
    type Client: SearchClient;

    fn connect(&self, endpoint: &str) -> Result<Self::Client, ClientError>;
}
