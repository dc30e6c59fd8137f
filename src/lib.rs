//! Declarative provisioning for search-engine indexes.
//!
//! A lifecycle event (create / update / delete) describes the index an
//! orchestrator wants to exist on a cluster. [`ResourceProvider`] validates the
//! event, [`IndexReconciler`] compares it with the live cluster and applies the
//! smallest safe change through a [`RetryPolicy`] wrapped [`SearchClient`].
//! Every step is safe to repeat: redelivered events converge on the same state.

pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod logging;
pub mod mapping;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod types;
pub mod validation;

pub use client::http::{HttpConnector, HttpSearchClient};
pub use client::memory::{MemoryCluster, MemoryClusters};
pub use client::{ClientError, Connector, SearchClient};
pub use config::{ProvisionerConfig, RetrySettings};
pub use error::{ProvisionError, Result};
pub use lease::{LeaseGuard, LeaseRegistry};
pub use provider::ResourceProvider;
pub use reconciler::{determine_action, Action, IndexReconciler};
pub use retry::{Deadline, RetryError, RetryPolicy};
pub use types::{
    EventKind, IndexBody, IndexSpec, LifecycleRequest, LifecycleResponse, LifecycleStatus,
    LiveIndexState, ReconcileStatus, ReconciliationResult, ResourceEvent, ResourceProperties,
};
