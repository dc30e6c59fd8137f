#![allow(dead_code)]

use indexkeeper::{
    EventKind, IndexReconciler, LifecycleRequest, ResourceProperties, ResourceProvider,
    RetryPolicy, RetrySettings,
};
use serde_json::Value;

/// Retry settings that keep virtual-time tests short and deterministic.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::from_settings(&RetrySettings {
        base_delay_ms: 100,
        multiplier: 2.0,
        max_delay_ms: 1_000,
        max_attempts: 4,
        max_elapsed_ms: 10_000,
        jitter: 0.0,
    })
}

pub fn provider_with<K: indexkeeper::Connector>(connector: K) -> ResourceProvider<K> {
    ResourceProvider::new(IndexReconciler::new(connector, fast_retry()))
}

pub fn props(name: &str, body: Value, endpoint: &str) -> ResourceProperties {
    ResourceProperties {
        index_name: name.to_string(),
        body,
        endpoint_address: endpoint.to_string(),
    }
}

pub fn request(
    kind: EventKind,
    physical_id: Option<&str>,
    new: ResourceProperties,
    old: Option<ResourceProperties>,
) -> LifecycleRequest {
    LifecycleRequest {
        request_type: kind,
        physical_resource_id: physical_id.map(str::to_string),
        resource_properties: new,
        old_resource_properties: old,
    }
}
