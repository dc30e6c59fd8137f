use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Index creation body as sent to `PUT /{index}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexBody {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub mappings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub aliases: Map<String, Value>,
}

/// Desired state of one index.
///
/// `name` and `endpoint` form the identity of the resource: changing either
/// one is a replacement, never an in-place update. `endpoint` is expected in
/// normalized form (see [`crate::validation::normalize_endpoint`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub body: IndexBody,
    pub endpoint: String,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, body: IndexBody, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body,
            endpoint: endpoint.into(),
        }
    }

    /// True when both specs address the same index on the same cluster.
    pub fn same_identity(&self, other: &IndexSpec) -> bool {
        self.name == other.name && self.endpoint == other.endpoint
    }

    /// Stable physical resource id: `{index}-{16 hex chars}` of
    /// SHA-256(`endpoint` + "\n" + `name`). Repeated Create deliveries for the
    /// same logical resource always report the same id.
    pub fn physical_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.endpoint.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.name.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}-{}", self.name, &digest[..16])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Create => write!(f, "Create"),
            EventKind::Update => write!(f, "Update"),
            EventKind::Delete => write!(f, "Delete"),
        }
    }
}

/// Validated lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub physical_id: Option<String>,
    pub desired: IndexSpec,
    pub previous: Option<IndexSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileStatus {
    Created,
    Updated,
    NoOp,
    Replaced,
    Deleted,
}

/// Outcome of one reconciliation. The orchestrator persists this, keyed by
/// `physical_id`; nothing else survives an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub physical_id: String,
    pub status: ReconcileStatus,
    pub data: BTreeMap<String, String>,
}

/// What the cluster reports for an index at reconcile time. Always fetched
/// fresh; never carried between invocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveIndexState {
    pub exists: bool,
    pub mapping: Map<String, Value>,
    pub settings: Map<String, Value>,
}

impl LiveIndexState {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(mapping: Map<String, Value>, settings: Map<String, Value>) -> Self {
        Self {
            exists: true,
            mapping,
            settings,
        }
    }
}

// ── Wire format ──

/// Properties block of a lifecycle event. Missing fields deserialize to
/// empty values so that validation, not deserialization, reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ResourceProperties {
    pub index_name: String,
    pub body: Value,
    pub endpoint_address: String,
}

/// Lifecycle event as delivered by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRequest {
    pub request_type: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: ResourceProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<ResourceProperties>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Success,
    Failed,
}

/// Lifecycle response returned to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: LifecycleStatus,
    pub physical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LifecycleResponse {
    pub fn success(result: ReconciliationResult) -> Self {
        Self {
            status: LifecycleStatus::Success,
            physical_resource_id: result.physical_id,
            data: Some(result.data),
            reason: None,
        }
    }

    pub fn failed(physical_resource_id: String, reason: String) -> Self {
        Self {
            status: LifecycleStatus::Failed,
            physical_resource_id,
            data: None,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, endpoint: &str) -> IndexSpec {
        IndexSpec::new(name, IndexBody::default(), endpoint)
    }

    #[test]
    fn physical_id_is_deterministic() {
        let a = spec("products", "https://search.internal:9200");
        let b = spec("products", "https://search.internal:9200");
        assert_eq!(a.physical_id(), b.physical_id());
        assert!(a.physical_id().starts_with("products-"));
        assert_eq!(a.physical_id().len(), "products-".len() + 16);
    }

    #[test]
    fn physical_id_depends_on_endpoint_and_name() {
        let base = spec("products", "https://a.internal");
        assert_ne!(
            base.physical_id(),
            spec("products", "https://b.internal").physical_id()
        );
        assert_ne!(
            base.physical_id(),
            spec("orders", "https://a.internal").physical_id()
        );
    }

    #[test]
    fn physical_id_ignores_body() {
        let mut with_body = spec("products", "https://a.internal");
        with_body.body.settings.insert("number_of_shards".into(), json!(3));
        assert_eq!(
            with_body.physical_id(),
            spec("products", "https://a.internal").physical_id()
        );
    }

    #[test]
    fn same_identity_compares_name_and_endpoint() {
        let a = spec("products", "https://a.internal");
        assert!(a.same_identity(&spec("products", "https://a.internal")));
        assert!(!a.same_identity(&spec("products", "https://b.internal")));
        assert!(!a.same_identity(&spec("orders", "https://a.internal")));
    }

    #[test]
    fn lifecycle_request_parses_orchestrator_payload() {
        let raw = json!({
            "RequestType": "Update",
            "PhysicalResourceId": "index-0123456789abcdef",
            "ResourceProperties": {
                "ServiceToken": "arn:ignored",
                "indexName": "index",
                "body": {"mappings": {"properties": {"time": {"type": "date"}}}},
                "endpointAddress": "search.internal"
            },
            "OldResourceProperties": {
                "indexName": "index",
                "body": {},
                "endpointAddress": "search.internal"
            }
        });
        let req: LifecycleRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.request_type, EventKind::Update);
        assert_eq!(
            req.physical_resource_id.as_deref(),
            Some("index-0123456789abcdef")
        );
        assert_eq!(req.resource_properties.index_name, "index");
        assert_eq!(
            req.old_resource_properties.unwrap().endpoint_address,
            "search.internal"
        );
    }

    #[test]
    fn missing_properties_default_to_empty() {
        let req: LifecycleRequest =
            serde_json::from_value(json!({"RequestType": "Create"})).unwrap();
        assert_eq!(req.resource_properties.index_name, "");
        assert!(req.resource_properties.body.is_null());
    }

    #[test]
    fn success_response_serializes_pascal_case() {
        let mut data = BTreeMap::new();
        data.insert("endpoint".to_string(), "https://a.internal".to_string());
        data.insert("index".to_string(), "products".to_string());
        let resp = LifecycleResponse::success(ReconciliationResult {
            physical_id: "products-abc".into(),
            status: ReconcileStatus::Created,
            data,
        });
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["Status"], "SUCCESS");
        assert_eq!(value["PhysicalResourceId"], "products-abc");
        assert_eq!(value["Data"]["index"], "products");
        assert!(value.get("Reason").is_none());
    }

    #[test]
    fn failed_response_carries_reason_only() {
        let resp = LifecycleResponse::failed("x".into(), "validation_error: bad".into());
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["Status"], "FAILED");
        assert_eq!(value["Reason"], "validation_error: bad");
        assert!(value.get("Data").is_none());
    }
}
