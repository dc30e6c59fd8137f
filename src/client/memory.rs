use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{ClientError, Connector, SearchClient};
use crate::mapping::{diff_properties, merge_properties, properties_of};
use crate::types::{IndexBody, LiveIndexState};

#[derive(Debug, Clone)]
struct StoredIndex {
    mappings: Map<String, Value>,
    settings: Map<String, Value>,
}

/// In-process cluster with engine-like semantics: creating an existing index
/// fails, deleting a missing one is `NotFound`, and a mapping update that
/// changes a field type is rejected without touching the stored mapping.
///
/// Faults queued with [`MemoryCluster::fail_next`] are returned by the next
/// calls in order, which lets tests script cold-start connectivity gaps.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    endpoint: String,
    indexes: Arc<DashMap<String, StoredIndex>>,
    faults: Arc<Mutex<VecDeque<ClientError>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryCluster {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Queue an error for the next call. Queued errors are consumed one per call.
    pub fn fail_next(&self, err: ClientError) {
        self.lock_faults().push_back(err);
    }

    /// Requests seen so far, as `"METHOD path"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Current mapping of `name`, if the index exists.
    pub fn mapping(&self, name: &str) -> Option<Map<String, Value>> {
        self.indexes.get(name).map(|i| i.mappings.clone())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, VecDeque<ClientError>> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: String) -> Result<(), ClientError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
        match self.lock_faults().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SearchClient for MemoryCluster {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_index(&self, name: &str) -> Result<LiveIndexState, ClientError> {
        self.record(format!("GET /{name}"))?;
        Ok(match self.indexes.get(name) {
            Some(index) => LiveIndexState::present(index.mappings.clone(), index.settings.clone()),
            None => LiveIndexState::absent(),
        })
    }

    async fn create(&self, name: &str, body: &IndexBody) -> Result<(), ClientError> {
        self.record(format!("PUT /{name}"))?;
        match self.indexes.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ClientError::AlreadyExists(
                format!("index [{name}] already exists"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(StoredIndex {
                    mappings: body.mappings.clone(),
                    settings: body.settings.clone(),
                });
                Ok(())
            }
        }
    }

    async fn put_mapping(&self, name: &str, delta: &Value) -> Result<(), ClientError> {
        self.record(format!("PUT /{name}/_mapping"))?;
        let mut index = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound(format!("no such index [{name}]")))?;

        let delta_props = delta
            .as_object()
            .map(properties_of)
            .unwrap_or_default();
        let live_props = properties_of(&index.mappings);

        let diff = diff_properties(&delta_props, &live_props);
        if let Some(conflict) = diff.conflicts.first() {
            return Err(ClientError::MappingConflict(format!(
                "mapper [{}] cannot be changed from type [{}] to [{}]",
                conflict.path, conflict.live_type, conflict.desired_type
            )));
        }

        let mut merged = live_props;
        merge_properties(&mut merged, &diff.additions);
        index
            .mappings
            .insert("properties".to_string(), Value::Object(merged));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.record(format!("DELETE /{name}"))?;
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("no such index [{name}]")))
    }
}

/// Hands out one [`MemoryCluster`] per endpoint, created on first use.
#[derive(Debug, Clone, Default)]
pub struct MemoryClusters {
    clusters: Arc<DashMap<String, MemoryCluster>>,
}

impl MemoryClusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster(&self, endpoint: &str) -> MemoryCluster {
        self.clusters
            .entry(endpoint.to_string())
            .or_insert_with(|| MemoryCluster::new(endpoint))
            .clone()
    }
}

impl Connector for MemoryClusters {
    type Client = MemoryCluster;

    fn connect(&self, endpoint: &str) -> Result<MemoryCluster, ClientError> {
        Ok(self.cluster(endpoint))
    }
}
