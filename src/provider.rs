//! Lifecycle entry point: turns orchestrator events into reconciler calls and
//! reconciler outcomes into lifecycle responses.

use std::collections::BTreeMap;

use crate::client::Connector;
use crate::error::{ProvisionError, Result};
use crate::reconciler::IndexReconciler;
use crate::retry::Deadline;
use crate::types::{
    EventKind, IndexSpec, LifecycleRequest, LifecycleResponse, ReconcileStatus,
    ReconciliationResult, ResourceEvent,
};
use crate::validation::{
    normalize_endpoint, spec_from_properties, validate_index_name, validate_spec,
};

/// Physical id reported when a request failed before any identity could be
/// derived from it.
pub const UNPROVISIONED_ID: &str = "unprovisioned";

pub struct ResourceProvider<K: Connector> {
    reconciler: IndexReconciler<K>,
}

impl<K: Connector> ResourceProvider<K> {
    pub fn new(reconciler: IndexReconciler<K>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &IndexReconciler<K> {
        &self.reconciler
    }

    /// Reconcile one validated event.
    ///
    /// Retryable failures (`Transport`, `Timeout`) come back as `Err` so the
    /// caller can let the orchestrator redeliver; [`respond`](Self::respond)
    /// turns the rest into FAILED responses.
    pub async fn handle(
        &self,
        event: &ResourceEvent,
        deadline: Deadline,
    ) -> Result<ReconciliationResult> {
        validate_spec(&event.desired)?;
        if let Some(previous) = &event.previous {
            validate_spec(previous)?;
        }

        let physical_id = physical_id_for(event);

        if event.kind == EventKind::Delete {
            if let Some(incoming) = &event.physical_id {
                if *incoming != event.desired.physical_id() {
                    // The id was never produced for these properties, so there
                    // is no index behind it to remove.
                    tracing::warn!(
                        physical_id = %incoming,
                        expected = %event.desired.physical_id(),
                        index = %event.desired.name,
                        "delete for a physical id these properties never produced, skipping"
                    );
                    return Ok(result(physical_id, ReconcileStatus::NoOp, &event.desired));
                }
            }
        }

        let status = self
            .reconciler
            .reconcile(
                event.kind,
                &event.desired,
                event.previous.as_ref(),
                deadline,
            )
            .await?;

        tracing::info!(
            physical_id = %physical_id,
            index = %event.desired.name,
            endpoint = %event.desired.endpoint,
            status = ?status,
            "reconciled"
        );
        Ok(result(physical_id, status, &event.desired))
    }

    /// Full lifecycle round trip for one orchestrator request.
    ///
    /// Returns `Err` only for retryable failures; every other outcome is a
    /// SUCCESS or FAILED response.
    pub async fn respond(
        &self,
        request: LifecycleRequest,
        deadline: Deadline,
    ) -> Result<LifecycleResponse> {
        let event = match event_from_request(&request) {
            Ok(event) => event,
            Err(e) if request.request_type == EventKind::Delete => {
                // Properties that never validated never created anything.
                let physical_id = fallback_physical_id(&request);
                tracing::warn!(
                    physical_id = %physical_id,
                    error = %e,
                    "delete with invalid properties, nothing to remove"
                );
                return Ok(LifecycleResponse::success(ReconciliationResult {
                    physical_id,
                    status: ReconcileStatus::NoOp,
                    data: BTreeMap::new(),
                }));
            }
            Err(e) => return Ok(failed(fallback_physical_id(&request), &e)),
        };

        match self.handle(&event, deadline).await {
            Ok(result) => Ok(LifecycleResponse::success(result)),
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    physical_id = %physical_id_for(&event),
                    kind = e.kind(),
                    error = %e,
                    "retryable failure, leaving redelivery to the orchestrator"
                );
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    physical_id = %physical_id_for(&event),
                    kind = e.kind(),
                    error = %e,
                    "reconciliation failed"
                );
                Ok(failed(physical_id_for(&event), &e))
            }
        }
    }
}

/// Validate a wire request into a [`ResourceEvent`].
///
/// Old properties that no longer validate are dropped: they cannot describe
/// an index this provider created, so there is nothing to replace.
pub fn event_from_request(request: &LifecycleRequest) -> Result<ResourceEvent> {
    let desired = spec_from_properties(&request.resource_properties)?;
    let previous = match (&request.request_type, &request.old_resource_properties) {
        (EventKind::Update, Some(old)) => match spec_from_properties(old) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring old properties that do not validate");
                None
            }
        },
        _ => None,
    };
    Ok(ResourceEvent {
        kind: request.request_type,
        physical_id: request
            .physical_resource_id
            .clone()
            .filter(|id| !id.is_empty()),
        desired,
        previous,
    })
}

/// Create and replacement derive the id from the desired identity; Update
/// and Delete keep the id the orchestrator already holds.
///
/// An Update without valid old properties cannot vouch for its incoming id
/// (it may be a failure placeholder such as [`UNPROVISIONED_ID`]) while it
/// still creates or adopts the desired index, so it reports the derived id.
pub fn physical_id_for(event: &ResourceEvent) -> String {
    let derived = match &event.previous {
        Some(prev) => !prev.same_identity(&event.desired),
        None => true,
    };
    match (&event.kind, &event.physical_id) {
        (EventKind::Create, _) => event.desired.physical_id(),
        (EventKind::Update, _) if derived => event.desired.physical_id(),
        (_, Some(id)) => id.clone(),
        (_, None) => event.desired.physical_id(),
    }
}

/// Best id for a request that failed validation: the incoming one, else one
/// derived from whatever identity did validate.
fn fallback_physical_id(request: &LifecycleRequest) -> String {
    if let Some(id) = request.physical_resource_id.as_ref().filter(|id| !id.is_empty()) {
        return id.clone();
    }
    let props = &request.resource_properties;
    match (
        validate_index_name(&props.index_name),
        normalize_endpoint(&props.endpoint_address),
    ) {
        (Ok(()), Ok(endpoint)) => {
            IndexSpec::new(props.index_name.clone(), Default::default(), endpoint).physical_id()
        }
        _ => UNPROVISIONED_ID.to_string(),
    }
}

fn result(physical_id: String, status: ReconcileStatus, spec: &IndexSpec) -> ReconciliationResult {
    let mut data = BTreeMap::new();
    data.insert("endpoint".to_string(), spec.endpoint.clone());
    data.insert("index".to_string(), spec.name.clone());
    ReconciliationResult {
        physical_id,
        status,
        data,
    }
}

fn failed(physical_id: String, err: &ProvisionError) -> LifecycleResponse {
    LifecycleResponse::failed(physical_id, format!("{}: {}", err.kind(), err))
}
