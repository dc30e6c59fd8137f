use axum::{extract::State, Json};
use indexkeeper::provider::{event_from_request, physical_id_for};
use indexkeeper::{Connector, LifecycleRequest, LifecycleResponse, ProvisionError};
use std::sync::Arc;

use super::AppState;

/// `POST /events`: reconcile one lifecycle event.
///
/// SUCCESS and FAILED lifecycle responses are both `200`; a retryable failure
/// is `503` with `Retry-After` so the sender redelivers.
pub async fn handle_event<K: Connector>(
    State(state): State<Arc<AppState<K>>>,
    Json(request): Json<LifecycleRequest>,
) -> Result<Json<LifecycleResponse>, ProvisionError> {
    let deadline = state.config.deadline();

    // Requests that do not validate are answered without touching the
    // cluster, so they need no lease.
    let lease_key = event_from_request(&request)
        .ok()
        .map(|event| physical_id_for(&event));
    let _lease = match &lease_key {
        Some(key) => Some(state.leases.acquire(key).await),
        None => None,
    };

    tracing::info!(
        event = %request.request_type,
        physical_id = lease_key.as_deref().unwrap_or("-"),
        "lifecycle event received"
    );
    let response = state.provider.respond(request, deadline).await?;
    Ok(Json(response))
}
