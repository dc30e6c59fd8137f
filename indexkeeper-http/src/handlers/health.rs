use axum::{extract::State, Json};
use indexkeeper::Connector;
use std::sync::Arc;

use super::AppState;

pub async fn health<K: Connector>(State(state): State<Arc<AppState<K>>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_leases": state.leases.active(),
        "execution_deadline_ms": state.config.execution_deadline_ms,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
