use axum::{
    routing::{get, post},
    Router,
};
use indexkeeper::{
    Connector, HttpConnector, IndexReconciler, ProvisionerConfig, ResourceProvider, RetryPolicy,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{handle_event, health, AppState};

pub fn router<K: Connector + 'static>(state: Arc<AppState<K>>) -> Router {
    Router::new()
        .route("/health", get(health::<K>))
        .route("/events", post(handle_event::<K>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the event service until ctrl-c. Logging must already be initialised.
pub async fn serve(
    config: ProvisionerConfig,
    bind_addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let connector = HttpConnector::new(config.request_timeout())?;
    let reconciler = IndexReconciler::new(connector, RetryPolicy::from_settings(&config.retry));
    let state = Arc::new(AppState::new(ResourceProvider::new(reconciler), config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        "indexkeeper listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("indexkeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, draining in-flight events");
}
