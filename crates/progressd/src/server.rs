//! HTTP server for progressd

use crate::routes;
use crate::service::ProgressionService;
use crate::sync::SyncWorker;
use anyhow::Result;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<ProgressionService>,
    /// Present only when a remote store is configured
    pub sync: Option<Arc<SyncWorker>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<ProgressionService>) -> Self {
        Self {
            service,
            sync: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_sync(mut self, worker: Arc<SyncWorker>) -> Self {
        self.sync = Some(worker);
        self
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::session_routes())
        .merge(routes::award_routes())
        .merge(routes::ledger_routes())
        .merge(routes::challenge_routes())
        .merge(routes::achievement_routes())
        .merge(routes::sync_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("  Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
