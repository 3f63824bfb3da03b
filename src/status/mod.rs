//! Read-only HTTP status page: a JSON snapshot of the worker registry
//! plus static assets for the UI.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::registry::WorkerRegistry;

#[derive(Clone)]
pub struct StatusState {
    pub registry: Arc<WorkerRegistry>,
}

#[derive(Serialize)]
struct WorkerStatusResponse {
    address: String,
    cpu_usage: HashMap<String, f64>,
    memory_usage: f64,
    machine_name: String,
    last_seen: DateTime<Utc>,
    available: bool,
}

pub fn router(static_dir: PathBuf, state: StatusState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/workers", get(workers_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .with_state(state)
}

pub async fn run_status_server(addr: SocketAddr, static_dir: PathBuf, state: StatusState) {
    let app = router(static_dir, state);

    tracing::info!(addr = %addr, "starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "status server failed");
    }
}

/// Full registry snapshot keyed by worker address. Availability is
/// derived from the reachable working set, never stored on the record.
async fn workers_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    let workers: HashMap<String, WorkerStatusResponse> = snapshot
        .records
        .into_iter()
        .map(|(addr, record)| {
            let available = snapshot.reachable.contains(&addr);
            (
                addr,
                WorkerStatusResponse {
                    address: record.address,
                    cpu_usage: record.cpu_usage,
                    memory_usage: record.memory_usage,
                    machine_name: record.machine_name,
                    last_seen: record.last_seen,
                    available,
                },
            )
        })
        .collect();

    Json(workers)
}
