//! Long-running service: collector loop, sorter schedule, and health
//! endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Liveness probe, plain-text `ok` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The collector and the sorter run as separate tasks sharing one store.
//! Ctrl-C stops the HTTP server and signals both tasks to finish.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use activity_core::ActivityStore;

use crate::collector::{run_loop, Collector};
use crate::config::Config;
use crate::github::GithubClient;
use crate::remote::RemoteApi;
use crate::repo_list::build_repo_list;
use crate::sorter::run_schedule;
use crate::sqlite_store::SqliteStore;

/// Build the HTTP router.
pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
}

/// Starts the collector loop, the sorter schedule, and the HTTP server.
///
/// Repository list assembly happens once at startup; a failure to list a
/// configured organization aborts startup.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let client = GithubClient::new(&config.github)?;
    if !client.is_authenticated() {
        warn!(env = %config.github.token_env, "No GitHub token set, using unauthenticated access");
    }
    let remote: Arc<dyn RemoteApi> = Arc::new(client);

    let targets = build_repo_list(config, remote.as_ref()).await?;
    info!(repos = targets.len(), "Assembled repository list");

    let collector = Arc::new(Collector::from_config(config, store.clone(), remote)?);
    let (shutdown_tx, _) = broadcast::channel(1);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(run_loop(
        collector,
        targets,
        Duration::from_secs(config.collector.interval_minutes * 60),
        shutdown_tx.subscribe(),
    )));

    if config.sorter.interval_minutes > 0 {
        let sorter_store: Arc<dyn ActivityStore> = store.clone();
        handles.push(tokio::spawn(run_schedule(
            sorter_store,
            Duration::from_secs(config.sorter.interval_minutes * 60),
            shutdown_tx.subscribe(),
        )));
    } else {
        info!("Sorter schedule disabled");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "Health server listening");
    println!("Health server listening on http://{}", config.server.bind);

    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    store.close().await;
    Ok(())
}

// ============ GET /healthz ============

async fn handle_healthz() -> &'static str {
    "ok"
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
