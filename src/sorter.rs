//! Sorted projection rebuilder.
//!
//! The `sorted_commits` table is a chronological replica of the commit
//! ledger. It is never updated incrementally: every rebuild deletes the
//! whole projection and re-inserts one entry per dated ledger row, oldest
//! first, so entry IDs follow commit time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info};

use activity_core::ActivityStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Replace the projection with the current ledger contents. Returns the
/// number of entries written.
pub async fn rebuild_sorted_commits(store: &dyn ActivityStore) -> Result<usize> {
    let commits = store.list_commits_ascending().await?;
    let written = store.replace_sorted_commits(&commits).await?;
    info!(entries = written, "Rebuilt sorted commits");
    Ok(written)
}

/// Rebuild every `interval` until `shutdown` fires. Failures are logged
/// and retried on the next tick.
pub async fn run_schedule(
    store: Arc<dyn ActivityStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(interval_secs = interval.as_secs(), "Sorter schedule started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = rebuild_sorted_commits(store.as_ref()).await {
                    error!(error = %e, "Sorted commits rebuild failed");
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down sorter");
                break;
            }
        }
    }
}

/// `activity sort`: on-demand rebuild.
pub async fn run_sort(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let written = rebuild_sorted_commits(&store).await?;
    println!("Sorted {} commits.", written);
    store.close().await;
    Ok(())
}
