//! Backfill of missing first/last bounds from the commit ledger.
//!
//! Rows imported before bounds were tracked (or written by the CSV import
//! into an older database) may have a null `first_commit` or
//! `last_commit`. Backfill recomputes both from the ledger and widens the
//! stored pair, so existing values are never narrowed.

use anyhow::Result;
use tracing::{debug, info};

use activity_core::ActivityStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub repos_updated: usize,
    pub authors_updated: usize,
}

pub async fn backfill_bounds(store: &dyn ActivityStore) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();

    for repo in store.list_repos().await? {
        if repo.first_commit.is_some() && repo.last_commit.is_some() {
            continue;
        }
        let bounds = store.repo_commit_bounds(repo.id).await?;
        if bounds.is_empty() {
            debug!(repo = %repo.full_name(), "No ledger rows, nothing to backfill");
            continue;
        }
        store.update_repo_bounds(repo.id, bounds).await?;
        info!(repo = %repo.full_name(), "Backfilled repository bounds");
        report.repos_updated += 1;
    }

    for author in store.list_authors().await? {
        if author.first_commit.is_some() && author.last_commit.is_some() {
            continue;
        }
        let bounds = store.author_commit_bounds(author.id).await?;
        if bounds.is_empty() {
            continue;
        }
        store.update_author_bounds(author.id, bounds).await?;
        info!(author = %author.username, "Backfilled author bounds");
        report.authors_updated += 1;
    }

    Ok(report)
}

/// `activity backfill`.
pub async fn run_backfill(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let report = backfill_bounds(&store).await?;
    println!(
        "Backfilled bounds for {} repositories and {} users.",
        report.repos_updated, report.authors_updated
    );
    store.close().await;
    Ok(())
}
