//! Bot cleanup.
//!
//! Removes ledger rows attributed to automation accounts from a cutoff
//! date onwards. Earlier rows are kept. An author is deleted only when
//! every one of their rows was removed. The projection is rebuilt at the
//! end so it no longer references deleted rows.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use activity_core::models::Author;
use activity_core::{ActivityStore, BotClassifier};

use crate::config::{parse_day, Config};
use crate::sorter::rebuild_sorted_commits;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub authors_matched: usize,
    pub authors_deleted: usize,
    pub commits_deleted: usize,
    /// Rows dated before the cutoff (or undated), left in place.
    pub commits_kept: usize,
    /// Rows whose deletion failed.
    pub failures: usize,
    pub projection_entries: usize,
}

/// Every stored author whose username matches the classifier.
pub async fn find_bot_authors(
    store: &dyn ActivityStore,
    classifier: &BotClassifier,
) -> Result<Vec<Author>> {
    Ok(store
        .list_authors()
        .await?
        .into_iter()
        .filter(|a| classifier.is_bot(&a.username))
        .collect())
}

/// Delete the rows of `authors` dated at or after `cutoff`, then rebuild
/// the projection.
///
/// A failure deleting one row is logged and counted; the author is then
/// kept and the remaining rows are still processed.
pub async fn cleanup_bots(
    store: &dyn ActivityStore,
    authors: &[Author],
    cutoff: DateTime<Utc>,
) -> Result<CleanupReport> {
    let mut report = CleanupReport {
        authors_matched: authors.len(),
        ..Default::default()
    };

    for author in authors {
        let commits = match store.list_commits_by_author(author.id).await {
            Ok(c) => c,
            Err(e) => {
                error!(author = %author.username, error = %e, "Failed to list commits");
                report.failures += 1;
                continue;
            }
        };

        let mut deleted_all = true;
        for commit in commits {
            let Some(date) = commit.date.filter(|d| *d >= cutoff) else {
                info!(author = %author.username, sha = %commit.sha, date = ?commit.date, "Keeping commit before cutoff");
                report.commits_kept += 1;
                deleted_all = false;
                continue;
            };

            info!(author = %author.username, sha = %commit.sha, %date, "Deleting commit");
            let deleted = match store.delete_sorted_commits_for(commit.id).await {
                Ok(()) => store.delete_commit(commit.id).await,
                Err(e) => Err(e),
            };
            match deleted {
                Ok(()) => report.commits_deleted += 1,
                Err(e) => {
                    error!(author = %author.username, sha = %commit.sha, error = %e, "Failed to delete commit");
                    report.failures += 1;
                    deleted_all = false;
                }
            }
        }

        if deleted_all {
            info!(author = %author.username, "Deleting author, all commits were removed");
            match store.delete_author(author.id).await {
                Ok(()) => report.authors_deleted += 1,
                Err(e) => {
                    error!(author = %author.username, error = %e, "Failed to delete author");
                    report.failures += 1;
                }
            }
        }
    }

    report.projection_entries = rebuild_sorted_commits(store).await?;
    Ok(report)
}

/// `activity delete-bots`: list matching authors, wait `grace` so the
/// operator can abort, then clean up.
pub async fn run_delete_bots(config: &Config, start_date: &str, grace: Duration) -> Result<()> {
    let cutoff = parse_day(start_date)?;
    let store = SqliteStore::open(config).await?;
    let classifier = config.bots.classifier();

    let authors = find_bot_authors(&store, &classifier).await?;
    println!("Deleting user and commit activity for the following users:");
    for a in &authors {
        println!(" * {}", a.username);
    }
    if !grace.is_zero() {
        println!("Waiting {} seconds before continuing...", grace.as_secs());
        tokio::time::sleep(grace).await;
    }

    let report = cleanup_bots(&store, &authors, cutoff).await?;
    println!(
        "Deleted {} commits and {} users ({} commits kept, {} failures). Sorted {} commits.",
        report.commits_deleted,
        report.authors_deleted,
        report.commits_kept,
        report.failures,
        report.projection_entries
    );

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_core::models::AcceptedCommit;
    use activity_core::store::memory::InMemoryStore;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    fn accepted(sha: &str, author: &str, d: u32) -> AcceptedCommit {
        AcceptedCommit {
            sha: sha.into(),
            author: author.into(),
            date: day(d),
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let repo = store.create_repo("o", "r").await.unwrap();
        store
            .apply_batch(
                repo.id,
                &[
                    accepted("h1", "alice", 1),
                    accepted("b1", "ci-bot", 5),
                    accepted("b2", "ci-bot", 6),
                    accepted("d1", "dependabot[bot]", 2),
                    accepted("d2", "dependabot[bot]", 7),
                ],
                day(10),
            )
            .await
            .unwrap();
        rebuild_sorted_commits(&store).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_bot_authors() {
        let store = seeded().await;
        let mut names: Vec<String> = find_bot_authors(&store, &BotClassifier::default())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.username)
            .collect();
        names.sort();
        assert_eq!(names, vec!["ci-bot", "dependabot[bot]"]);
    }

    #[tokio::test]
    async fn test_cleanup_completeness() {
        let store = seeded().await;
        let bots = find_bot_authors(&store, &BotClassifier::default()).await.unwrap();
        let report = cleanup_bots(&store, &bots, day(3)).await.unwrap();

        assert_eq!(report.authors_matched, 2);
        assert_eq!(report.commits_deleted, 3);
        assert_eq!(report.commits_kept, 1);
        assert_eq!(report.failures, 0);

        // Every row after the cutoff: author gone.
        assert!(store.get_author("ci-bot").await.unwrap().is_none());
        // One row before the cutoff: author and that row stay.
        let dependabot = store.get_author("dependabot[bot]").await.unwrap().unwrap();
        let left = store.list_commits_by_author(dependabot.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].sha, "d1");

        assert_eq!(report.authors_deleted, 1);
        assert_eq!(report.projection_entries, 2);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.commits, 2);
        assert_eq!(counts.sorted_commits, 2);
        assert_eq!(counts.users, 2);
    }

    #[tokio::test]
    async fn test_cutoff_is_inclusive() {
        let store = seeded().await;
        let bots = find_bot_authors(&store, &BotClassifier::new(["-bot"])).await.unwrap();
        let report = cleanup_bots(&store, &bots, day(5)).await.unwrap();
        assert_eq!(report.commits_deleted, 2);
        assert_eq!(report.authors_deleted, 1);
    }

    #[tokio::test]
    async fn test_no_bots_still_rebuilds() {
        let store = seeded().await;
        let report = cleanup_bots(&store, &[], day(1)).await.unwrap();
        assert_eq!(report, CleanupReport {
            projection_entries: 5,
            ..Default::default()
        });
    }
}
