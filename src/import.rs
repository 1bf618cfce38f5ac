//! CSV batch import into the commit ledger.
//!
//! Imports history exported by an earlier reporting tool. The file has a
//! header row followed by rows of:
//!
//! ```text
//! Owner,Repository,Commit Author,Commit SHA,Commit Date
//! ```
//!
//! Repositories and authors must already exist; an unknown one aborts the
//! import. Imported rows widen the bounds of their repository and author
//! so the stored aggregates stay consistent with the ledger.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use activity_core::models::NewCommit;
use activity_core::{ActivityStore, BotClassifier, Bounds};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

const COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub bots_skipped: usize,
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC).
pub fn parse_commit_date(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("unrecognised commit date: '{}'", s))?;
    Ok(naive.and_utc())
}

/// Import every data row of `reader` into the ledger.
///
/// When `filter_bots` is set, rows whose author matches `classifier` are
/// skipped.
pub async fn import_commits<R: Read>(
    store: &dyn ActivityStore,
    reader: R,
    classifier: &BotClassifier,
    filter_bots: bool,
) -> Result<ImportReport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let records = csv_reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read CSV")?;

    let mut report = ImportReport::default();
    for (i, record) in records.iter().enumerate() {
        // Header is line 1.
        let line = i + 2;
        if record.len() < COLUMNS {
            bail!("line {}: expected {} columns, found {}", line, COLUMNS, record.len());
        }
        let (owner, repo, author, sha, date) =
            (&record[0], &record[1], &record[2], &record[3], &record[4]);

        if filter_bots && classifier.is_bot(author) {
            debug!(author, sha, "Skipping bot commit");
            report.bots_skipped += 1;
            continue;
        }

        let date = parse_commit_date(date).with_context(|| format!("line {}", line))?;
        let repo_row = store
            .get_repo(owner, repo)
            .await?
            .with_context(|| format!("line {}: unknown repository {}/{}", line, owner, repo))?;
        let author_row = store
            .get_author(author)
            .await?
            .with_context(|| format!("line {}: unknown commit author {}", line, author))?;

        store
            .append_commit(&NewCommit {
                repo_id: repo_row.id,
                user_id: author_row.id,
                date: Some(date),
                sha: sha.to_string(),
            })
            .await?;
        store
            .update_author_bounds(author_row.id, Bounds::point(date))
            .await?;
        store
            .update_repo_bounds(repo_row.id, Bounds::point(date))
            .await?;

        debug!(repo = %repo_row.full_name(), author, sha, %date, "Imported commit");
        report.imported += 1;
    }

    Ok(report)
}

/// `activity import-commits --file <csv>`.
pub async fn run_import(config: &Config, file: &Path) -> Result<()> {
    let f = std::fs::File::open(file)
        .with_context(|| format!("Failed to open CSV file: {}", file.display()))?;
    let store = SqliteStore::open(config).await?;
    info!(file = %file.display(), "Importing commits");

    let report = import_commits(
        &store,
        f,
        &config.bots.classifier(),
        config.bots.filter_on_ingest,
    )
    .await?;
    println!(
        "Imported {} commits ({} bot commits skipped).",
        report.imported, report.bots_skipped
    );

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_core::store::memory::InMemoryStore;
    use chrono::TimeZone;

    const CSV: &str = "Owner,Repository,Commit Author,Commit SHA,Commit Date
chia-network,example,alice,a1,2020-01-01 10:00:00
chia-network,example,dependabot[bot],b1,2020-01-03T00:00:00Z
chia-network,example,alice,a2,2020-01-02T00:00:00+02:00
";

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_repo("chia-network", "example").await.unwrap();
        let t = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        store.upsert_author("alice", t).await.unwrap();
        store.upsert_author("dependabot[bot]", t).await.unwrap();
        store
    }

    #[test]
    fn test_parse_commit_date() {
        let expected = Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_commit_date("2020-01-01 10:00:00").unwrap(), expected);
        assert_eq!(parse_commit_date("2020-01-01T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_commit_date("2020-01-01T12:00:00+02:00").unwrap(), expected);
        assert!(parse_commit_date("01/01/2020").is_err());
    }

    #[tokio::test]
    async fn test_import_keeps_bots_by_default() {
        let store = seeded().await;
        let report = import_commits(&store, CSV.as_bytes(), &BotClassifier::default(), false)
            .await
            .unwrap();
        assert_eq!(report, ImportReport { imported: 3, bots_skipped: 0 });

        let repo = store.get_repo("chia-network", "example").await.unwrap().unwrap();
        assert_eq!(
            repo.last_commit,
            Some(Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap())
        );
        let alice = store.get_author("alice").await.unwrap().unwrap();
        assert_eq!(
            alice.last_commit,
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 22, 0, 0).unwrap())
        );
        assert_eq!(
            alice.first_commit,
            Some(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_import_filters_bots_when_enabled() {
        let store = seeded().await;
        let report = import_commits(&store, CSV.as_bytes(), &BotClassifier::default(), true)
            .await
            .unwrap();
        assert_eq!(report, ImportReport { imported: 2, bots_skipped: 1 });
    }

    #[tokio::test]
    async fn test_unknown_author_is_fatal() {
        let store = seeded().await;
        let csv = "Owner,Repository,Commit Author,Commit SHA,Commit Date\nchia-network,example,mallory,m1,2020-01-01 00:00:00\n";
        let err = import_commits(&store, csv.as_bytes(), &BotClassifier::default(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown commit author mallory"));
        assert_eq!(store.counts().await.unwrap().commits, 0);
    }

    #[tokio::test]
    async fn test_unknown_repo_is_fatal() {
        let store = seeded().await;
        let csv = "Owner,Repository,Commit Author,Commit SHA,Commit Date\nx,y,alice,a,2020-01-01 00:00:00\n";
        let err = import_commits(&store, csv.as_bytes(), &BotClassifier::default(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown repository x/y"));
    }
}
