//! Storage abstraction for Ecosystem Activity.
//!
//! The [`ActivityStore`] trait covers the four persisted components: the
//! repository state store, the author state store, the commit ledger, and
//! the sorted projection. Backends (SQLite, in-memory) are injected into
//! the collector and the maintenance commands, so none of them reach for a
//! process-wide handle.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bounds::Bounds;
use crate::models::{
    AcceptedCommit, Author, BatchOutcome, CommitRecord, NewCommit, Repository, SortedCommit,
    TableCounts,
};

/// Raised when a lookup by an identity that should be unique matches
/// several rows.
///
/// Stores return it wrapped in [`anyhow::Error`]; callers classify it with
/// `err.downcast_ref::<DuplicateRowError>()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{count} rows found in {table} for {key}, expected at most one; check the {table} table")]
pub struct DuplicateRowError {
    pub table: &'static str,
    pub key: String,
    pub count: usize,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Repositories | [`get_repo`](ActivityStore::get_repo), [`create_repo`](ActivityStore::create_repo), [`update_repo_bounds`](ActivityStore::update_repo_bounds), [`advance_watermark`](ActivityStore::advance_watermark) |
/// | Authors | [`get_author`](ActivityStore::get_author), [`upsert_author`](ActivityStore::upsert_author), [`update_author_bounds`](ActivityStore::update_author_bounds), [`delete_author`](ActivityStore::delete_author) |
/// | Ledger | [`append_commit`](ActivityStore::append_commit), [`list_commits_ascending`](ActivityStore::list_commits_ascending), [`list_commits_by_author`](ActivityStore::list_commits_by_author), [`delete_commit`](ActivityStore::delete_commit) |
/// | Projection | [`replace_sorted_commits`](ActivityStore::replace_sorted_commits), [`delete_sorted_commits_for`](ActivityStore::delete_sorted_commits_for), [`list_sorted_commits`](ActivityStore::list_sorted_commits) |
#[async_trait]
pub trait ActivityStore: Send + Sync {
    // ── Repositories ────────────────────────────────────────────────

    /// Exact lookup by `(owner, repo)`.
    ///
    /// Fails with [`DuplicateRowError`] if more than one row matches.
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<Repository>>;

    /// Insert a repository with unset watermark and bounds, or return the
    /// existing row when it is already present.
    async fn create_repo(&self, owner: &str, repo: &str) -> Result<Repository>;

    async fn list_repos(&self) -> Result<Vec<Repository>>;

    /// Widen the stored bounds with `candidate` (see [`Bounds::widen`]).
    async fn update_repo_bounds(&self, id: i64, candidate: Bounds) -> Result<()>;

    /// Move the watermark forward to `watermark`.
    ///
    /// Returns `false` and leaves the row untouched when the stored
    /// watermark is already later.
    async fn advance_watermark(&self, id: i64, watermark: DateTime<Utc>) -> Result<bool>;

    // ── Authors ─────────────────────────────────────────────────────

    /// Exact lookup by username.
    ///
    /// Fails with [`DuplicateRowError`] if more than one row matches.
    async fn get_author(&self, username: &str) -> Result<Option<Author>>;

    /// Create the author with `first = last = ts`, or widen the bounds of
    /// the existing row to include `ts`, in one atomic step.
    async fn upsert_author(&self, username: &str, ts: DateTime<Utc>) -> Result<Author>;

    /// Widen the stored bounds with `candidate`.
    async fn update_author_bounds(&self, id: i64, candidate: Bounds) -> Result<()>;

    async fn list_authors(&self) -> Result<Vec<Author>>;

    async fn delete_author(&self, id: i64) -> Result<()>;

    // ── Commit ledger ───────────────────────────────────────────────

    /// Unconditional insert; returns the new row ID.
    async fn append_commit(&self, commit: &NewCommit) -> Result<i64>;

    /// All commits with a non-null date, oldest first (ties by ID).
    async fn list_commits_ascending(&self) -> Result<Vec<CommitRecord>>;

    async fn list_commits_by_author(&self, user_id: i64) -> Result<Vec<CommitRecord>>;

    async fn delete_commit(&self, id: i64) -> Result<()>;

    /// Min/max commit date of the ledger rows for one repository.
    async fn repo_commit_bounds(&self, repo_id: i64) -> Result<Bounds>;

    /// Min/max commit date of the ledger rows for one author.
    async fn author_commit_bounds(&self, user_id: i64) -> Result<Bounds>;

    // ── Sorted projection ───────────────────────────────────────────

    /// Delete every projection entry, then insert one entry per commit in
    /// the order given. Commits without a date are skipped. Returns the
    /// number of entries written.
    async fn replace_sorted_commits(&self, commits: &[CommitRecord]) -> Result<usize>;

    /// Remove the projection entries pointing at one ledger row.
    async fn delete_sorted_commits_for(&self, commit_id: i64) -> Result<()>;

    /// Projection entries ordered by ID.
    async fn list_sorted_commits(&self) -> Result<Vec<SortedCommit>>;

    async fn counts(&self) -> Result<TableCounts>;

    // ── Reconciliation ──────────────────────────────────────────────

    /// Reconcile one fetched batch into the stores.
    ///
    /// For every commit: upsert the author, append to the ledger, and
    /// accumulate the batch bounds. Then widen the repository bounds (only
    /// when the batch is non-empty) and advance its watermark.
    ///
    /// The default implementation issues the individual operations one by
    /// one. Backends with transactions should override it so a failure
    /// leaves nothing behind and the next pass can refetch the same window
    /// without duplicating ledger rows.
    async fn apply_batch(
        &self,
        repo_id: i64,
        commits: &[AcceptedCommit],
        watermark: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for commit in commits {
            let author = self.upsert_author(&commit.author, commit.date).await?;
            self.append_commit(&NewCommit {
                repo_id,
                user_id: author.id,
                date: Some(commit.date),
                sha: commit.sha.clone(),
            })
            .await?;
            outcome.appended += 1;
            outcome.bounds.observe(commit.date);
        }
        if !outcome.bounds.is_empty() {
            self.update_repo_bounds(repo_id, outcome.bounds).await?;
        }
        outcome.watermark_advanced = self.advance_watermark(repo_id, watermark).await?;
        Ok(outcome)
    }
}
