//! Core data models shared by the stores, the collector, and the CLI.
//!
//! Rows map one-to-one onto the `repos`, `users`, `commits`, and
//! `sorted_commits` tables. Timestamps are UTC; a `None` bound means no
//! commit has been observed yet.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bounds::Bounds;

/// A tracked repository and its import state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub repo: String,
    /// Exclusive upper bound of the last successfully imported window.
    pub imported_through: Option<DateTime<Utc>>,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Repository {
    /// `owner/repo`, as used in log lines and CLI output.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.first_commit, self.last_commit)
    }
}

/// A commit author, keyed by their hosting-site login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: i64,
    pub username: String,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Author {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.first_commit, self.last_commit)
    }
}

/// One row of the commit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub id: i64,
    pub repo_id: i64,
    pub user_id: i64,
    pub date: Option<DateTime<Utc>>,
    pub sha: String,
    pub notes: Option<String>,
}

/// A commit about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub repo_id: i64,
    pub user_id: i64,
    pub date: Option<DateTime<Utc>>,
    pub sha: String,
}

/// One entry of the chronologically sorted projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortedCommit {
    pub id: i64,
    pub commit_id: i64,
    pub date: DateTime<Utc>,
}

/// A fetched commit that passed shape validation and is ready to be
/// reconciled into the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedCommit {
    pub sha: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

/// Result of applying one batch of accepted commits to a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ledger rows written.
    pub appended: usize,
    /// Min/max commit date of the batch (empty when no commits).
    pub bounds: Bounds,
    /// `false` when the stored watermark was already ahead of the new one.
    pub watermark_advanced: bool,
}

/// Row counts per table, for `activity stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub repos: i64,
    pub users: i64,
    pub commits: i64,
    pub sorted_commits: i64,
}
