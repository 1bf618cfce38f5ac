//! Remote hosting API abstraction.
//!
//! The collector and the repository list assembly talk to the hosting site
//! through [`RemoteApi`], so tests can substitute a scripted fake and the
//! process never reaches for a global client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A repository as listed under an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    /// Browser URL (`https://github.com/owner/repo`).
    pub url: String,
    pub is_fork: bool,
}

/// A commit as returned by the commit listing. Every field is optional:
/// the hosting site omits the author login for commits whose email is not
/// linked to an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteCommit {
    pub sha: Option<String>,
    pub author_login: Option<String>,
    /// Author date; the timestamp stored in the ledger.
    pub authored_at: Option<DateTime<Utc>>,
    /// Committer date; the date the listing window filters on.
    pub committed_at: Option<DateTime<Utc>>,
}

/// Repository metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub full_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_fork: bool,
}

/// Errors from the remote API.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, resets at {reset:?}")]
    RateLimited { reset: Option<DateTime<Utc>> },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// The repository (or organization) does not exist or is not visible.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Consumed operations of the hosting API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Every repository of `org`, following pagination until exhausted.
    /// `visibility` is passed through as the listing's type filter.
    async fn list_org_repositories(
        &self,
        org: &str,
        visibility: Option<&str>,
    ) -> Result<Vec<RemoteRepo>, RemoteError>;

    /// Every commit of `owner/repo` authored in `[since, until)`, following
    /// pagination until exhausted.
    async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RemoteCommit>, RemoteError>;

    async fn get_repository(&self, owner: &str, repo: &str) -> Result<RepoInfo, RemoteError>;
}
