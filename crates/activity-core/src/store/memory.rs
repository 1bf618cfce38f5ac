//! In-memory [`ActivityStore`] implementation for testing.
//!
//! All tables live in one `Vec`-backed state behind a `std::sync::Mutex`.
//! IDs are assigned from per-table counters; the projection counter
//! restarts at 1 on every rebuild, like an SQLite rowid table emptied with
//! `DELETE`. Repository owner and name compare ASCII case-insensitively,
//! matching the `NOCASE` columns of the SQLite schema.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bounds::Bounds;
use crate::models::{Author, CommitRecord, NewCommit, Repository, SortedCommit, TableCounts};

use super::{ActivityStore, DuplicateRowError};

#[derive(Default)]
struct State {
    repos: Vec<Repository>,
    authors: Vec<Author>,
    commits: Vec<CommitRecord>,
    sorted: Vec<SortedCommit>,
    next_repo_id: i64,
    next_author_id: i64,
    next_commit_id: i64,
}

impl State {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn find_repo(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        find_unique(
            self.repos.iter().filter(|r| {
                r.owner.eq_ignore_ascii_case(owner) && r.repo.eq_ignore_ascii_case(repo)
            }),
            "repos",
            format!("{}/{}", owner, repo),
        )
    }

    fn push_repo(&mut self, owner: &str, repo: &str) -> Repository {
        let id = Self::next_id(&mut self.next_repo_id);
        let row = Repository {
            id,
            owner: owner.to_string(),
            repo: repo.to_string(),
            imported_through: None,
            first_commit: None,
            last_commit: None,
            notes: None,
        };
        self.repos.push(row.clone());
        row
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Insert a repository row with duplicate identity, bypassing the
    /// uniqueness check. Lets tests exercise the consistency-error path.
    pub fn insert_duplicate_repo(&self, owner: &str, repo: &str) -> Result<Repository> {
        Ok(self.state()?.push_repo(owner, repo))
    }
}

fn find_unique<'a, T>(
    rows: impl Iterator<Item = &'a T>,
    table: &'static str,
    key: String,
) -> Result<Option<T>>
where
    T: Clone + 'a,
{
    let matches: Vec<&T> = rows.collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0].clone())),
        count => Err(DuplicateRowError { table, key, count }.into()),
    }
}

fn sort_ascending(commits: &mut [CommitRecord]) {
    commits.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl ActivityStore for InMemoryStore {
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        self.state()?.find_repo(owner, repo)
    }

    async fn create_repo(&self, owner: &str, repo: &str) -> Result<Repository> {
        let mut state = self.state()?;
        if let Some(existing) = state.find_repo(owner, repo)? {
            return Ok(existing);
        }
        Ok(state.push_repo(owner, repo))
    }

    async fn list_repos(&self) -> Result<Vec<Repository>> {
        Ok(self.state()?.repos.clone())
    }

    async fn update_repo_bounds(&self, id: i64, candidate: Bounds) -> Result<()> {
        let mut state = self.state()?;
        if let Some(row) = state.repos.iter_mut().find(|r| r.id == id) {
            let widened = row.bounds().widen(&candidate);
            row.first_commit = widened.first;
            row.last_commit = widened.last;
        }
        Ok(())
    }

    async fn advance_watermark(&self, id: i64, watermark: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        match state.repos.iter_mut().find(|r| r.id == id) {
            Some(row) if row.imported_through.map_or(true, |cur| cur <= watermark) => {
                row.imported_through = Some(watermark);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_author(&self, username: &str) -> Result<Option<Author>> {
        let state = self.state()?;
        find_unique(
            state.authors.iter().filter(|a| a.username == username),
            "users",
            username.to_string(),
        )
    }

    async fn upsert_author(&self, username: &str, ts: DateTime<Utc>) -> Result<Author> {
        let mut state = self.state()?;
        if let Some(row) = state.authors.iter_mut().find(|a| a.username == username) {
            let widened = row.bounds().widen(&Bounds::point(ts));
            row.first_commit = widened.first;
            row.last_commit = widened.last;
            return Ok(row.clone());
        }
        let id = State::next_id(&mut state.next_author_id);
        let row = Author {
            id,
            username: username.to_string(),
            first_commit: Some(ts),
            last_commit: Some(ts),
            notes: None,
        };
        state.authors.push(row.clone());
        Ok(row)
    }

    async fn update_author_bounds(&self, id: i64, candidate: Bounds) -> Result<()> {
        let mut state = self.state()?;
        if let Some(row) = state.authors.iter_mut().find(|a| a.id == id) {
            let widened = row.bounds().widen(&candidate);
            row.first_commit = widened.first;
            row.last_commit = widened.last;
        }
        Ok(())
    }

    async fn list_authors(&self) -> Result<Vec<Author>> {
        Ok(self.state()?.authors.clone())
    }

    async fn delete_author(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        if state.commits.iter().any(|c| c.user_id == id) {
            anyhow::bail!("author {} still has ledger rows", id);
        }
        state.authors.retain(|a| a.id != id);
        Ok(())
    }

    async fn append_commit(&self, commit: &NewCommit) -> Result<i64> {
        let mut state = self.state()?;
        let id = State::next_id(&mut state.next_commit_id);
        state.commits.push(CommitRecord {
            id,
            repo_id: commit.repo_id,
            user_id: commit.user_id,
            date: commit.date,
            sha: commit.sha.clone(),
            notes: None,
        });
        Ok(id)
    }

    async fn list_commits_ascending(&self) -> Result<Vec<CommitRecord>> {
        let state = self.state()?;
        let mut commits: Vec<CommitRecord> = state
            .commits
            .iter()
            .filter(|c| c.date.is_some())
            .cloned()
            .collect();
        sort_ascending(&mut commits);
        Ok(commits)
    }

    async fn list_commits_by_author(&self, user_id: i64) -> Result<Vec<CommitRecord>> {
        let state = self.state()?;
        Ok(state
            .commits
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_commit(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        if state.sorted.iter().any(|s| s.commit_id == id) {
            anyhow::bail!("commit {} is still referenced by sorted_commits", id);
        }
        state.commits.retain(|c| c.id != id);
        Ok(())
    }

    async fn repo_commit_bounds(&self, repo_id: i64) -> Result<Bounds> {
        let state = self.state()?;
        Ok(state
            .commits
            .iter()
            .filter(|c| c.repo_id == repo_id)
            .filter_map(|c| c.date)
            .collect())
    }

    async fn author_commit_bounds(&self, user_id: i64) -> Result<Bounds> {
        let state = self.state()?;
        Ok(state
            .commits
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter_map(|c| c.date)
            .collect())
    }

    async fn replace_sorted_commits(&self, commits: &[CommitRecord]) -> Result<usize> {
        let mut state = self.state()?;
        state.sorted = commits
            .iter()
            .filter_map(|c| c.date.map(|date| (c.id, date)))
            .enumerate()
            .map(|(i, (commit_id, date))| SortedCommit {
                id: i as i64 + 1,
                commit_id,
                date,
            })
            .collect();
        Ok(state.sorted.len())
    }

    async fn delete_sorted_commits_for(&self, commit_id: i64) -> Result<()> {
        self.state()?.sorted.retain(|s| s.commit_id != commit_id);
        Ok(())
    }

    async fn list_sorted_commits(&self) -> Result<Vec<SortedCommit>> {
        Ok(self.state()?.sorted.clone())
    }

    async fn counts(&self) -> Result<TableCounts> {
        let state = self.state()?;
        Ok(TableCounts {
            repos: state.repos.len() as i64,
            users: state.authors.len() as i64,
            commits: state.commits.len() as i64,
            sorted_commits: state.sorted.len() as i64,
        })
    }
}
