//! SQLite-backed [`ActivityStore`] implementation.
//!
//! Each trait operation maps to one or a few statements against the
//! `repos`, `users`, `commits`, and `sorted_commits` tables. Timestamps are
//! stored as Unix seconds. Author upserts and bound updates are single
//! statements; batch reconciliation and projection rebuilds each run in one
//! transaction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use activity_core::models::{
    AcceptedCommit, Author, BatchOutcome, CommitRecord, NewCommit, Repository, SortedCommit,
    TableCounts,
};
use activity_core::{ActivityStore, Bounds, DuplicateRowError};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// SQLite implementation of the [`ActivityStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_ts)
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

fn repo_from_row(row: &SqliteRow) -> Repository {
    Repository {
        id: row.get("id"),
        owner: row.get("owner"),
        repo: row.get("repo"),
        imported_through: from_ts(row.get("imported_through")),
        first_commit: from_ts(row.get("first_commit")),
        last_commit: from_ts(row.get("last_commit")),
        notes: row.get("notes"),
    }
}

fn author_from_row(row: &SqliteRow) -> Author {
    Author {
        id: row.get("id"),
        username: row.get("username"),
        first_commit: from_ts(row.get("first_commit")),
        last_commit: from_ts(row.get("last_commit")),
        notes: row.get("notes"),
    }
}

fn commit_from_row(row: &SqliteRow) -> CommitRecord {
    CommitRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        user_id: row.get("user_id"),
        date: from_ts(row.get("date")),
        sha: row.get("sha"),
        notes: row.get("notes"),
    }
}

fn bounds_from_row(row: &SqliteRow) -> Bounds {
    Bounds::new(from_ts(row.get("first")), from_ts(row.get("last")))
}

// ── Statement helpers shared by the single-shot methods and the batch ──

async fn upsert_author_on(
    conn: &mut SqliteConnection,
    username: &str,
    ts: DateTime<Utc>,
) -> Result<Author> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (username, first_commit, last_commit)
        VALUES (?1, ?2, ?2)
        ON CONFLICT(username) DO UPDATE SET
            first_commit = CASE
                WHEN users.first_commit IS NULL OR excluded.first_commit < users.first_commit
                THEN excluded.first_commit ELSE users.first_commit END,
            last_commit = CASE
                WHEN users.last_commit IS NULL OR excluded.last_commit > users.last_commit
                THEN excluded.last_commit ELSE users.last_commit END
        RETURNING id, username, first_commit, last_commit, notes
        "#,
    )
    .bind(username)
    .bind(to_ts(ts))
    .fetch_one(&mut *conn)
    .await?;
    Ok(author_from_row(&row))
}

async fn append_commit_on(conn: &mut SqliteConnection, commit: &NewCommit) -> Result<i64> {
    let result = sqlx::query("INSERT INTO commits (repo_id, user_id, date, sha) VALUES (?, ?, ?, ?)")
        .bind(commit.repo_id)
        .bind(commit.user_id)
        .bind(opt_ts(commit.date))
        .bind(&commit.sha)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Widen-only update of a `first_commit`/`last_commit` pair on `table`.
async fn widen_bounds_on(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
    candidate: Bounds,
) -> Result<()> {
    let sql = format!(
        r#"
        UPDATE {table} SET
            first_commit = CASE
                WHEN ?1 IS NOT NULL AND (first_commit IS NULL OR ?1 < first_commit)
                THEN ?1 ELSE first_commit END,
            last_commit = CASE
                WHEN ?2 IS NOT NULL AND (last_commit IS NULL OR ?2 > last_commit)
                THEN ?2 ELSE last_commit END
        WHERE id = ?3
        "#
    );
    sqlx::query(&sql)
        .bind(opt_ts(candidate.first))
        .bind(opt_ts(candidate.last))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn advance_watermark_on(
    conn: &mut SqliteConnection,
    id: i64,
    watermark: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE repos SET imported_through = ?1
        WHERE id = ?2 AND (imported_through IS NULL OR imported_through <= ?1)
        "#,
    )
    .bind(to_ts(watermark))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl ActivityStore for SqliteStore {
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, repo, imported_through, first_commit, last_commit, notes
            FROM repos WHERE owner = ? AND repo = ?
            "#,
        )
        .bind(owner)
        .bind(repo)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(DuplicateRowError {
                table: "repos",
                key: format!("{}/{}", owner, repo),
                count: rows.len(),
            }
            .into());
        }
        Ok(rows.first().map(repo_from_row))
    }

    async fn create_repo(&self, owner: &str, repo: &str) -> Result<Repository> {
        sqlx::query("INSERT INTO repos (owner, repo) VALUES (?, ?) ON CONFLICT(owner, repo) DO NOTHING")
            .bind(owner)
            .bind(repo)
            .execute(&self.pool)
            .await?;
        self.get_repo(owner, repo)
            .await?
            .ok_or_else(|| anyhow::anyhow!("repository {}/{} missing after insert", owner, repo))
    }

    async fn list_repos(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, repo, imported_through, first_commit, last_commit, notes
            FROM repos ORDER BY owner, repo
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(repo_from_row).collect())
    }

    async fn update_repo_bounds(&self, id: i64, candidate: Bounds) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        widen_bounds_on(&mut conn, "repos", id, candidate).await
    }

    async fn advance_watermark(&self, id: i64, watermark: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        advance_watermark_on(&mut conn, id, watermark).await
    }

    async fn get_author(&self, username: &str) -> Result<Option<Author>> {
        let rows = sqlx::query(
            "SELECT id, username, first_commit, last_commit, notes FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(DuplicateRowError {
                table: "users",
                key: username.to_string(),
                count: rows.len(),
            }
            .into());
        }
        Ok(rows.first().map(author_from_row))
    }

    async fn upsert_author(&self, username: &str, ts: DateTime<Utc>) -> Result<Author> {
        let mut conn = self.pool.acquire().await?;
        upsert_author_on(&mut conn, username, ts).await
    }

    async fn update_author_bounds(&self, id: i64, candidate: Bounds) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        widen_bounds_on(&mut conn, "users", id, candidate).await
    }

    async fn list_authors(&self) -> Result<Vec<Author>> {
        let rows = sqlx::query(
            "SELECT id, username, first_commit, last_commit, notes FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(author_from_row).collect())
    }

    async fn delete_author(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_commit(&self, commit: &NewCommit) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        append_commit_on(&mut conn, commit).await
    }

    async fn list_commits_ascending(&self) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, user_id, date, sha, notes
            FROM commits
            WHERE date IS NOT NULL
            ORDER BY date ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(commit_from_row).collect())
    }

    async fn list_commits_by_author(&self, user_id: i64) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, user_id, date, sha, notes
            FROM commits WHERE user_id = ? ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(commit_from_row).collect())
    }

    async fn delete_commit(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM commits WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn repo_commit_bounds(&self, repo_id: i64) -> Result<Bounds> {
        let row = sqlx::query(
            "SELECT MIN(date) AS first, MAX(date) AS last FROM commits WHERE repo_id = ?",
        )
        .bind(repo_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(bounds_from_row(&row))
    }

    async fn author_commit_bounds(&self, user_id: i64) -> Result<Bounds> {
        let row = sqlx::query(
            "SELECT MIN(date) AS first, MAX(date) AS last FROM commits WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(bounds_from_row(&row))
    }

    async fn replace_sorted_commits(&self, commits: &[CommitRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sorted_commits")
            .execute(&mut *tx)
            .await?;

        let mut written = 0;
        for commit in commits {
            let Some(date) = commit.date else {
                continue;
            };
            sqlx::query("INSERT INTO sorted_commits (commit_id, date) VALUES (?, ?)")
                .bind(commit.id)
                .bind(to_ts(date))
                .execute(&mut *tx)
                .await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn delete_sorted_commits_for(&self, commit_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sorted_commits WHERE commit_id = ?")
            .bind(commit_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sorted_commits(&self) -> Result<Vec<SortedCommit>> {
        let rows = sqlx::query("SELECT id, commit_id, date FROM sorted_commits ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let ts: i64 = row.get("date");
            let date = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| anyhow::anyhow!("sorted_commits date out of range: {}", ts))?;
            entries.push(SortedCommit {
                id: row.get("id"),
                commit_id: row.get("commit_id"),
                date,
            });
        }
        Ok(entries)
    }

    async fn counts(&self) -> Result<TableCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM repos) AS repos,
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM commits) AS commits,
                (SELECT COUNT(*) FROM sorted_commits) AS sorted_commits
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(TableCounts {
            repos: row.get("repos"),
            users: row.get("users"),
            commits: row.get("commits"),
            sorted_commits: row.get("sorted_commits"),
        })
    }

    async fn apply_batch(
        &self,
        repo_id: i64,
        commits: &[AcceptedCommit],
        watermark: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchOutcome::default();

        for commit in commits {
            let author = upsert_author_on(&mut tx, &commit.author, commit.date).await?;
            append_commit_on(
                &mut tx,
                &NewCommit {
                    repo_id,
                    user_id: author.id,
                    date: Some(commit.date),
                    sha: commit.sha.clone(),
                },
            )
            .await?;
            outcome.appended += 1;
            outcome.bounds.observe(commit.date);
        }

        if !outcome.bounds.is_empty() {
            widen_bounds_on(&mut tx, "repos", repo_id, outcome.bounds).await?;
        }
        outcome.watermark_advanced = advance_watermark_on(&mut tx, repo_id, watermark).await?;

        tx.commit().await?;
        Ok(outcome)
    }
}
