use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
///
/// Timestamps are stored as INTEGER Unix seconds. Repository owner and
/// name compare case-insensitively, as on GitHub. Plain `INTEGER PRIMARY
/// KEY` (no AUTOINCREMENT) lets `sorted_commits` IDs restart at 1 after
/// each projection rebuild.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY,
            owner TEXT NOT NULL COLLATE NOCASE,
            repo TEXT NOT NULL COLLATE NOCASE,
            imported_through INTEGER,
            first_commit INTEGER,
            last_commit INTEGER,
            notes TEXT,
            UNIQUE(owner, repo)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_commit INTEGER,
            last_commit INTEGER,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            id INTEGER PRIMARY KEY,
            repo_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            date INTEGER,
            sha TEXT NOT NULL,
            notes TEXT,
            FOREIGN KEY (repo_id) REFERENCES repos(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sorted_commits (
            id INTEGER PRIMARY KEY,
            commit_id INTEGER NOT NULL,
            date INTEGER NOT NULL,
            FOREIGN KEY (commit_id) REFERENCES commits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_commits_date ON commits(date, id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_commits_user_id ON commits(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_commits_repo_id ON commits(repo_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sorted_commits_commit_id ON sorted_commits(commit_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
