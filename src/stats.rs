//! Database statistics and import overview.
//!
//! Provides a quick summary of what has been collected: row counts per
//! table and, per repository, the watermark and observed commit range.
//! Used by `activity stats` to confirm that collection passes and
//! projection rebuilds are keeping up.

use anyhow::Result;
use chrono::{DateTime, Utc};

use activity_core::ActivityStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let counts = store.counts().await?;
    let repos = store.list_repos().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ecosystem Activity — Database Stats");
    println!("===================================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!();
    println!("  Repositories:    {}", counts.repos);
    println!("  Users:           {}", counts.users);
    println!("  Commits:         {}", counts.commits);
    println!(
        "  Sorted commits:  {}{}",
        counts.sorted_commits,
        if counts.sorted_commits == counts.commits {
            ""
        } else {
            " (stale, run `activity sort`)"
        }
    );

    if !repos.is_empty() {
        println!();
        println!("  By repository:");
        println!(
            "  {:<40} {:>12} {:>12}   {}",
            "REPOSITORY", "FIRST", "LAST", "IMPORTED THROUGH"
        );
        println!("  {}", "-".repeat(84));

        let now = Utc::now();
        for r in &repos {
            let imported = match r.imported_through {
                Some(ts) => format_ts_relative(ts, now),
                None => "never".to_string(),
            };
            println!(
                "  {:<40} {:>12} {:>12}   {}",
                r.full_name(),
                format_day(r.first_commit),
                format_day(r.last_commit),
                imported
            );
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_day(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative(now, now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2), now), "2 days ago");
        assert_eq!(
            format_ts_relative(now - Duration::days(60), now),
            "2020-01-01 12:00"
        );
        assert_eq!(format_ts_relative(now + Duration::hours(1), now), "2020-03-01 13:00");
    }

    #[test]
    fn test_format_day() {
        assert_eq!(format_day(None), "-");
        assert_eq!(
            format_day(Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap())),
            "2020-01-02"
        );
    }
}
