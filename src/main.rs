//! # Ecosystem Activity CLI (`activity`)
//!
//! The `activity` binary runs the collection service and the maintenance
//! commands around it.
//!
//! ## Usage
//!
//! ```bash
//! activity --config ./config/activity.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `activity init` | Create the SQLite database and run schema migrations |
//! | `activity serve` | Run the collector loop, sorter schedule, and health server |
//! | `activity collect` | One collection pass over all repositories |
//! | `activity sort` | Rebuild the sorted commits projection |
//! | `activity repos` | List the repositories that would be polled |
//! | `activity delete-bots` | Remove bot activity from a start date onwards |
//! | `activity backfill` | Fill missing first/last commit bounds |
//! | `activity import-commits` | Import commits from a CSV export |
//! | `activity stats` | Show table counts and per-repository progress |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use ecosystem_activity::{
    backfill, cleanup, collector, config, import, logging, migrate, repo_list, server, sorter,
    stats,
};

/// Ecosystem Activity: incremental commit-activity collection for a set of
/// GitHub repositories.
#[derive(Parser)]
#[command(
    name = "activity",
    about = "Ecosystem Activity — incremental commit-activity collection for GitHub repositories",
    version,
    long_about = "Ecosystem Activity polls GitHub for commits on a configured set of repositories \
    and organizations, reconciles them into an SQLite commit ledger with per-repository and \
    per-author first/last commit bounds, and maintains a chronologically sorted projection."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/activity.toml`.
    #[arg(long, global = true, default_value = "./config/activity.toml")]
    config: PathBuf,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`). `RUST_LOG`
    /// overrides it.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the repos, users, commits, and
    /// sorted_commits tables. Running it multiple times is safe.
    Init,

    /// Run the long-lived service.
    ///
    /// Polls every configured repository on `[collector].interval_minutes`,
    /// rebuilds the sorted projection on `[sorter].interval_minutes`, and
    /// serves `/healthz` on `[server].bind`.
    Serve,

    /// Run one collection pass over every configured repository and exit.
    Collect,

    /// Rebuild the sorted commits projection from the commit ledger.
    Sort,

    /// List the repositories assembled from the configuration.
    Repos,

    /// Delete bot activity.
    ///
    /// Finds users matching the bot markers, deletes their commits dated on
    /// or after `--start-date`, deletes users left without commits, and
    /// rebuilds the sorted projection.
    DeleteBots {
        /// First day to delete, in YYYY-MM-DD format.
        #[arg(long)]
        start_date: String,

        /// Seconds to wait after listing the matched users, so the run can
        /// be aborted.
        #[arg(long, default_value_t = 30)]
        grace_secs: u64,
    },

    /// Fill missing first/last commit bounds of repositories and users
    /// from the commit ledger.
    Backfill,

    /// Import commits from a CSV file.
    ///
    /// Expected columns: Owner, Repository, Commit Author, Commit SHA,
    /// Commit Date. Repositories and users must already exist.
    ImportCommits {
        /// The file to import.
        #[arg(long)]
        file: PathBuf,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Collect => {
            collector::run_collect(&cfg).await?;
        }
        Commands::Sort => {
            sorter::run_sort(&cfg).await?;
        }
        Commands::Repos => {
            repo_list::run_list_repos(&cfg).await?;
        }
        Commands::DeleteBots {
            start_date,
            grace_secs,
        } => {
            cleanup::run_delete_bots(&cfg, &start_date, Duration::from_secs(grace_secs)).await?;
        }
        Commands::Backfill => {
            backfill::run_backfill(&cfg).await?;
        }
        Commands::ImportCommits { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
