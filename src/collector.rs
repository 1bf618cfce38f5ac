//! Incremental commit collection.
//!
//! The collector polls each configured repository for commits authored
//! since its watermark and reconciles them into the stores. One
//! per-repository pass is a *cycle*:
//!
//! ```text
//! NotSeen → Seeded → WindowComputed → Fetching → Reconciling → WatermarkAdvanced
//!              └────────────┴──────────────┴──────────┴──→ Skipped
//! ```
//!
//! A skipped cycle leaves the persisted watermark untouched, so the next
//! pass retries the same window. The new watermark is captured before the
//! fetch begins: commits authored while paging land in the next window.
//!
//! # Failure handling
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Repository not found (404) | logged, skipped, nothing written |
//! | Other fetch failure | logged, skipped, nothing written |
//! | Commit missing SHA, login, or date | commit dropped, batch continues |
//! | Duplicate identity rows | logged, skipped |
//! | Storage I/O failure | returned as `Err` to the caller |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use activity_core::models::AcceptedCommit;
use activity_core::{ActivityStore, BotClassifier, Bounds, DuplicateRowError};

use crate::config::Config;
use crate::github::GithubClient;
use crate::remote::{RemoteApi, RemoteCommit};
use crate::repo_list::{build_repo_list, RepoTarget};
use crate::sqlite_store::SqliteStore;

/// Stage of a cycle, used to report where a skipped cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Seeded,
    WindowComputed,
    Fetching,
    Reconciling,
    WatermarkAdvanced,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStage::Seeded => "seeded",
            CycleStage::WindowComputed => "window_computed",
            CycleStage::Fetching => "fetching",
            CycleStage::Reconciling => "reconciling",
            CycleStage::WatermarkAdvanced => "watermark_advanced",
        };
        f.write_str(s)
    }
}

/// Why a cycle ended without advancing the watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The hosting site reports the repository does not exist.
    NotFound,
    /// Any other fetch failure; retried on the next pass.
    FetchFailed(String),
    /// An identity expected to be unique matched several rows.
    Inconsistent(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => f.write_str("repository not found"),
            SkipReason::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            SkipReason::Inconsistent(e) => write!(f, "inconsistent store: {}", e),
        }
    }
}

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub window_start: DateTime<Utc>,
    pub watermark: DateTime<Utc>,
    /// Commits returned by the remote.
    pub fetched: usize,
    /// Commits written to the ledger.
    pub imported: usize,
    /// Commits dropped for missing SHA, login, or date.
    pub dropped: usize,
    /// Bot commits dropped (only when bot filtering is enabled).
    pub bots_skipped: usize,
    /// Min/max date of the imported batch.
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Imported(CycleReport),
    Skipped { stage: CycleStage, reason: SkipReason },
}

/// Totals over one pass across all repositories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub repos: usize,
    pub imported_repos: usize,
    pub skipped_repos: usize,
    pub commits: usize,
}

/// The ingestion orchestrator. Store and remote are injected.
pub struct Collector {
    store: Arc<dyn ActivityStore>,
    remote: Arc<dyn RemoteApi>,
    classifier: BotClassifier,
    filter_bots: bool,
    epoch: DateTime<Utc>,
}

impl Collector {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        remote: Arc<dyn RemoteApi>,
        epoch: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            remote,
            classifier: BotClassifier::default(),
            filter_bots: false,
            epoch,
        }
    }

    /// Drop commits whose author matches `classifier` before reconciling.
    pub fn with_bot_filter(mut self, classifier: BotClassifier, enabled: bool) -> Self {
        self.classifier = classifier;
        self.filter_bots = enabled;
        self
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn ActivityStore>,
        remote: Arc<dyn RemoteApi>,
    ) -> Result<Self> {
        let epoch = config.collector.epoch_start()?;
        Ok(Self::new(store, remote, epoch)
            .with_bot_filter(config.bots.classifier(), config.bots.filter_on_ingest))
    }

    pub async fn run_cycle(&self, target: &RepoTarget) -> Result<CycleOutcome> {
        // Watermarks are persisted with second precision.
        self.run_cycle_at(target, Utc::now().trunc_subsecs(0)).await
    }

    /// Run one cycle with `now` as the new watermark.
    pub async fn run_cycle_at(
        &self,
        target: &RepoTarget,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        let existing = match self.store.get_repo(&target.owner, &target.repo).await {
            Ok(row) => row,
            Err(e) if e.downcast_ref::<DuplicateRowError>().is_some() => {
                error!(repo = %target, error = %e, "Skipping repository");
                return Ok(skipped(CycleStage::Seeded, SkipReason::Inconsistent(e.to_string())));
            }
            Err(e) => return Err(e),
        };

        let window_start = existing
            .as_ref()
            .and_then(|r| r.imported_through)
            .unwrap_or(self.epoch);
        debug!(
            repo = %target,
            stage = %CycleStage::WindowComputed,
            since = %window_start,
            until = %now,
            "Computed import window"
        );

        let fetched = match self
            .remote
            .list_commits(&target.owner, &target.repo, window_start, now)
            .await
        {
            Ok(commits) => commits,
            Err(e) if e.is_not_found() => {
                warn!(repo = %target, "Repository not found, skipping");
                return Ok(skipped(CycleStage::Fetching, SkipReason::NotFound));
            }
            Err(e) => {
                error!(repo = %target, error = %e, "Failed to fetch commits");
                return Ok(skipped(CycleStage::Fetching, SkipReason::FetchFailed(e.to_string())));
            }
        };

        let fetched_count = fetched.len();
        let mut accepted = Vec::with_capacity(fetched_count);
        let mut dropped = 0;
        let mut bots_skipped = 0;
        for commit in fetched {
            let Some(commit) = accept(commit) else {
                warn!(repo = %target, "Dropping commit with missing sha, author, or date");
                dropped += 1;
                continue;
            };
            if self.filter_bots && self.classifier.is_bot(&commit.author) {
                debug!(repo = %target, author = %commit.author, sha = %commit.sha, "Skipping bot commit");
                bots_skipped += 1;
                continue;
            }
            accepted.push(commit);
        }

        // Unseen repositories are only created once a fetch has succeeded.
        let repo = match existing {
            Some(row) => row,
            None => self.store.create_repo(&target.owner, &target.repo).await?,
        };

        let outcome = match self.store.apply_batch(repo.id, &accepted, now).await {
            Ok(outcome) => outcome,
            Err(e) if e.downcast_ref::<DuplicateRowError>().is_some() => {
                error!(repo = %target, error = %e, "Skipping repository");
                return Ok(skipped(CycleStage::Reconciling, SkipReason::Inconsistent(e.to_string())));
            }
            Err(e) => return Err(e),
        };
        if !outcome.watermark_advanced {
            warn!(repo = %target, watermark = %now, "Stored watermark is ahead, left unchanged");
        }

        info!(
            repo = %target,
            stage = %CycleStage::WatermarkAdvanced,
            fetched = fetched_count,
            imported = outcome.appended,
            dropped,
            bots_skipped,
            "Imported commits"
        );

        Ok(CycleOutcome::Imported(CycleReport {
            window_start,
            watermark: now,
            fetched: fetched_count,
            imported: outcome.appended,
            dropped,
            bots_skipped,
            bounds: outcome.bounds,
        }))
    }

    /// Run one cycle per target, sequentially.
    ///
    /// Returns early with `Err` on a storage failure; every other failure
    /// only skips the affected repository.
    pub async fn run_pass(&self, targets: &[RepoTarget]) -> Result<PassSummary> {
        let mut summary = PassSummary {
            repos: targets.len(),
            ..Default::default()
        };
        for target in targets {
            match self.run_cycle(target).await? {
                CycleOutcome::Imported(report) => {
                    summary.imported_repos += 1;
                    summary.commits += report.imported;
                }
                CycleOutcome::Skipped { stage, reason } => {
                    debug!(repo = %target, %stage, %reason, "Cycle skipped");
                    summary.skipped_repos += 1;
                }
            }
        }
        Ok(summary)
    }
}

fn skipped(stage: CycleStage, reason: SkipReason) -> CycleOutcome {
    CycleOutcome::Skipped { stage, reason }
}

/// Shape check: a commit needs a SHA, an author login, and an author date.
fn accept(commit: RemoteCommit) -> Option<AcceptedCommit> {
    Some(AcceptedCommit {
        sha: commit.sha?,
        author: commit.author_login?,
        date: commit.authored_at?,
    })
}

/// Run passes forever, resting `interval` between them, until `shutdown`
/// fires. A failed pass is logged and the loop continues.
pub async fn run_loop(
    collector: Arc<Collector>,
    targets: Vec<RepoTarget>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(repos = targets.len(), interval_secs = interval.as_secs(), "Collector started");
    loop {
        match collector.run_pass(&targets).await {
            Ok(summary) => info!(
                repos = summary.repos,
                imported = summary.imported_repos,
                skipped = summary.skipped_repos,
                commits = summary.commits,
                "Collection pass complete"
            ),
            Err(e) => error!(error = %e, "Collection pass failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.recv() => {
                info!("Shutting down collector");
                break;
            }
        }
    }
}

/// `activity collect`: one pass over every configured repository.
pub async fn run_collect(config: &Config) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let client = GithubClient::new(&config.github)?;
    if !client.is_authenticated() {
        warn!(env = %config.github.token_env, "No GitHub token set, using unauthenticated access");
    }
    let remote: Arc<dyn RemoteApi> = Arc::new(client);

    let targets = build_repo_list(config, remote.as_ref()).await?;
    let collector = Collector::from_config(config, store.clone(), remote)?;
    let summary = collector.run_pass(&targets).await?;

    println!(
        "Collected {} commits from {} repositories ({} skipped).",
        summary.commits, summary.imported_repos, summary.skipped_repos
    );

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_core::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    use crate::remote::{RemoteError, RemoteRepo, RepoInfo};

    enum Script {
        Commits(Vec<RemoteCommit>),
        NotFound,
        Fail,
    }

    /// Remote that replays a fixed response and records requested windows.
    struct FakeRemote {
        script: Script,
        windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl FakeRemote {
        fn new(script: Script) -> Self {
            Self {
                script,
                windows: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn list_org_repositories(
            &self,
            _org: &str,
            _visibility: Option<&str>,
        ) -> Result<Vec<RemoteRepo>, RemoteError> {
            Ok(Vec::new())
        }

        async fn list_commits(
            &self,
            _owner: &str,
            _repo: &str,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<RemoteCommit>, RemoteError> {
            self.windows.lock().unwrap().push((since, until));
            match &self.script {
                Script::Commits(c) => Ok(c.clone()),
                Script::NotFound => Err(RemoteError::NotFound("gone".into())),
                Script::Fail => Err(RemoteError::Api {
                    status: 502,
                    message: "bad gateway".into(),
                }),
            }
        }

        async fn get_repository(&self, owner: &str, repo: &str) -> Result<RepoInfo, RemoteError> {
            Ok(RepoInfo {
                full_name: format!("{}/{}", owner, repo),
                created_at: None,
                is_fork: false,
            })
        }
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn commit(sha: &str, login: &str, at: DateTime<Utc>) -> RemoteCommit {
        RemoteCommit {
            sha: Some(sha.into()),
            author_login: Some(login.into()),
            authored_at: Some(at),
            committed_at: Some(at),
        }
    }

    fn scenario_commits() -> Vec<RemoteCommit> {
        vec![
            commit("a1", "alice", day(2020, 1, 1)),
            commit("b1", "bot[bot]", day(2020, 1, 3)),
            commit("a2", "alice", day(2020, 1, 2)),
        ]
    }

    #[tokio::test]
    async fn test_first_cycle_end_to_end() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(FakeRemote::new(Script::Commits(scenario_commits())));
        let collector = Collector::new(store.clone(), remote.clone(), day(2017, 8, 1));
        let target = RepoTarget::new("chia-network", "example");
        let now = day(2020, 2, 1);

        let outcome = collector.run_cycle_at(&target, now).await.unwrap();
        let CycleOutcome::Imported(report) = outcome else {
            panic!("expected import, got {:?}", outcome);
        };
        assert_eq!(report.window_start, day(2017, 8, 1));
        assert_eq!(report.imported, 3);

        let repo = store.get_repo("chia-network", "example").await.unwrap().unwrap();
        assert_eq!(repo.first_commit, Some(day(2020, 1, 1)));
        assert_eq!(repo.last_commit, Some(day(2020, 1, 3)));
        assert_eq!(repo.imported_through, Some(now));

        let alice = store.get_author("alice").await.unwrap().unwrap();
        assert_eq!(alice.first_commit, Some(day(2020, 1, 1)));
        assert_eq!(alice.last_commit, Some(day(2020, 1, 2)));
        assert_eq!(store.counts().await.unwrap().commits, 3);

        assert_eq!(
            remote.windows.lock().unwrap().as_slice(),
            &[(day(2017, 8, 1), now)]
        );
    }

    #[tokio::test]
    async fn test_second_cycle_starts_at_watermark() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(FakeRemote::new(Script::Commits(Vec::new())));
        let collector = Collector::new(store.clone(), remote.clone(), day(2017, 8, 1));
        let target = RepoTarget::new("o", "r");

        collector.run_cycle_at(&target, day(2020, 1, 1)).await.unwrap();
        collector.run_cycle_at(&target, day(2020, 1, 2)).await.unwrap();

        let windows = remote.windows.lock().unwrap().clone();
        assert_eq!(windows[1], (day(2020, 1, 1), day(2020, 1, 2)));

        let repo = store.get_repo("o", "r").await.unwrap().unwrap();
        assert_eq!(repo.imported_through, Some(day(2020, 1, 2)));
        assert!(repo.bounds().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(FakeRemote::new(Script::NotFound));
        let collector = Collector::new(store.clone(), remote, day(2017, 8, 1));

        let outcome = collector
            .run_cycle_at(&RepoTarget::new("o", "gone"), day(2020, 1, 1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                stage: CycleStage::Fetching,
                reason: SkipReason::NotFound
            }
        );
        assert_eq!(store.counts().await.unwrap(), Default::default());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_watermark() {
        let store = Arc::new(InMemoryStore::new());
        let repo = store.create_repo("o", "r").await.unwrap();
        store.advance_watermark(repo.id, day(2019, 1, 1)).await.unwrap();

        let collector = Collector::new(
            store.clone(),
            Arc::new(FakeRemote::new(Script::Fail)),
            day(2017, 8, 1),
        );
        let outcome = collector
            .run_cycle_at(&RepoTarget::new("o", "r"), day(2020, 1, 1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::FetchFailed(_),
                ..
            }
        ));
        let row = store.get_repo("o", "r").await.unwrap().unwrap();
        assert_eq!(row.imported_through, Some(day(2019, 1, 1)));
    }

    #[tokio::test]
    async fn test_malformed_commits_dropped() {
        let mut commits = scenario_commits();
        commits.push(RemoteCommit {
            sha: Some("x".into()),
            author_login: None,
            authored_at: Some(day(2020, 1, 5)),
            committed_at: None,
        });
        commits.push(RemoteCommit {
            sha: None,
            author_login: Some("carol".into()),
            authored_at: Some(day(2020, 1, 5)),
            committed_at: None,
        });
        let store = Arc::new(InMemoryStore::new());
        let collector = Collector::new(
            store.clone(),
            Arc::new(FakeRemote::new(Script::Commits(commits))),
            day(2017, 8, 1),
        );

        let CycleOutcome::Imported(report) = collector
            .run_cycle_at(&RepoTarget::new("o", "r"), day(2020, 2, 1))
            .await
            .unwrap()
        else {
            panic!("expected import");
        };
        assert_eq!(report.fetched, 5);
        assert_eq!(report.imported, 3);
        assert_eq!(report.dropped, 2);
        assert!(store.get_author("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bot_filter_on_ingest() {
        let store = Arc::new(InMemoryStore::new());
        let collector = Collector::new(
            store.clone(),
            Arc::new(FakeRemote::new(Script::Commits(scenario_commits()))),
            day(2017, 8, 1),
        )
        .with_bot_filter(BotClassifier::default(), true);

        let CycleOutcome::Imported(report) = collector
            .run_cycle_at(&RepoTarget::new("o", "r"), day(2020, 2, 1))
            .await
            .unwrap()
        else {
            panic!("expected import");
        };
        assert_eq!(report.imported, 2);
        assert_eq!(report.bots_skipped, 1);
        assert_eq!(report.bounds, Bounds::new(Some(day(2020, 1, 1)), Some(day(2020, 1, 2))));
        assert!(store.get_author("bot[bot]").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rows_skip_cycle() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_duplicate_repo("o", "r").unwrap();
        store.insert_duplicate_repo("o", "r").unwrap();
        let remote = Arc::new(FakeRemote::new(Script::Commits(scenario_commits())));
        let collector = Collector::new(store.clone(), remote.clone(), day(2017, 8, 1));

        let outcome = collector
            .run_cycle_at(&RepoTarget::new("o", "r"), day(2020, 2, 1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                stage: CycleStage::Seeded,
                reason: SkipReason::Inconsistent(_)
            }
        ));
        assert!(remote.windows.lock().unwrap().is_empty());
        assert_eq!(store.counts().await.unwrap().commits, 0);
    }

    #[tokio::test]
    async fn test_run_pass_counts() {
        let store = Arc::new(InMemoryStore::new());
        let collector = Collector::new(
            store.clone(),
            Arc::new(FakeRemote::new(Script::Commits(scenario_commits()))),
            day(2017, 8, 1),
        );
        let targets = vec![RepoTarget::new("o", "a"), RepoTarget::new("o", "b")];
        let summary = collector.run_pass(&targets).await.unwrap();
        assert_eq!(summary.repos, 2);
        assert_eq!(summary.imported_repos, 2);
        assert_eq!(summary.commits, 6);
        // Authors are shared across repositories.
        assert_eq!(store.counts().await.unwrap().users, 2);
    }
}
