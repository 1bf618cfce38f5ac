//! Assembly of the list of repositories to poll.
//!
//! The list is the union of the individually configured repository URLs
//! and every repository of the configured organizations, deduplicated.
//! GitHub owner and repository names are case-insensitive, so the first
//! spelling seen wins and later spellings of the same repository are
//! dropped.
//! Only `github.com` URLs are supported; anything else is logged and
//! skipped.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::github::GithubClient;
use crate::remote::RemoteApi;

const GITHUB_HOST: &str = "github.com";

/// One repository to poll, identified by `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
}

impl RepoTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Case-folded identity used for deduplication.
    pub fn key(&self) -> (String, String) {
        (self.owner.to_lowercase(), self.repo.to_lowercase())
    }
}

/// Insert `target` unless a repository with the same case-folded name is
/// already present. Returns `true` when inserted.
fn insert_target(targets: &mut BTreeMap<(String, String), RepoTarget>, target: RepoTarget) -> bool {
    match targets.entry(target.key()) {
        Entry::Vacant(slot) => {
            slot.insert(target);
            true
        }
        Entry::Occupied(_) => false,
    }
}

impl fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Parse `https://github.com/owner/repo[.git][/]` into a target.
///
/// Fails for other hosts and for paths that do not have exactly two
/// segments.
pub fn parse_repo_url(raw: &str) -> Result<RepoTarget> {
    let url = Url::parse(raw.trim()).with_context(|| format!("malformed repository URL: '{}'", raw))?;

    let host = url.host_str().unwrap_or_default().to_lowercase();
    if host != GITHUB_HOST && host != "www.github.com" {
        anyhow::bail!("unsupported repository host '{}' in '{}'", host, raw);
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(*repo);
            if repo.is_empty() {
                anyhow::bail!("missing repository name in '{}'", raw);
            }
            Ok(RepoTarget::new(*owner, repo))
        }
        _ => anyhow::bail!("expected https://github.com/<owner>/<repo>, got '{}'", raw),
    }
}

/// Build the deduplicated list of repositories to poll.
///
/// Malformed or unsupported individual URLs are skipped with a warning.
/// A failure to list an organization aborts assembly.
pub async fn build_repo_list(config: &Config, remote: &dyn RemoteApi) -> Result<Vec<RepoTarget>> {
    let mut targets = BTreeMap::new();

    for raw in &config.repositories {
        match parse_repo_url(raw) {
            Ok(target) => {
                insert_target(&mut targets, target);
            }
            Err(e) => warn!(url = %raw, error = %e, "Skipping repository"),
        }
    }

    for org in &config.organizations {
        let repos = remote
            .list_org_repositories(&org.name, org.visibility.as_deref())
            .await
            .with_context(|| format!("Failed to list repositories of organization '{}'", org.name))?;

        let mut added = 0;
        for repo in repos {
            if org.exclude_forks && repo.is_fork {
                continue;
            }
            match parse_repo_url(&repo.url) {
                Ok(target) => {
                    if insert_target(&mut targets, target) {
                        added += 1;
                    }
                }
                Err(e) => warn!(url = %repo.url, error = %e, "Skipping repository"),
            }
        }
        info!(org = %org.name, repos = added, "Listed organization repositories");
    }

    Ok(targets.into_values().collect())
}

/// `activity repos`: print the assembled list with each repository's
/// creation date on the hosting site.
pub async fn run_list_repos(config: &Config) -> Result<()> {
    let remote = GithubClient::new(&config.github)?;
    let targets = build_repo_list(config, &remote).await?;

    println!("{:<50} {:<12}", "REPOSITORY", "CREATED");
    for target in &targets {
        let created = match remote.get_repository(&target.owner, &target.repo).await {
            Ok(info) => info
                .created_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string()),
            Err(e) if e.is_not_found() => "not found".to_string(),
            Err(e) => {
                warn!(repo = %target, error = %e, "Failed to fetch repository");
                "error".to_string()
            }
        };
        println!("{:<50} {:<12}", target.to_string(), created);
    }
    println!();
    println!("{} repositories.", targets.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        let t = parse_repo_url("https://github.com/Chia-Network/chia-blockchain").unwrap();
        assert_eq!(t, RepoTarget::new("Chia-Network", "chia-blockchain"));
        assert_eq!(t.to_string(), "Chia-Network/chia-blockchain");
    }

    #[test]
    fn test_parse_repo_url_trims_suffixes() {
        assert_eq!(
            parse_repo_url("https://github.com/o/r.git").unwrap(),
            RepoTarget::new("o", "r")
        );
        assert_eq!(
            parse_repo_url("https://github.com/o/r/").unwrap(),
            RepoTarget::new("o", "r")
        );
    }

    #[test]
    fn test_dedup_ignores_case() {
        let mut targets = BTreeMap::new();
        assert!(insert_target(&mut targets, RepoTarget::new("chia-network", "docs")));
        assert!(!insert_target(&mut targets, RepoTarget::new("Chia-Network", "Docs")));
        assert!(insert_target(&mut targets, RepoTarget::new("Chia-Network", "chia-blockchain")));
        let names: Vec<String> = targets.into_values().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["Chia-Network/chia-blockchain", "chia-network/docs"]);
    }

    #[test]
    fn test_parse_repo_url_rejects() {
        assert!(parse_repo_url("not a url").is_err());
        assert!(parse_repo_url("https://gitlab.com/o/r").is_err());
        assert!(parse_repo_url("https://github.com/o").is_err());
        assert!(parse_repo_url("https://github.com/o/r/tree/main").is_err());
    }
}
