//! GitHub REST implementation of [`RemoteApi`].
//!
//! Listing endpoints are paginated with `per_page` and followed through the
//! `Link` response header until no `rel="next"` link remains. A 404 maps to
//! [`RemoteError::NotFound`]; a 403/429 with an exhausted rate limit maps to
//! [`RemoteError::RateLimited`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GithubConfig;
use crate::remote::{RemoteApi, RemoteCommit, RemoteError, RemoteRepo, RepoInfo};

const ACCEPT_JSON: &str = "application/vnd.github+json";

/// Default cap on followed pages per listing. Reaching it fails the
/// listing instead of returning a truncated result.
pub const MAX_PAGES: usize = 10_000;

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    token: Option<String>,
    per_page: u32,
    max_pages: usize,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token(),
            per_page: config.per_page,
            max_pages: MAX_PAGES,
        })
    }

    /// Override the page cap of listing calls.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, RemoteError> {
        let mut req = self
            .http
            .get(url)
            .header(ACCEPT, ACCEPT_JSON)
            .header(USER_AGENT, concat!("ecosystem-activity/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if !query.is_empty() {
            req = req.query(query);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(url.to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && rate_limit_exhausted(response.headers()))
        {
            return Err(RemoteError::RateLimited {
                reset: rate_limit_reset(response.headers()),
            });
        }

        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Fetch `url` and every following page, concatenating the items.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        mut query: Vec<(&str, String)>,
    ) -> Result<Vec<T>, RemoteError> {
        query.push(("per_page", self.per_page.to_string()));

        let mut items = Vec::new();
        let mut response = self.get(url, &query).await?;
        let mut page = 1;
        loop {
            let next = next_page_url(response.headers());
            let batch: Vec<T> = response
                .json()
                .await
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
            debug!(url, page, items = batch.len(), "Fetched page");
            items.extend(batch);

            let Some(next_url) = next else {
                return Ok(items);
            };
            if page >= self.max_pages {
                warn!(url, max_pages = self.max_pages, "Pagination limit reached");
                return Err(RemoteError::InvalidResponse(format!(
                    "pagination limit of {} pages reached for {}",
                    self.max_pages, url
                )));
            }
            // The next link already carries the query string.
            response = self.get(&next_url, &[]).await?;
            page += 1;
        }
    }
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// Extract the `rel="next"` target from a `Link` header.
///
/// Format: `<https://api.github.com/...&page=2>; rel="next", <...>; rel="last"`.
pub fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(link)
}

fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(|t| t.to_string())
    })
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct ApiRepo {
    html_url: String,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    author: Option<ApiUser>,
    #[serde(default)]
    commit: Option<ApiCommitDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    #[serde(default)]
    author: Option<ApiSignature>,
    #[serde(default)]
    committer: Option<ApiSignature>,
}

#[derive(Debug, Deserialize)]
struct ApiSignature {
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl From<ApiCommit> for RemoteCommit {
    fn from(c: ApiCommit) -> Self {
        let (authored_at, committed_at) = match c.commit {
            Some(detail) => (
                detail.author.and_then(|s| s.date),
                detail.committer.and_then(|s| s.date),
            ),
            None => (None, None),
        };
        RemoteCommit {
            sha: non_empty(c.sha),
            author_login: non_empty(c.author.and_then(|a| a.login)),
            authored_at,
            committed_at,
        }
    }
}

/// The listing filters `since`/`until` on the committer date, with an
/// inclusive `until`. Keep only commits committed strictly before `until`.
fn committed_before(commit: &RemoteCommit, until: DateTime<Utc>) -> bool {
    commit
        .committed_at
        .or(commit.authored_at)
        .map_or(true, |at| at < until)
}

#[async_trait]
impl RemoteApi for GithubClient {
    async fn list_org_repositories(
        &self,
        org: &str,
        visibility: Option<&str>,
    ) -> Result<Vec<RemoteRepo>, RemoteError> {
        let url = format!("{}/orgs/{}/repos", self.api_url, org);
        let mut query = Vec::new();
        if let Some(v) = visibility {
            query.push(("type", v.to_string()));
        }
        let repos: Vec<ApiRepo> = self.get_paginated(&url, query).await?;
        Ok(repos
            .into_iter()
            .map(|r| RemoteRepo {
                url: r.html_url,
                is_fork: r.fork,
            })
            .collect())
    }

    async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RemoteCommit>, RemoteError> {
        let url = format!("{}/repos/{}/{}/commits", self.api_url, owner, repo);
        let query = vec![("since", iso(since)), ("until", iso(until))];
        let commits: Vec<ApiCommit> = self.get_paginated(&url, query).await?;
        Ok(commits
            .into_iter()
            .map(RemoteCommit::from)
            .filter(|c| committed_before(c, until))
            .collect())
    }

    async fn get_repository(&self, owner: &str, repo: &str) -> Result<RepoInfo, RemoteError> {
        let url = format!("{}/repos/{}/{}", self.api_url, owner, repo);
        let info: ApiRepo = self
            .get(&url, &[])
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(RepoInfo {
            full_name: info.full_name,
            created_at: info.created_at,
            is_fork: info.fork,
        })
    }
}
