use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use activity_core::bots::DEFAULT_BOT_MARKERS;
use activity_core::BotClassifier;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub sorter: SorterConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bots: BotsConfig,
    #[serde(default)]
    pub organizations: Vec<OrganizationConfig>,
    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            per_page: default_per_page(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GithubConfig {
    /// Token from the environment variable named by `token_env`, if set
    /// and non-empty.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Window start for repositories that have never been imported
    /// (`YYYY-MM-DD`, midnight UTC).
    #[serde(default = "default_epoch")]
    pub epoch: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            epoch: default_epoch(),
        }
    }
}

impl CollectorConfig {
    pub fn epoch_start(&self) -> Result<DateTime<Utc>> {
        parse_day(&self.epoch).with_context(|| format!("invalid collector.epoch: '{}'", self.epoch))
    }
}

fn default_interval_minutes() -> u64 {
    60
}
fn default_epoch() -> String {
    "2017-08-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SorterConfig {
    /// Minutes between projection rebuilds; `0` disables the schedule.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BotsConfig {
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
    /// Drop bot commits before they reach the ledger, on both the live
    /// collector and the CSV import.
    #[serde(default)]
    pub filter_on_ingest: bool,
}

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            filter_on_ingest: false,
        }
    }
}

impl BotsConfig {
    pub fn classifier(&self) -> BotClassifier {
        BotClassifier::new(&self.markers)
    }
}

fn default_markers() -> Vec<String> {
    DEFAULT_BOT_MARKERS.iter().map(|m| m.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OrganizationConfig {
    pub name: String,
    /// Repository type filter passed to the org listing
    /// (`all`, `public`, `private`, `forks`, `sources`, `member`).
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub exclude_forks: bool,
}

const VISIBILITIES: &[&str] = &["all", "public", "private", "forks", "sources", "member"];

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_day(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM-DD, got '{}'", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid date: '{}'", s))?;
    Ok(midnight.and_utc())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.collector.interval_minutes == 0 {
        anyhow::bail!("collector.interval_minutes must be > 0");
    }
    config.collector.epoch_start()?;

    if !(1..=100).contains(&config.github.per_page) {
        anyhow::bail!("github.per_page must be in [1, 100]");
    }
    if config.github.timeout_secs == 0 {
        anyhow::bail!("github.timeout_secs must be > 0");
    }
    if config.github.api_url.trim().is_empty() {
        anyhow::bail!("github.api_url must not be empty");
    }

    for org in &config.organizations {
        if org.name.trim().is_empty() {
            anyhow::bail!("organizations[].name must not be empty");
        }
        if let Some(v) = &org.visibility {
            if !VISIBILITIES.contains(&v.as_str()) {
                anyhow::bail!(
                    "Unknown visibility '{}' for organization '{}'. Must be one of: {}",
                    v,
                    org.name,
                    VISIBILITIES.join(", ")
                );
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/activity.sqlite\"\n").unwrap();
        assert_eq!(cfg.github.api_url, "https://api.github.com");
        assert_eq!(cfg.github.per_page, 100);
        assert_eq!(cfg.collector.interval_minutes, 60);
        assert_eq!(
            cfg.collector.epoch_start().unwrap(),
            parse_day("2017-08-01").unwrap()
        );
        assert_eq!(cfg.sorter.interval_minutes, 60);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert!(!cfg.bots.filter_on_ingest);
        assert!(cfg.bots.classifier().is_bot("dependabot[bot]"));
        assert!(cfg.organizations.is_empty());
        assert!(cfg.repositories.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
            repositories = ["https://github.com/chia-network/chia-blockchain"]

            [db]
            path = "/tmp/a.sqlite"

            [collector]
            interval_minutes = 15
            epoch = "2020-01-01"

            [sorter]
            interval_minutes = 0

            [bots]
            markers = ["-ci"]
            filter_on_ingest = true

            [[organizations]]
            name = "Chia-Network"
            visibility = "public"
            exclude_forks = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.collector.interval_minutes, 15);
        assert_eq!(cfg.sorter.interval_minutes, 0);
        assert_eq!(cfg.organizations.len(), 1);
        assert!(cfg.organizations[0].exclude_forks);
        assert_eq!(cfg.organizations[0].visibility.as_deref(), Some("public"));
        assert!(cfg.bots.filter_on_ingest);
        assert!(cfg.bots.classifier().is_bot("build-CI"));
        assert!(!cfg.bots.classifier().is_bot("dependabot[bot]"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = parse_config("[db]\npath = \"a\"\n[collector]\ninterval_minutes = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("interval_minutes"));
    }

    #[test]
    fn test_rejects_bad_epoch() {
        assert!(parse_config("[db]\npath = \"a\"\n[collector]\nepoch = \"01/08/2017\"\n").is_err());
    }

    #[test]
    fn test_rejects_per_page_out_of_range() {
        assert!(parse_config("[db]\npath = \"a\"\n[github]\nper_page = 101\n").is_err());
        assert!(parse_config("[db]\npath = \"a\"\n[github]\nper_page = 0\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_visibility() {
        let err = parse_config(
            "[db]\npath = \"a\"\n[[organizations]]\nname = \"o\"\nvisibility = \"secret\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("visibility"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/activity.example.toml")).unwrap();
        assert_eq!(
            cfg.repositories,
            vec!["https://github.com/Chia-Network/chia-blockchain".to_string()]
        );
        assert_eq!(cfg.organizations.len(), 1);
        assert_eq!(cfg.organizations[0].name, "Chia-Network");
    }

    #[test]
    fn test_rejects_key_swallowed_by_organization_table() {
        let err = parse_config(
            "[db]\npath = \"a\"\n[[organizations]]\nname = \"o\"\nrepositories = [\"https://github.com/o/r\"]\n",
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("repositories"));
    }

    #[test]
    fn test_rejects_unknown_section_key() {
        assert!(parse_config("[db]\npath = \"a\"\n[github]\ntoken = \"secret\"\n").is_err());
    }

    #[test]
    fn test_parse_day() {
        let d = parse_day("2020-01-02").unwrap();
        assert_eq!(d.to_rfc3339(), "2020-01-02T00:00:00+00:00");
        assert!(parse_day("2020-13-01").is_err());
    }
}
