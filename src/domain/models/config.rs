use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::pipeline::{default_stages, StageEntry};

/// Main configuration structure for Stagehand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Log intended writes instead of performing them
    #[serde(default)]
    pub dry_run: bool,

    /// Let per-head failures abort a single pass instead of logging them
    #[serde(default)]
    pub debug: bool,

    /// Seconds between poll cycles, 0 for a single pass
    #[serde(default)]
    pub loop_interval_secs: u64,

    /// Repositories to reconcile, as `owner/name`
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Commits older than this many weeks are not built
    #[serde(default = "default_commit_max_weeks")]
    pub commit_max_weeks: u32,

    /// Path of the job specification file in repositories
    #[serde(default = "default_spec_file")]
    pub spec_file: String,

    /// Stages used when a repository declares none
    #[serde(default = "default_stages")]
    pub default_stages: Vec<StageEntry>,

    /// Context prefixes hidden when displaying stages
    #[serde(default)]
    pub trim_prefixes: Vec<String>,

    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Code host configuration
    #[serde(default)]
    pub github: GitHubConfig,

    /// Build server configuration
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    /// API quota pacing
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Local request rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Webhook server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_commit_max_weeks() -> u32 {
    4
}

fn default_spec_file() -> String {
    "jenkins.yml".to_string()
}

const fn default_workers() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: false,
            debug: false,
            loop_interval_secs: 0,
            repositories: vec![],
            commit_max_weeks: default_commit_max_weeks(),
            spec_file: default_spec_file(),
            default_stages: default_stages(),
            trim_prefixes: vec![],
            workers: default_workers(),
            github: GitHubConfig::default(),
            jenkins: JenkinsConfig::default(),
            throttle: ThrottleConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Code host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GitHubConfig {
    /// API token
    #[serde(default)]
    pub token: Option<String>,

    /// REST API base URL
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Shared secret of webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Branches and pull request refs to reconcile, include/exclude patterns
    #[serde(default = "default_heads_filter")]
    pub heads_filter: Vec<String>,

    /// Protected branches polled in addition to pull requests
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_heads_filter() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_branches() -> Vec<String> {
    vec!["master".to_string()]
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
            webhook_secret: None,
            heads_filter: default_heads_filter(),
            branches: default_branches(),
        }
    }
}

/// Build server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JenkinsConfig {
    /// Base URL of the build server
    #[serde(default = "default_jenkins_url")]
    pub url: String,

    /// User of API calls
    #[serde(default)]
    pub user: Option<String>,

    /// API token of `user`
    #[serde(default)]
    pub token: Option<String>,

    /// Jobs managed by the bot, include/exclude patterns
    #[serde(default)]
    pub jobs_filter: Vec<String>,

    /// Base URL repositories are cloned from by jobs
    #[serde(default = "default_git_url")]
    pub git_url: String,
}

fn default_jenkins_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_git_url() -> String {
    "https://github.com".to_string()
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: default_jenkins_url(),
            user: None,
            token: None,
            jobs_filter: vec![],
            git_url: default_git_url(),
        }
    }
}

/// API quota pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThrottleConfig {
    /// Remaining quota fraction below which pacing is left to backoff
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Length of the quota window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

const fn default_threshold() -> f64 {
    0.0
}

const fn default_window_secs() -> u64 {
    3600
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_secs: default_window_secs(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> u32 {
    10
}

const fn default_burst_size() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts of a transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Webhook server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Address the server listens on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Public base URL, used to register webhooks
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:2819".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// File the cache is saved to between runs
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Entries unused for longer than this are purged
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

const fn default_max_age_secs() -> u64 {
    24 * 3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files, stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.dry_run);
        assert_eq!(config.loop_interval_secs, 0);
        assert_eq!(config.commit_max_weeks, 4);
        assert_eq!(config.spec_file, "jenkins.yml");
        assert_eq!(config.default_stages.len(), 3);
        assert_eq!(config.workers, 4);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.heads_filter, vec!["*"]);
        assert_eq!(config.throttle.window_secs, 3600);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
dry_run: true
loop_interval_secs: 30
repositories:
  - owner/repo
default_stages:
  - build
  - name: deploy
    external: [staging]
github:
  heads_filter: ['*', '-*/wip']
jenkins:
  url: https://jenkins.example.com
throttle:
  threshold: 0.1
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.loop_interval_secs, 30);
        assert_eq!(config.repositories, vec!["owner/repo"]);
        assert_eq!(config.default_stages[1].external(), ["staging"]);
        assert_eq!(config.github.heads_filter, vec!["*", "-*/wip"]);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.jenkins.url, "https://jenkins.example.com");
        assert!((config.throttle.threshold - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.workers, 4);
    }
}
