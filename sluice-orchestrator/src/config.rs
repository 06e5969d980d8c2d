//! Orchestrator configuration
//!
//! Defines all configurable parameters: listener address, namespace
//! scope, resolution bounds, retry policies, and provider credentials.

use std::time::Duration;

/// Orchestrator configuration
///
/// Retry counts and backoffs are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the webhook listener binds to
    pub bind_addr: String,

    /// Namespace scope for repository lookups; `None` means all namespaces
    pub namespace: Option<String>,

    /// Base URL of the cluster gateway API
    pub cluster_api_url: String,

    /// How often the run watcher polls the cluster gateway
    pub watch_interval: Duration,

    /// Repository directory holding pipeline definitions
    pub pipeline_dir: String,

    /// Upper bound on nested reference chains during resolution
    pub max_reference_depth: usize,

    /// Deadline for one remote/bundle reference fetch
    pub fetch_timeout: Duration,

    /// Attempts for run creation at the cluster boundary
    pub admission_retries: u32,

    /// Initial backoff between run-creation attempts (doubles per retry)
    pub admission_backoff: Duration,

    /// Attempts for one status publication
    pub report_retries: u32,

    /// Initial backoff between status-publication attempts
    pub report_backoff: Duration,

    /// Provider API tokens
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub bitbucket_token: Option<String>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CLUSTER_API_URL (required)
    /// - BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - WATCH_NAMESPACE (optional, default: all namespaces)
    /// - WATCH_INTERVAL (optional, seconds, default: 5)
    /// - PIPELINE_DIR (optional, default: .pipelines)
    /// - MAX_REFERENCE_DEPTH (optional, default: 10)
    /// - FETCH_TIMEOUT (optional, seconds, default: 30)
    /// - ADMISSION_RETRIES / ADMISSION_BACKOFF_MS (optional, default: 3 / 500)
    /// - REPORT_RETRIES / REPORT_BACKOFF_MS (optional, default: 3 / 500)
    /// - GITHUB_TOKEN / GITLAB_TOKEN / BITBUCKET_TOKEN (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let cluster_api_url = std::env::var("CLUSTER_API_URL")
            .map_err(|_| anyhow::anyhow!("CLUSTER_API_URL environment variable not set"))?;

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let namespace = std::env::var("WATCH_NAMESPACE").ok().filter(|s| !s.is_empty());

        let watch_interval = env_secs("WATCH_INTERVAL", 5);
        let pipeline_dir =
            std::env::var("PIPELINE_DIR").unwrap_or_else(|_| ".pipelines".to_string());

        let max_reference_depth = std::env::var("MAX_REFERENCE_DEPTH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(10);

        let fetch_timeout = env_secs("FETCH_TIMEOUT", 30);

        let admission_retries = env_u32("ADMISSION_RETRIES", 3);
        let admission_backoff = env_millis("ADMISSION_BACKOFF_MS", 500);
        let report_retries = env_u32("REPORT_RETRIES", 3);
        let report_backoff = env_millis("REPORT_BACKOFF_MS", 500);

        Ok(Self {
            bind_addr,
            namespace,
            cluster_api_url,
            watch_interval,
            pipeline_dir,
            max_reference_depth,
            fetch_timeout,
            admission_retries,
            admission_backoff,
            report_retries,
            report_backoff,
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            gitlab_token: std::env::var("GITLAB_TOKEN").ok(),
            bitbucket_token: std::env::var("BITBUCKET_TOKEN").ok(),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.cluster_api_url.starts_with("http://")
            && !self.cluster_api_url.starts_with("https://")
        {
            anyhow::bail!("cluster_api_url must start with http:// or https://");
        }

        if self.pipeline_dir.is_empty() {
            anyhow::bail!("pipeline_dir cannot be empty");
        }

        if self.max_reference_depth == 0 {
            anyhow::bail!("max_reference_depth must be greater than 0");
        }

        if self.admission_retries == 0 || self.report_retries == 0 {
            anyhow::bail!("retry counts must be greater than 0");
        }

        if self.fetch_timeout.as_secs() == 0 {
            anyhow::bail!("fetch_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            namespace: None,
            cluster_api_url: "http://localhost:9090".to_string(),
            watch_interval: Duration::from_secs(5),
            pipeline_dir: ".pipelines".to_string(),
            max_reference_depth: 10,
            fetch_timeout: Duration::from_secs(30),
            admission_retries: 3,
            admission_backoff: Duration::from_millis(500),
            report_retries: 3,
            report_backoff: Duration::from_millis(500),
            github_token: None,
            gitlab_token: None,
            bitbucket_token: None,
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default))
}

fn env_millis(name: &str, default: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default))
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}
