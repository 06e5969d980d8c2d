//! Sluice Providers
//!
//! The provider capability abstraction: one trait hiding the differences
//! between VCS backends, with one implementation per backend. No other
//! crate performs network calls to a VCS API; adding a provider means
//! implementing [`Provider`] here and nothing else.
//!
//! Implementations:
//! - GitHub (cloud and enterprise hosts)
//! - GitLab
//! - Bitbucket Cloud
//! - Incoming (manual triggers that carry no parseable payload)

pub mod bitbucket;
pub mod error;
pub mod github;
pub mod gitlab;
pub mod incoming;

pub use error::{ProviderError, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Span;

use sluice_core::domain::event::Event;
use sluice_core::domain::status::Status;

/// One inbound webhook delivery, as handed over by the transport layer
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl WebhookRequest {
    pub fn new(headers: HashMap<String, String>, body: String) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// Capability set over a VCS backend
///
/// `parse_payload` must be side-effect-free except for logging.
/// `report_status` must be idempotent under retry: re-publishing the same
/// status is a no-op from the provider's perspective.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name, used in logs and status contexts
    fn name(&self) -> &'static str;

    /// Validates and normalizes a delivery into an [`Event`]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event>;

    /// Rebinds the contextual span used by subsequent provider calls
    fn set_logger(&self, span: Span);

    /// Returns a copy of this provider bound to repository-scoped
    /// credentials, used for the remainder of one delivery's calls
    fn with_credentials(&self, token: &str) -> Arc<dyn Provider>;

    /// Publishes a commit/check status for the event's SHA
    async fn report_status(&self, event: &Event, status: Status, description: &str) -> Result<()>;

    /// Fetches one file from the repository at the event's SHA
    async fn get_file(&self, event: &Event, path: &str) -> Result<String>;

    /// Lists the config directory at the event's SHA, returning
    /// `(file name, file content)` pairs for every YAML file in it
    async fn get_config_files(&self, event: &Event, dir: &str) -> Result<Vec<(String, String)>>;
}

/// Identifies the backend a delivery came from, by its signature header
pub fn detect(request: &WebhookRequest) -> Option<&'static str> {
    if request.header("x-github-event").is_some() {
        return Some("github");
    }
    if request.header("x-gitlab-event").is_some() {
        return Some("gitlab");
    }
    if request.header("x-event-key").is_some() {
        return Some("bitbucket");
    }
    None
}

/// HTTP client with a bounded request deadline, so a stalled VCS API
/// can never hang event processing.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Splits a repository URL into its last two path segments (owner, repo)
pub(crate) fn split_slug(url: &str) -> Result<(String, String)> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let mut segments = trimmed.rsplit('/');
    let repo = segments.next().filter(|s| !s.is_empty());
    let owner = segments.next().filter(|s| !s.is_empty() && !s.contains(':'));
    match (owner, repo) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(ProviderError::Payload(format!(
            "cannot derive owner/repo from url {}",
            url
        ))),
    }
}
