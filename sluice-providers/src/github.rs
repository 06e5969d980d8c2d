//! GitHub provider
//!
//! Parses push, pull_request, and issue_comment deliveries and reports
//! commit statuses through the REST API. Enterprise hosts are supported
//! through the event's enterprise URL override.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::RwLock;
use tracing::{Span, debug};

use sluice_core::domain::event::{Event, EventType};
use sluice_core::domain::status::Status;

use crate::error::{ProviderError, Result};
use crate::{Provider, WebhookRequest, split_slug};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Provider implementation for GitHub (cloud and enterprise)
pub struct GithubProvider {
    client: Client,
    token: Option<String>,
    span: RwLock<Span>,
}

impl GithubProvider {
    pub fn new() -> Self {
        Self {
            client: crate::http_client(),
            token: None,
            span: RwLock::new(Span::none()),
        }
    }

    /// Attaches an API token used for status reports and file fetches
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn log_span(&self) -> Span {
        self.span.read().expect("span lock poisoned").clone()
    }

    /// API base for an event, honoring the enterprise host override
    fn api_base(&self, event: &Event) -> String {
        match &event.enterprise_url {
            Some(host) if host.starts_with("http") => format!("{}/api/v3", host.trim_end_matches('/')),
            Some(host) => format!("https://{}/api/v3", host),
            None => DEFAULT_API_BASE.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("User-Agent", "sluice");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn parse_push(&self, body: &str) -> Result<Event> {
        let payload: PushPayload = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("push payload: {}", e)))?;
        let branch = payload
            .r#ref
            .strip_prefix("refs/heads/")
            .ok_or_else(|| ProviderError::UnsupportedEvent(format!("non-branch ref {}", payload.r#ref)))?;

        let mut event = Event::new(EventType::Push);
        event.sha = payload.after;
        event.url = payload.repository.html_url;
        event.source_branch = branch.to_string();
        event.target_branch = branch.to_string();
        event.provider_url = DEFAULT_API_BASE.to_string();
        Ok(event)
    }

    fn parse_pull_request(&self, body: &str) -> Result<Event> {
        let payload: PullRequestPayload = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("pull_request payload: {}", e)))?;
        let event_type = match payload.action.as_str() {
            "opened" | "reopened" => EventType::PullRequestOpened,
            "synchronize" => EventType::PullRequestUpdated,
            other => {
                return Err(ProviderError::UnsupportedEvent(format!(
                    "pull_request action {}",
                    other
                )));
            }
        };

        let mut event = Event::new(event_type);
        event.sha = payload.pull_request.head.sha;
        event.url = payload.repository.html_url;
        event.source_branch = payload.pull_request.head.r#ref;
        event.target_branch = payload.pull_request.base.r#ref;
        event.pull_request_number = Some(payload.number);
        event.provider_url = DEFAULT_API_BASE.to_string();
        Ok(event)
    }

    async fn parse_comment(&self, body: &str) -> Result<Event> {
        let payload: IssueCommentPayload = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("issue_comment payload: {}", e)))?;
        if payload.action != "created" {
            return Err(ProviderError::UnsupportedEvent(format!(
                "issue_comment action {}",
                payload.action
            )));
        }
        let Some(pull) = payload.issue.pull_request else {
            return Err(ProviderError::UnsupportedEvent(
                "comment on a plain issue".to_string(),
            ));
        };

        let mut event = Event::new(EventType::Comment);
        event.url = payload.repository.html_url;
        event.pull_request_number = Some(payload.issue.number);
        event.trigger_comment = Some(payload.comment.body);
        event.provider_url = DEFAULT_API_BASE.to_string();

        // The comment hook carries no head commit; fetch the pull
        // request so trigger matching and status reports have a target.
        let response = self.request(reqwest::Method::GET, &pull.url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Payload(format!(
                "cannot fetch pull request {}: status {}",
                pull.url,
                response.status().as_u16()
            )));
        }
        let fragment: PullRequestFragment = response.json().await?;
        apply_pull_request(&mut event, fragment);
        Ok(event)
    }
}

impl Default for GithubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event> {
        let kind = request
            .header("x-github-event")
            .ok_or_else(|| ProviderError::Payload("missing x-github-event header".to_string()))?;

        match kind {
            "push" => self.parse_push(&request.body),
            "pull_request" => self.parse_pull_request(&request.body),
            "issue_comment" => self.parse_comment(&request.body).await,
            other => Err(ProviderError::UnsupportedEvent(other.to_string())),
        }
    }

    fn set_logger(&self, span: Span) {
        *self.span.write().expect("span lock poisoned") = span;
    }

    fn with_credentials(&self, token: &str) -> std::sync::Arc<dyn Provider> {
        std::sync::Arc::new(Self {
            client: self.client.clone(),
            token: Some(token.to_string()),
            span: RwLock::new(self.log_span()),
        })
    }

    async fn report_status(&self, event: &Event, status: Status, description: &str) -> Result<()> {
        if event.sha.is_empty() {
            return Err(ProviderError::Payload(
                "event carries no sha to report against".to_string(),
            ));
        }
        let (owner, repo) = split_slug(&event.url)?;
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_base(event),
            owner,
            repo,
            event.sha
        );
        let body = serde_json::json!({
            "state": state_for(status),
            "description": description,
            "context": "sluice",
        });

        debug!(parent: &self.log_span(), status = %status, "publishing github commit status");

        let response = self.request(reqwest::Method::POST, &url).json(&body).send().await?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderError::Report { status: code, message });
        }
        Ok(())
    }

    async fn get_file(&self, event: &Event, path: &str) -> Result<String> {
        let (owner, repo) = split_slug(&event.url)?;
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base(event),
            owner,
            repo,
            path,
            event.sha
        );

        let response = self
            .request(reqwest::Method::GET, &url)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Err(ProviderError::FileNotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderError::Report { status: code, message });
        }
        Ok(response.text().await?)
    }

    async fn get_config_files(&self, event: &Event, dir: &str) -> Result<Vec<(String, String)>> {
        let (owner, repo) = split_slug(&event.url)?;
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base(event),
            owner,
            repo,
            dir,
            event.sha
        );

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let entries: Vec<ContentEntry> = response.json().await?;

        let mut files = Vec::new();
        for entry in entries {
            if entry.r#type != "file" {
                continue;
            }
            if !(entry.name.ends_with(".yaml") || entry.name.ends_with(".yml")) {
                continue;
            }
            let content = self.get_file(event, &entry.path).await?;
            files.push((entry.name, content));
        }
        Ok(files)
    }
}

/// Copies a fetched pull request's head and base onto the event
fn apply_pull_request(event: &mut Event, pr: PullRequestFragment) {
    event.sha = pr.head.sha;
    event.source_branch = pr.head.r#ref;
    event.target_branch = pr.base.r#ref;
}

/// GitHub commit-status state for an outward status
fn state_for(status: Status) -> &'static str {
    match status {
        Status::Neutral => "pending",
        Status::Cancelled => "error",
        Status::Failure => "failure",
        Status::Success => "success",
    }
}

// =============================================================================
// Payload shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct RepositoryFragment {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    r#ref: String,
    after: String,
    repository: RepositoryFragment,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    r#ref: String,
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFragment {
    head: BranchRef,
    base: BranchRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequestFragment,
    repository: RepositoryFragment,
}

#[derive(Debug, Deserialize)]
struct CommentFragment {
    body: String,
}

#[derive(Debug, Deserialize)]
struct IssuePullRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct IssueFragment {
    number: u64,
    pull_request: Option<IssuePullRef>,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: String,
    comment: CommentFragment,
    issue: IssueFragment,
    repository: RepositoryFragment,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    r#type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(event: &str, body: serde_json::Value) -> WebhookRequest {
        let mut headers = HashMap::new();
        headers.insert("x-github-event".to_string(), event.to_string());
        WebhookRequest::new(headers, body.to_string())
    }

    #[tokio::test]
    async fn test_parse_push() {
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": {"html_url": "https://github.com/acme/website"}
        });
        let event = GithubProvider::new()
            .parse_payload(&request("push", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::Push);
        assert_eq!(event.sha, "abc123");
        assert_eq!(event.target_branch, "main");
        assert_eq!(event.url, "https://github.com/acme/website");
    }

    #[tokio::test]
    async fn test_parse_pull_request_synchronize() {
        let body = serde_json::json!({
            "action": "synchronize",
            "number": 42,
            "pull_request": {
                "head": {"ref": "feature", "sha": "def456"},
                "base": {"ref": "main"}
            },
            "repository": {"html_url": "https://github.com/acme/website"}
        });
        let event = GithubProvider::new()
            .parse_payload(&request("pull_request", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::PullRequestUpdated);
        assert_eq!(event.sha, "def456");
        assert_eq!(event.source_branch, "feature");
        assert_eq!(event.target_branch, "main");
        assert_eq!(event.pull_request_number, Some(42));
    }

    #[tokio::test]
    async fn test_comment_on_plain_issue_is_unsupported() {
        let body = serde_json::json!({
            "action": "created",
            "comment": {"body": "/retest"},
            "issue": {"number": 7},
            "repository": {"html_url": "https://github.com/acme/website"}
        });
        let err = GithubProvider::new()
            .parse_payload(&request("issue_comment", body))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedEvent(_)));
    }

    #[tokio::test]
    async fn test_tag_push_is_unsupported() {
        let body = serde_json::json!({
            "ref": "refs/tags/v1.0",
            "after": "abc123",
            "repository": {"html_url": "https://github.com/acme/website"}
        });
        let err = GithubProvider::new()
            .parse_payload(&request("push", body))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedEvent(_)));
    }

    #[test]
    fn test_fetched_pull_request_fills_comment_event() {
        let mut event = Event::new(EventType::Comment);
        let fragment: PullRequestFragment = serde_json::from_value(serde_json::json!({
            "head": {"ref": "feature", "sha": "def456"},
            "base": {"ref": "main"}
        }))
        .unwrap();

        apply_pull_request(&mut event, fragment);
        assert_eq!(event.sha, "def456");
        assert_eq!(event.source_branch, "feature");
        assert_eq!(event.target_branch, "main");
    }

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(state_for(Status::Neutral), "pending");
        assert_eq!(state_for(Status::Cancelled), "error");
        assert_eq!(state_for(Status::Failure), "failure");
        assert_eq!(state_for(Status::Success), "success");
    }

    #[test]
    fn test_api_base_honors_enterprise_override() {
        let provider = GithubProvider::new();
        let mut event = Event::new(EventType::Push);
        assert_eq!(provider.api_base(&event), "https://api.github.com");

        event.enterprise_url = Some("ghe.example.com".to_string());
        assert_eq!(provider.api_base(&event), "https://ghe.example.com/api/v3");

        event.enterprise_url = Some("https://ghe.example.com/".to_string());
        assert_eq!(provider.api_base(&event), "https://ghe.example.com/api/v3");
    }
}
