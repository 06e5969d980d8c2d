//! Bitbucket Cloud provider
//!
//! Parses repo:push and pullrequest:* deliveries and reports build
//! statuses through the 2.0 API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::RwLock;
use tracing::{Span, debug};

use sluice_core::domain::event::{Event, EventType};
use sluice_core::domain::status::Status;

use crate::error::{ProviderError, Result};
use crate::{Provider, WebhookRequest, split_slug};

const API_BASE: &str = "https://api.bitbucket.org/2.0";

/// Provider implementation for Bitbucket Cloud
pub struct BitbucketProvider {
    client: Client,
    token: Option<String>,
    span: RwLock<Span>,
}

impl BitbucketProvider {
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

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn parse_push(&self, body: &str) -> Result<Event> {
        let payload: PushPayload = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("repo:push payload: {}", e)))?;
        let change = payload
            .push
            .changes
            .into_iter()
            .find_map(|c| c.new)
            .ok_or_else(|| ProviderError::UnsupportedEvent("push without a new head".to_string()))?;
        if change.r#type != "branch" {
            return Err(ProviderError::UnsupportedEvent(format!(
                "push to a {}",
                change.r#type
            )));
        }

        let mut event = Event::new(EventType::Push);
        event.sha = change.target.hash;
        event.url = payload.repository.links.html.href;
        event.source_branch = change.name.clone();
        event.target_branch = change.name;
        event.provider_url = API_BASE.to_string();
        Ok(event)
    }

    fn parse_pull_request(&self, kind: &str, body: &str) -> Result<Event> {
        let payload: PullRequestPayload = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("{} payload: {}", kind, e)))?;
        let event_type = match kind {
            "pullrequest:created" => EventType::PullRequestOpened,
            "pullrequest:updated" => EventType::PullRequestUpdated,
            "pullrequest:comment_created" => EventType::Comment,
            other => return Err(ProviderError::UnsupportedEvent(other.to_string())),
        };

        let mut event = Event::new(event_type);
        event.sha = payload.pullrequest.source.commit.hash;
        event.url = payload.repository.links.html.href;
        event.source_branch = payload.pullrequest.source.branch.name;
        event.target_branch = payload.pullrequest.destination.branch.name;
        event.pull_request_number = Some(payload.pullrequest.id);
        event.trigger_comment = payload.comment.map(|c| c.content.raw);
        event.provider_url = API_BASE.to_string();
        Ok(event)
    }
}

impl Default for BitbucketProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for BitbucketProvider {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event> {
        let kind = request
            .header("x-event-key")
            .ok_or_else(|| ProviderError::Payload("missing x-event-key header".to_string()))?;

        match kind {
            "repo:push" => self.parse_push(&request.body),
            "pullrequest:created" | "pullrequest:updated" | "pullrequest:comment_created" => {
                self.parse_pull_request(kind, &request.body)
            }
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
        let (workspace, slug) = split_slug(&event.url)?;
        let url = format!(
            "{}/repositories/{}/{}/commit/{}/statuses/build",
            API_BASE, workspace, slug, event.sha
        );
        let body = serde_json::json!({
            "state": state_for(status),
            "key": "sluice",
            "description": description,
        });

        debug!(parent: &self.log_span(), status = %status, "publishing bitbucket build status");

        let response = self.request(reqwest::Method::POST, &url).json(&body).send().await?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderError::Report { status: code, message });
        }
        Ok(())
    }

    async fn get_file(&self, event: &Event, path: &str) -> Result<String> {
        let (workspace, slug) = split_slug(&event.url)?;
        let url = format!(
            "{}/repositories/{}/{}/src/{}/{}",
            API_BASE, workspace, slug, event.sha, path
        );

        let response = self.request(reqwest::Method::GET, &url).send().await?;
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
        let (workspace, slug) = split_slug(&event.url)?;
        let url = format!(
            "{}/repositories/{}/{}/src/{}/{}?pagelen=100",
            API_BASE, workspace, slug, event.sha, dir
        );

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let listing: SrcListing = response.json().await?;

        let mut files = Vec::new();
        for entry in listing.values {
            if entry.r#type != "commit_file" {
                continue;
            }
            if !(entry.path.ends_with(".yaml") || entry.path.ends_with(".yml")) {
                continue;
            }
            let content = self.get_file(event, &entry.path).await?;
            let name = entry
                .path
                .rsplit('/')
                .next()
                .unwrap_or(entry.path.as_str())
                .to_string();
            files.push((name, content));
        }
        Ok(files)
    }
}

/// Bitbucket build-status state for an outward status
fn state_for(status: Status) -> &'static str {
    match status {
        Status::Neutral => "INPROGRESS",
        Status::Cancelled => "STOPPED",
        Status::Failure => "FAILED",
        Status::Success => "SUCCESSFUL",
    }
}

// =============================================================================
// Payload shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct HtmlLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Links {
    html: HtmlLink,
}

#[derive(Debug, Deserialize)]
struct RepositoryFragment {
    links: Links,
}

#[derive(Debug, Deserialize)]
struct TargetFragment {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct ChangeHead {
    name: String,
    r#type: String,
    target: TargetFragment,
}

#[derive(Debug, Deserialize)]
struct Change {
    new: Option<ChangeHead>,
}

#[derive(Debug, Deserialize)]
struct PushFragment {
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    push: PushFragment,
    repository: RepositoryFragment,
}

#[derive(Debug, Deserialize)]
struct BranchFragment {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitRef {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct EndpointFragment {
    branch: BranchFragment,
    #[serde(default)]
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestFragment {
    id: u64,
    source: EndpointFragment,
    destination: EndpointFragment,
}

#[derive(Debug, Deserialize)]
struct CommentContent {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct CommentFragment {
    content: CommentContent,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pullrequest: PullRequestFragment,
    repository: RepositoryFragment,
    comment: Option<CommentFragment>,
}

#[derive(Debug, Deserialize)]
struct SrcEntry {
    path: String,
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct SrcListing {
    values: Vec<SrcEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(key: &str, body: serde_json::Value) -> WebhookRequest {
        let mut headers = HashMap::new();
        headers.insert("x-event-key".to_string(), key.to_string());
        WebhookRequest::new(headers, body.to_string())
    }

    #[tokio::test]
    async fn test_parse_repo_push() {
        let body = serde_json::json!({
            "push": {"changes": [{"new": {
                "name": "main",
                "type": "branch",
                "target": {"hash": "abc123"}
            }}]},
            "repository": {"links": {"html": {"href": "https://bitbucket.org/acme/website"}}}
        });
        let event = BitbucketProvider::new()
            .parse_payload(&request("repo:push", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::Push);
        assert_eq!(event.sha, "abc123");
        assert_eq!(event.target_branch, "main");
    }

    #[tokio::test]
    async fn test_parse_pull_request_comment() {
        let body = serde_json::json!({
            "pullrequest": {
                "id": 3,
                "source": {"branch": {"name": "feature"}, "commit": {"hash": "def456"}},
                "destination": {"branch": {"name": "main"}}
            },
            "repository": {"links": {"html": {"href": "https://bitbucket.org/acme/website"}}},
            "comment": {"content": {"raw": "/retest"}}
        });
        let event = BitbucketProvider::new()
            .parse_payload(&request("pullrequest:comment_created", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::Comment);
        assert_eq!(event.pull_request_number, Some(3));
        assert_eq!(event.trigger_comment.as_deref(), Some("/retest"));
    }

    #[tokio::test]
    async fn test_tag_push_is_unsupported() {
        let body = serde_json::json!({
            "push": {"changes": [{"new": {
                "name": "v1.0",
                "type": "tag",
                "target": {"hash": "abc123"}
            }}]},
            "repository": {"links": {"html": {"href": "https://bitbucket.org/acme/website"}}}
        });
        let err = BitbucketProvider::new()
            .parse_payload(&request("repo:push", body))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedEvent(_)));
    }

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(state_for(Status::Neutral), "INPROGRESS");
        assert_eq!(state_for(Status::Cancelled), "STOPPED");
        assert_eq!(state_for(Status::Failure), "FAILED");
        assert_eq!(state_for(Status::Success), "SUCCESSFUL");
    }
}
