//! GitLab provider
//!
//! Parses Push, Merge Request, and Note hooks and reports commit statuses
//! through the v4 REST API. Self-hosted instances work out of the box
//! because the API base is derived from the event's repository URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::RwLock;
use tracing::{Span, debug};

use sluice_core::domain::event::{Event, EventType};
use sluice_core::domain::status::Status;

use crate::error::{ProviderError, Result};
use crate::{Provider, WebhookRequest};

/// Provider implementation for GitLab
pub struct GitlabProvider {
    client: Client,
    token: Option<String>,
    span: RwLock<Span>,
}

impl GitlabProvider {
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
            builder = builder.header("PRIVATE-TOKEN", token);
        }
        builder
    }

    fn parse_push(&self, body: &str) -> Result<Event> {
        let payload: PushHook = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("push hook: {}", e)))?;
        let branch = payload
            .r#ref
            .strip_prefix("refs/heads/")
            .ok_or_else(|| ProviderError::UnsupportedEvent(format!("non-branch ref {}", payload.r#ref)))?;

        let mut event = Event::new(EventType::Push);
        event.sha = payload.after;
        event.url = payload.project.web_url;
        event.source_branch = branch.to_string();
        event.target_branch = branch.to_string();
        event.provider_url = api_base(&event.url)?;
        Ok(event)
    }

    fn parse_merge_request(&self, body: &str) -> Result<Event> {
        let payload: MergeRequestHook = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("merge request hook: {}", e)))?;
        let attrs = payload.object_attributes;
        let event_type = match attrs.action.as_deref() {
            Some("open") | Some("reopen") => EventType::PullRequestOpened,
            Some("update") => EventType::PullRequestUpdated,
            other => {
                return Err(ProviderError::UnsupportedEvent(format!(
                    "merge request action {:?}",
                    other
                )));
            }
        };

        let mut event = Event::new(event_type);
        event.sha = attrs.last_commit.id;
        event.url = payload.project.web_url;
        event.source_branch = attrs.source_branch;
        event.target_branch = attrs.target_branch;
        event.pull_request_number = Some(attrs.iid);
        event.provider_url = api_base(&event.url)?;
        Ok(event)
    }

    fn parse_note(&self, body: &str) -> Result<Event> {
        let payload: NoteHook = serde_json::from_str(body)
            .map_err(|e| ProviderError::Payload(format!("note hook: {}", e)))?;
        let merge_request = payload.merge_request.ok_or_else(|| {
            ProviderError::UnsupportedEvent("note outside a merge request".to_string())
        })?;

        let mut event = Event::new(EventType::Comment);
        event.sha = merge_request.last_commit.id;
        event.url = payload.project.web_url;
        event.source_branch = merge_request.source_branch;
        event.target_branch = merge_request.target_branch;
        event.pull_request_number = Some(merge_request.iid);
        event.trigger_comment = Some(payload.object_attributes.note);
        event.provider_url = api_base(&event.url)?;
        Ok(event)
    }
}

impl Default for GitlabProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GitlabProvider {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event> {
        let kind = request
            .header("x-gitlab-event")
            .ok_or_else(|| ProviderError::Payload("missing x-gitlab-event header".to_string()))?;

        match kind {
            "Push Hook" => self.parse_push(&request.body),
            "Merge Request Hook" => self.parse_merge_request(&request.body),
            "Note Hook" => self.parse_note(&request.body),
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
        let url = format!(
            "{}/projects/{}/statuses/{}",
            api_base(&event.url)?,
            encoded_project_path(&event.url)?,
            event.sha
        );
        let body = serde_json::json!({
            "state": state_for(status),
            "description": description,
            "name": "sluice",
        });

        debug!(parent: &self.log_span(), status = %status, "publishing gitlab commit status");

        let response = self.request(reqwest::Method::POST, &url).json(&body).send().await?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderError::Report { status: code, message });
        }
        Ok(())
    }

    async fn get_file(&self, event: &Event, path: &str) -> Result<String> {
        let encoded_path = path.replace('/', "%2F");
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw?ref={}",
            api_base(&event.url)?,
            encoded_project_path(&event.url)?,
            encoded_path,
            event.sha
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
        let url = format!(
            "{}/projects/{}/repository/tree?path={}&ref={}",
            api_base(&event.url)?,
            encoded_project_path(&event.url)?,
            dir,
            event.sha
        );

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let entries: Vec<TreeEntry> = response.json().await?;

        let mut files = Vec::new();
        for entry in entries.into_iter().filter(is_pipeline_blob) {
            let content = self.get_file(event, &entry.path).await?;
            files.push((entry.name, content));
        }
        Ok(files)
    }
}

/// GitLab commit-status state for an outward status
fn state_for(status: Status) -> &'static str {
    match status {
        Status::Neutral => "pending",
        Status::Cancelled => "canceled",
        Status::Failure => "failed",
        Status::Success => "success",
    }
}

/// v4 API base derived from the repository's web URL
fn api_base(repo_url: &str) -> Result<String> {
    let (scheme, rest) = repo_url
        .split_once("://")
        .ok_or_else(|| ProviderError::Payload(format!("malformed repository url {}", repo_url)))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(ProviderError::Payload(format!(
            "malformed repository url {}",
            repo_url
        )));
    }
    Ok(format!("{}://{}/api/v4", scheme, host))
}

/// Selects YAML blobs out of a repository tree listing
fn is_pipeline_blob(entry: &TreeEntry) -> bool {
    entry.r#type == "blob" && (entry.name.ends_with(".yaml") || entry.name.ends_with(".yml"))
}

/// URL-encoded `group/project` path for the projects API
fn encoded_project_path(repo_url: &str) -> Result<String> {
    let rest = repo_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| ProviderError::Payload(format!("malformed repository url {}", repo_url)))?;
    let path = rest
        .split_once('/')
        .map(|(_, path)| path.trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ProviderError::Payload(format!("repository url has no path: {}", repo_url)))?;
    Ok(path.replace('/', "%2F"))
}

// =============================================================================
// Payload shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct ProjectFragment {
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct PushHook {
    r#ref: String,
    after: String,
    project: ProjectFragment,
}

#[derive(Debug, Deserialize)]
struct CommitFragment {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestAttrs {
    iid: u64,
    action: Option<String>,
    source_branch: String,
    target_branch: String,
    last_commit: CommitFragment,
}

#[derive(Debug, Deserialize)]
struct MergeRequestHook {
    project: ProjectFragment,
    object_attributes: MergeRequestAttrs,
}

#[derive(Debug, Deserialize)]
struct NoteAttrs {
    note: String,
}

#[derive(Debug, Deserialize)]
struct NoteMergeRequest {
    iid: u64,
    source_branch: String,
    target_branch: String,
    last_commit: CommitFragment,
}

#[derive(Debug, Deserialize)]
struct NoteHook {
    project: ProjectFragment,
    object_attributes: NoteAttrs,
    merge_request: Option<NoteMergeRequest>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
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
        headers.insert("x-gitlab-event".to_string(), event.to_string());
        WebhookRequest::new(headers, body.to_string())
    }

    #[tokio::test]
    async fn test_parse_push_hook() {
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "project": {"web_url": "https://gitlab.example.com/acme/website"}
        });
        let event = GitlabProvider::new()
            .parse_payload(&request("Push Hook", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::Push);
        assert_eq!(event.sha, "abc123");
        assert_eq!(event.target_branch, "main");
        assert_eq!(event.provider_url, "https://gitlab.example.com/api/v4");
    }

    #[tokio::test]
    async fn test_parse_merge_request_hook() {
        let body = serde_json::json!({
            "project": {"web_url": "https://gitlab.example.com/acme/website"},
            "object_attributes": {
                "iid": 9,
                "action": "open",
                "source_branch": "feature",
                "target_branch": "main",
                "last_commit": {"id": "def456"}
            }
        });
        let event = GitlabProvider::new()
            .parse_payload(&request("Merge Request Hook", body))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::PullRequestOpened);
        assert_eq!(event.pull_request_number, Some(9));
        assert_eq!(event.sha, "def456");
    }

    #[tokio::test]
    async fn test_note_outside_merge_request_is_unsupported() {
        let body = serde_json::json!({
            "project": {"web_url": "https://gitlab.example.com/acme/website"},
            "object_attributes": {"note": "/retest"}
        });
        let err = GitlabProvider::new()
            .parse_payload(&request("Note Hook", body))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedEvent(_)));
    }

    #[test]
    fn test_encoded_project_path() {
        assert_eq!(
            encoded_project_path("https://gitlab.example.com/acme/sub/website").unwrap(),
            "acme%2Fsub%2Fwebsite"
        );
        assert!(encoded_project_path("https://gitlab.example.com").is_err());
    }

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(state_for(Status::Neutral), "pending");
        assert_eq!(state_for(Status::Cancelled), "canceled");
        assert_eq!(state_for(Status::Failure), "failed");
        assert_eq!(state_for(Status::Success), "success");
    }

    #[test]
    fn test_tree_listing_keeps_only_yaml_blobs() {
        let entries: Vec<TreeEntry> = serde_json::from_value(serde_json::json!([
            {"name": "build.yaml", "path": ".pipelines/build.yaml", "type": "blob"},
            {"name": "deploy.yml", "path": ".pipelines/deploy.yml", "type": "blob"},
            {"name": "README.md", "path": ".pipelines/README.md", "type": "blob"},
            {"name": "tasks", "path": ".pipelines/tasks", "type": "tree"}
        ]))
        .unwrap();

        let names: Vec<&str> = entries
            .iter()
            .filter(|e| is_pipeline_blob(e))
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["build.yaml", "deploy.yml"]);
    }
}
