//! Cluster capability
//!
//! The narrow surface the orchestrator needs from the execution
//! substrate: read registered repositories, create/cancel run objects,
//! read secret material, and watch run condition updates. Everything
//! else about the substrate is out of scope.
//!
//! The shipped implementation talks HTTP to a cluster gateway; the
//! watch side polls on an interval and forwards updates over a channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::repository::{Repository, SecretRef};
use sluice_core::domain::run::{Run, RunCondition};

/// One observed change to a run's recorded condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunUpdate {
    pub run_name: String,
    /// Repository key (`namespace/name`) the run belongs to
    pub repository: String,
    pub condition: Option<RunCondition>,
}

/// Operations the orchestrator performs against the execution substrate
#[async_trait]
pub trait ClusterCapability: Send + Sync {
    /// Lists registered repositories, optionally scoped to one namespace
    async fn list_repositories(&self, namespace: Option<&str>) -> Result<Vec<Repository>>;

    /// Creates a run object carrying the resolved definition
    async fn create_run(&self, run: &Run, definition: &PipelineDefinition) -> Result<()>;

    /// Requests cancellation of an active run
    async fn cancel_run(&self, namespace: &str, run_name: &str) -> Result<()>;

    /// Reads secret material referenced by a repository
    async fn get_secret(&self, namespace: &str, secret: &SecretRef) -> Result<String>;

    /// Starts watching run condition updates
    async fn watch_runs(&self) -> Result<mpsc::Receiver<RunUpdate>>;
}

/// HTTP-backed cluster capability
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    base_url: String,
    client: Client,
    watch_interval: Duration,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>, watch_interval: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            watch_interval,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    run: &'a Run,
    definition: &'a PipelineDefinition,
}

#[async_trait]
impl ClusterCapability for HttpClusterClient {
    async fn list_repositories(&self, namespace: Option<&str>) -> Result<Vec<Repository>> {
        let mut url = format!("{}/repositories", self.base_url);
        if let Some(namespace) = namespace {
            url.push_str(&format!("?namespace={}", namespace));
        }
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to list repositories")?
            .error_for_status()
            .context("repository listing rejected")?;
        Ok(response.json().await.context("invalid repository listing")?)
    }

    async fn create_run(&self, run: &Run, definition: &PipelineDefinition) -> Result<()> {
        let url = format!("{}/runs", self.base_url);
        self.client
            .post(&url)
            .json(&CreateRunRequest { run, definition })
            .send()
            .await
            .context("failed to create run")?
            .error_for_status()
            .context("run creation rejected")?;
        Ok(())
    }

    async fn cancel_run(&self, namespace: &str, run_name: &str) -> Result<()> {
        let url = format!("{}/runs/{}/{}/cancel", self.base_url, namespace, run_name);
        self.client
            .post(&url)
            .send()
            .await
            .context("failed to cancel run")?
            .error_for_status()
            .context("run cancellation rejected")?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, secret: &SecretRef) -> Result<String> {
        let url = format!(
            "{}/namespaces/{}/secrets/{}/{}",
            self.base_url, namespace, secret.name, secret.key
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to read secret")?
            .error_for_status()
            .context("secret read rejected")?;
        Ok(response.text().await.context("invalid secret response")?)
    }

    async fn watch_runs(&self) -> Result<mpsc::Receiver<RunUpdate>> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let url = format!("{}/runs/updates", self.base_url);
        let interval = self.watch_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let updates: Vec<RunUpdate> = match client.get(&url).send().await {
                    Ok(response) => match response.error_for_status() {
                        Ok(response) => match response.json().await {
                            Ok(updates) => updates,
                            Err(e) => {
                                error!("invalid run update payload: {}", e);
                                continue;
                            }
                        },
                        Err(e) => {
                            error!("run update poll rejected: {}", e);
                            continue;
                        }
                    },
                    Err(e) => {
                        error!("run update poll failed: {}", e);
                        continue;
                    }
                };

                if updates.is_empty() {
                    debug!("no run updates this cycle");
                }
                for update in updates {
                    if tx.send(update).await.is_err() {
                        // Receiver dropped, watcher shuts down
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
