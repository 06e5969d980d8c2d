//! Shared test fakes
//!
//! In-memory stand-ins for the provider and cluster capabilities, used
//! by the controller, resolver, sink, and reporter tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::Span;

use sluice_core::domain::event::{Event, EventType};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::repository::{Repository, RepositorySettings, SecretRef};
use sluice_core::domain::run::Run;
use sluice_core::domain::status::Status;
use sluice_providers::error::ProviderError;
use sluice_providers::{Provider, WebhookRequest};

use crate::cluster::{ClusterCapability, RunUpdate};

pub fn push_event(sha: &str, branch: &str) -> Event {
    let mut event = Event::new(EventType::Push);
    event.sha = sha.to_string();
    event.url = "https://forge.example.com/acme/website".to_string();
    event.source_branch = branch.to_string();
    event.target_branch = branch.to_string();
    event
}

pub fn repository(name: &str, url: &str) -> Repository {
    Repository {
        name: name.to_string(),
        namespace: "ci".to_string(),
        url: url.to_string(),
        concurrency_limit: None,
        secret_ref: None,
        settings: RepositorySettings::default(),
    }
}

/// Provider fake: parses a preset event, serves preset config files,
/// and records every status report and credential scoping. The recorded
/// state is shared across clones, so a credentialed copy handed out by
/// `with_credentials` reports into the same ledger.
#[derive(Clone)]
pub struct FakeProvider {
    parse_event: Option<Event>,
    config_files: Vec<(String, String)>,
    parse_calls: Arc<AtomicUsize>,
    reports: Arc<Mutex<Vec<(String, Status)>>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            parse_event: None,
            config_files: Vec::new(),
            parse_calls: Arc::new(AtomicUsize::new(0)),
            reports: Arc::new(Mutex::new(Vec::new())),
            tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_parse_event(mut self, event: Event) -> Self {
        self.parse_event = Some(event);
        self
    }

    pub fn with_config_files(mut self, files: Vec<(&str, &str)>) -> Self {
        self.config_files = files
            .into_iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect();
        self
    }

    pub fn parse_calls(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    /// Recorded `(event sha, status)` pairs, in publish order
    pub fn reports(&self) -> Vec<(String, Status)> {
        self.reports.lock().unwrap().clone()
    }

    /// Tokens handed to `with_credentials`, in call order
    pub fn credentials(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn parse_payload(&self, _request: &WebhookRequest) -> sluice_providers::Result<Event> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        self.parse_event
            .clone()
            .ok_or_else(|| ProviderError::Payload("fake provider has no event".to_string()))
    }

    fn set_logger(&self, _span: Span) {}

    fn with_credentials(&self, token: &str) -> Arc<dyn Provider> {
        self.tokens.lock().unwrap().push(token.to_string());
        Arc::new(self.clone())
    }

    async fn report_status(
        &self,
        event: &Event,
        status: Status,
        _description: &str,
    ) -> sluice_providers::Result<()> {
        self.reports.lock().unwrap().push((event.sha.clone(), status));
        Ok(())
    }

    async fn get_file(&self, _event: &Event, path: &str) -> sluice_providers::Result<String> {
        self.config_files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| ProviderError::FileNotFound(path.to_string()))
    }

    async fn get_config_files(
        &self,
        _event: &Event,
        _dir: &str,
    ) -> sluice_providers::Result<Vec<(String, String)>> {
        Ok(self.config_files.clone())
    }
}

/// Cluster fake: records created and cancelled runs, can fail the next
/// N create calls, and exposes the watch channel's sender.
pub struct FakeCluster {
    repositories: Vec<Repository>,
    created: Mutex<Vec<Run>>,
    cancelled: Mutex<Vec<String>>,
    fail_creates: AtomicU32,
    fail_listings: AtomicU32,
    watch_tx: Mutex<Option<mpsc::Sender<RunUpdate>>>,
}

impl FakeCluster {
    pub fn new(repositories: Vec<Repository>) -> Self {
        Self {
            repositories,
            created: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_creates: AtomicU32::new(0),
            fail_listings: AtomicU32::new(0),
            watch_tx: Mutex::new(None),
        }
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_listings(&self, count: u32) {
        self.fail_listings.store(count, Ordering::SeqCst);
    }

    pub fn created_runs(&self) -> Vec<Run> {
        self.created.lock().unwrap().clone()
    }

    pub fn cancelled_runs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Sender for the channel handed out by `watch_runs`
    pub fn watch_sender(&self) -> Option<mpsc::Sender<RunUpdate>> {
        self.watch_tx.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterCapability for FakeCluster {
    async fn list_repositories(&self, namespace: Option<&str>) -> anyhow::Result<Vec<Repository>> {
        let remaining = self.fail_listings.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_listings.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("injected listing failure");
        }
        Ok(self
            .repositories
            .iter()
            .filter(|repo| namespace.is_none_or(|ns| repo.namespace == ns))
            .cloned()
            .collect())
    }

    async fn create_run(&self, run: &Run, _definition: &PipelineDefinition) -> anyhow::Result<()> {
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            }
            anyhow::bail!("injected create failure");
        }
        self.created.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn cancel_run(&self, _namespace: &str, run_name: &str) -> anyhow::Result<()> {
        self.cancelled.lock().unwrap().push(run_name.to_string());
        Ok(())
    }

    async fn get_secret(&self, _namespace: &str, _secret: &SecretRef) -> anyhow::Result<String> {
        Ok("secret".to_string())
    }

    async fn watch_runs(&self) -> anyhow::Result<mpsc::Receiver<RunUpdate>> {
        let (tx, rx) = mpsc::channel(16);
        *self.watch_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}
