//! Concurrency & run controller
//!
//! Owns the per-repository active/queued run sets. Admission, queueing,
//! supersession, and completion all go through one lock per repository
//! key, so transitions on a repository are serialized while unrelated
//! repositories proceed independently.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use sluice_core::domain::event::Event;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::repository::Repository;
use sluice_core::domain::run::{Run, RunState};
use sluice_core::domain::status::Status;
use sluice_core::error::OrchestrationError;
use sluice_providers::Provider;

use crate::cluster::ClusterCapability;
use crate::config::Config;
use crate::reporter::StatusReporter;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One run together with everything needed to report on it later
pub struct Submission {
    pub run: Run,
    pub definition: PipelineDefinition,
    pub event: Event,
    pub provider: Arc<dyn Provider>,
}

/// Active and queued runs for one repository
struct RepoRuns {
    limit: usize,
    active: Vec<Submission>,
    queue: VecDeque<Submission>,
}

/// Admits, queues, supersedes, and completes runs per repository
pub struct RunController {
    cluster: Arc<dyn ClusterCapability>,
    reporter: Arc<StatusReporter>,
    retries: u32,
    backoff: Duration,
    repos: Mutex<HashMap<String, Arc<AsyncMutex<RepoRuns>>>>,
}

impl RunController {
    pub fn new(
        cluster: Arc<dyn ClusterCapability>,
        reporter: Arc<StatusReporter>,
        config: &Config,
    ) -> Self {
        Self {
            cluster,
            reporter,
            retries: config.admission_retries,
            backoff: config.admission_backoff,
            repos: Mutex::new(HashMap::new()),
        }
    }

    /// Submits one resolved definition for execution.
    ///
    /// Older runs for the same branch/PR are superseded first; the new
    /// run is then admitted if the repository has capacity, otherwise
    /// queued in arrival order.
    pub async fn submit(
        &self,
        repository: &Repository,
        provider: Arc<dyn Provider>,
        event: Event,
        definition: PipelineDefinition,
    ) -> Result<(), OrchestrationError> {
        let state = self.repo_state(repository);
        let mut repo_runs = state.lock().await;

        // Operators may retune the limit between events
        repo_runs.limit = repository.effective_limit();

        self.supersede(&mut repo_runs, &event).await;

        let run = Run::new(&definition.name, &repository.key(), &repository.namespace, &event);
        let submission = Submission {
            run,
            definition,
            event,
            provider,
        };

        if repo_runs.active.len() < repo_runs.limit {
            self.admit(&mut repo_runs, submission).await
        } else {
            info!(
                run = %submission.run.name,
                repository = %repository.key(),
                "repository at concurrency limit, queueing run"
            );
            if let Err(e) = self
                .reporter
                .publish(submission.provider.as_ref(), &submission.event, Status::Neutral)
                .await
            {
                warn!("failed to publish queued status: {}", e);
            }
            repo_runs.queue.push_back(submission);
            Ok(())
        }
    }

    /// Removes a finished run and promotes queued work into the freed
    /// capacity. Returns the finished run's submission so the caller can
    /// report its terminal status.
    pub async fn complete_run(&self, repo_key: &str, run_name: &str) -> Option<Submission> {
        let state = {
            let map = self.repos.lock().expect("controller state lock poisoned");
            map.get(repo_key)?.clone()
        };
        let mut repo_runs = state.lock().await;

        let idx = repo_runs
            .active
            .iter()
            .position(|s| s.run.name == run_name)?;
        let completed = repo_runs.active.remove(idx);

        while repo_runs.active.len() < repo_runs.limit {
            let Some(next) = repo_runs.queue.pop_front() else {
                break;
            };
            let name = next.run.name.clone();
            if let Err(e) = self.admit(&mut repo_runs, next).await {
                // Admission failure of a promoted run is isolated; keep
                // promoting so one bad run cannot wedge the queue.
                warn!(run = %name, "failed to admit queued run: {}", e);
            }
        }

        Some(completed)
    }

    /// Number of active runs for a repository (test and introspection aid)
    pub async fn active_count(&self, repo_key: &str) -> usize {
        match self.state_for(repo_key) {
            Some(state) => state.lock().await.active.len(),
            None => 0,
        }
    }

    /// Number of queued runs for a repository
    pub async fn queued_count(&self, repo_key: &str) -> usize {
        match self.state_for(repo_key) {
            Some(state) => state.lock().await.queue.len(),
            None => 0,
        }
    }

    /// Cancels every queued or active run targeting the same branch/PR
    /// as the incoming event. Queued victims never reached the cluster
    /// and are reported cancelled directly; active victims are cancelled
    /// in the cluster and removed from the set immediately.
    async fn supersede(&self, repo_runs: &mut RepoRuns, event: &Event) {
        let key = event.concurrency_key();

        let mut queued: Vec<Submission> = Vec::new();
        let mut index = 0;
        while index < repo_runs.queue.len() {
            if repo_runs.queue[index].event.concurrency_key() == key {
                if let Some(victim) = repo_runs.queue.remove(index) {
                    queued.push(victim);
                }
            } else {
                index += 1;
            }
        }

        let (active_victims, kept): (Vec<Submission>, Vec<Submission>) = repo_runs
            .active
            .drain(..)
            .partition(|s| s.event.concurrency_key() == key);
        repo_runs.active = kept;

        for mut victim in queued {
            victim.run.state = RunState::Cancelled;
            info!(run = %victim.run.name, "superseding queued run");
            if let Err(e) = self
                .reporter
                .publish(victim.provider.as_ref(), &victim.event, Status::Cancelled)
                .await
            {
                warn!(run = %victim.run.name, "failed to report superseded run: {}", e);
            }
        }

        for mut victim in active_victims {
            victim.run.state = RunState::Cancelled;
            info!(run = %victim.run.name, "superseding active run");
            if let Err(e) = self
                .cluster
                .cancel_run(&victim.run.namespace, &victim.run.name)
                .await
            {
                warn!(run = %victim.run.name, "failed to cancel superseded run: {}", e);
            }
            if let Err(e) = self
                .reporter
                .publish(victim.provider.as_ref(), &victim.event, Status::Cancelled)
                .await
            {
                warn!(run = %victim.run.name, "failed to report superseded run: {}", e);
            }
        }
    }

    /// Creates the run at the cluster boundary and tracks it as active.
    /// Persistent creation failure surfaces as a failure status; the
    /// error stays scoped to this repository.
    async fn admit(
        &self,
        repo_runs: &mut RepoRuns,
        mut submission: Submission,
    ) -> Result<(), OrchestrationError> {
        match self.create_with_retry(&submission).await {
            Ok(()) => {
                submission.run.state = RunState::Running;
                info!(
                    run = %submission.run.name,
                    sha = %submission.run.sha,
                    "run admitted"
                );
                if let Err(e) = self
                    .reporter
                    .publish(submission.provider.as_ref(), &submission.event, Status::Neutral)
                    .await
                {
                    warn!("failed to publish pending status: {}", e);
                }
                repo_runs.active.push(submission);
                Ok(())
            }
            Err(e) => {
                error!(
                    run = %submission.run.name,
                    "run creation failed after {} attempt(s): {:#}",
                    self.retries, e
                );
                if let Err(report_err) = self
                    .reporter
                    .publish(submission.provider.as_ref(), &submission.event, Status::Failure)
                    .await
                {
                    warn!("failed to publish admission failure: {}", report_err);
                }
                Err(OrchestrationError::Admission(e.to_string()))
            }
        }
    }

    /// Bounded retry with exponential backoff around the cluster write
    async fn create_with_retry(&self, submission: &Submission) -> anyhow::Result<()> {
        let mut attempt = 0;
        let mut delay = self.backoff;

        loop {
            attempt += 1;

            match self
                .cluster
                .create_run(&submission.run, &submission.definition)
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            run = %submission.run.name,
                            "run created after {} attempt(s)", attempt
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(e);
                    }
                    warn!(
                        run = %submission.run.name,
                        "run creation failed (attempt {}/{}): {:#}, retrying in {:?}",
                        attempt, self.retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn repo_state(&self, repository: &Repository) -> Arc<AsyncMutex<RepoRuns>> {
        let mut map = self.repos.lock().expect("controller state lock poisoned");
        map.entry(repository.key())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(RepoRuns {
                    limit: repository.effective_limit(),
                    active: Vec::new(),
                    queue: VecDeque::new(),
                }))
            })
            .clone()
    }

    fn state_for(&self, repo_key: &str) -> Option<Arc<AsyncMutex<RepoRuns>>> {
        let map = self.repos.lock().expect("controller state lock poisoned");
        map.get(repo_key).cloned()
    }
}
