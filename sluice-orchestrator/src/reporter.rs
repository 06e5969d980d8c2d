//! Status reporter
//!
//! Observes run condition updates from the cluster and mirrors them
//! outward as provider-visible statuses. Strictly observational: a
//! publish failure is retried with backoff and then logged, and never
//! rolls back or alters the underlying run.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sluice_core::domain::event::Event;
use sluice_core::domain::status::Status;
use sluice_core::error::OrchestrationError;
use sluice_providers::Provider;

use crate::cluster::{ClusterCapability, RunUpdate};
use crate::config::Config;
use crate::controller::RunController;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Publishes statuses with bounded retry
pub struct StatusReporter {
    retries: u32,
    backoff: Duration,
}

impl StatusReporter {
    pub fn new(config: &Config) -> Self {
        Self {
            retries: config.report_retries,
            backoff: config.report_backoff,
        }
    }

    /// Publishes one status, retrying transient failures with
    /// exponential backoff. Idempotent on the provider side, so a retry
    /// after a half-delivered publish is safe.
    pub async fn publish(
        &self,
        provider: &dyn Provider,
        event: &Event,
        status: Status,
    ) -> Result<(), OrchestrationError> {
        let mut attempt = 0;
        let mut delay = self.backoff;

        loop {
            attempt += 1;

            match provider
                .report_status(event, status, status.description())
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        info!("status published after {} attempt(s)", attempt);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(OrchestrationError::Report(e.to_string()));
                    }
                    warn!(
                        "failed to publish {} status (attempt {}/{}): {}, retrying in {:?}",
                        status, attempt, self.retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Consumes run updates until the watch channel closes.
///
/// Terminal conditions complete the run in the controller (freeing its
/// slot and promoting queued work) and publish the mapped status.
/// Non-terminal updates are ignored; neutral was already published at
/// admission.
pub async fn watch_loop(
    cluster: Arc<dyn ClusterCapability>,
    controller: Arc<RunController>,
    reporter: Arc<StatusReporter>,
) -> anyhow::Result<()> {
    let mut updates = cluster.watch_runs().await?;

    info!("watching run condition updates");
    while let Some(update) = updates.recv().await {
        handle_update(&controller, &reporter, update).await;
    }
    Ok(())
}

/// Processes one observed run update
pub async fn handle_update(
    controller: &RunController,
    reporter: &StatusReporter,
    update: RunUpdate,
) {
    let Some(condition) = update.condition.as_ref() else {
        return;
    };
    if !condition.is_terminal() {
        return;
    }

    let status = Status::from_condition(Some(condition));
    let Some(submission) = controller
        .complete_run(&update.repository, &update.run_name)
        .await
    else {
        // Superseded runs were already removed and reported; anything
        // else unknown is not ours to report on.
        debug!(
            run = %update.run_name,
            repository = %update.repository,
            "update for an untracked run, ignoring"
        );
        return;
    };

    info!(
        run = %update.run_name,
        repository = %update.repository,
        status = %status,
        "run reached terminal state"
    );

    if let Err(e) = reporter
        .publish(submission.provider.as_ref(), &submission.event, status)
        .await
    {
        warn!(run = %update.run_name, "giving up on status publish: {}", e);
    }
}
