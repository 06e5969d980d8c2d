//! Pipeline resolver
//!
//! Turns a matched repository + event into fully-dereferenced pipeline
//! definitions:
//! - enumerates the config directory at the event's commit,
//! - selects definitions whose trigger annotations match the event,
//! - follows task references (local, bundled, remote) with an explicit
//!   visited set and depth counter so resolution always terminates,
//! - substitutes event-derived parameters,
//! - validates the result before it can be admitted.
//!
//! No partial or best-effort definition ever leaves this module.

pub mod params;

use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use sluice_core::domain::event::Event;
use sluice_core::domain::pipeline::{PipelineDefinition, Task, TaskReference};
use sluice_core::error::OrchestrationError;
use sluice_providers::Provider;

use crate::config::Config;

/// A config-dir file that defines a standalone task
#[derive(Debug, Deserialize)]
struct TaskDoc {
    task: Task,
}

/// A fetched bundle: a package of named tasks
#[derive(Debug, Deserialize)]
struct BundleDoc {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Resolves pipeline definitions for one event
pub struct Resolver {
    provider: Arc<dyn Provider>,
    http: Client,
    pipeline_dir: String,
    max_depth: usize,
    fetch_timeout: Duration,
}

impl Resolver {
    pub fn new(provider: Arc<dyn Provider>, config: &Config) -> Self {
        Self {
            provider,
            http: Client::new(),
            pipeline_dir: config.pipeline_dir.clone(),
            max_depth: config.max_reference_depth,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Resolves every definition that should run for this event.
    ///
    /// Returns `NotFound` when nothing matches the event's kind and
    /// target branch; any reference or validation problem is terminal.
    pub async fn resolve_for_event(
        &self,
        event: &Event,
    ) -> Result<Vec<PipelineDefinition>, OrchestrationError> {
        let files = self
            .provider
            .get_config_files(event, &self.pipeline_dir)
            .await
            .map_err(|e| OrchestrationError::Reference(e.to_string()))?;

        let (candidates, locals) = partition_config_files(files)?;
        debug!(
            candidates = candidates.len(),
            local_tasks = locals.len(),
            "enumerated pipeline config"
        );

        let matched: Vec<PipelineDefinition> = candidates
            .into_iter()
            .filter(|def| def.trigger.matches(event.event_type, &event.target_branch))
            .collect();

        if matched.is_empty() {
            return Err(OrchestrationError::NotFound(format!(
                "no definition in {} matches {} on {}",
                self.pipeline_dir, event.event_type, event.target_branch
            )));
        }

        let mut resolved = Vec::with_capacity(matched.len());
        for mut definition in matched {
            let tasks = std::mem::take(&mut definition.tasks);
            for task in tasks {
                definition.tasks.push(self.resolve_task(task, &locals).await?);
            }
            params::substitute(&mut definition, event);
            validate(&definition)?;
            resolved.push(definition);
        }
        Ok(resolved)
    }

    /// Follows one task's reference chain until an inline body is found.
    ///
    /// Depth and the visited set are explicit state: a chain longer than
    /// `max_depth` or one that revisits a reference fails instead of
    /// looping.
    async fn resolve_task(
        &self,
        mut task: Task,
        locals: &HashMap<String, Task>,
    ) -> Result<Task, OrchestrationError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut depth = 0usize;

        while let Some(reference) = task.reference.take() {
            if depth >= self.max_depth {
                return Err(OrchestrationError::Reference(format!(
                    "reference chain exceeds depth {} at {}",
                    self.max_depth, reference
                )));
            }
            if !visited.insert(reference.key()) {
                return Err(OrchestrationError::Reference(format!(
                    "cyclic reference chain at {}",
                    reference
                )));
            }

            let body = match &reference {
                TaskReference::Local { name } => locals.get(name).cloned().ok_or_else(|| {
                    OrchestrationError::Reference(format!(
                        "local task {} not found in {}",
                        name, self.pipeline_dir
                    ))
                })?,
                TaskReference::Bundle { bundle, name } => {
                    self.fetch_bundle_task(bundle, name).await?
                }
                TaskReference::Remote { url } => self.fetch_remote_task(url).await?,
            };

            // The outer task keeps its name and ordering; only the body
            // (and any nested reference) comes from the target.
            task.steps = body.steps;
            task.reference = body.reference;
            depth += 1;
        }

        Ok(task)
    }

    async fn fetch_remote_task(&self, url: &str) -> Result<Task, OrchestrationError> {
        let text = self.fetch_text(url).await?;
        parse_task_document(&text)
            .ok_or_else(|| OrchestrationError::Reference(format!("{} is not a task document", url)))
    }

    async fn fetch_bundle_task(&self, bundle: &str, name: &str) -> Result<Task, OrchestrationError> {
        let text = self.fetch_text(bundle).await?;
        let doc: BundleDoc = serde_yaml::from_str(&text)
            .map_err(|e| OrchestrationError::Reference(format!("bundle {}: {}", bundle, e)))?;
        doc.tasks
            .into_iter()
            .find(|task| task.name == name)
            .ok_or_else(|| {
                OrchestrationError::Reference(format!("bundle {} has no task {}", bundle, name))
            })
    }

    /// One bounded network fetch; exceeding the deadline is a timeout
    /// variant so the admission pipeline never hangs on a slow remote.
    async fn fetch_text(&self, url: &str) -> Result<String, OrchestrationError> {
        let request = async {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| OrchestrationError::Reference(format!("{}: {}", url, e)))?
                .error_for_status()
                .map_err(|e| OrchestrationError::Reference(format!("{}: {}", url, e)))?;
            response
                .text()
                .await
                .map_err(|e| OrchestrationError::Reference(format!("{}: {}", url, e)))
        };

        tokio::time::timeout(self.fetch_timeout, request)
            .await
            .map_err(|_| OrchestrationError::ReferenceTimeout(url.to_string()))?
    }
}

/// Splits config-dir files into pipeline candidates and local task bodies
fn partition_config_files(
    files: Vec<(String, String)>,
) -> Result<(Vec<PipelineDefinition>, HashMap<String, Task>), OrchestrationError> {
    let mut candidates = Vec::new();
    let mut locals = HashMap::new();

    for (file_name, content) in files {
        if let Ok(doc) = serde_yaml::from_str::<TaskDoc>(&content) {
            locals.insert(doc.task.name.clone(), doc.task);
            continue;
        }
        match serde_yaml::from_str::<PipelineDefinition>(&content) {
            Ok(definition) => candidates.push(definition),
            Err(e) => {
                return Err(OrchestrationError::Validation(format!(
                    "{}: {}",
                    file_name, e
                )));
            }
        }
    }
    Ok((candidates, locals))
}

/// Parses a fetched document as a task, bare or wrapped
fn parse_task_document(text: &str) -> Option<Task> {
    if let Ok(doc) = serde_yaml::from_str::<TaskDoc>(text) {
        return Some(doc.task);
    }
    serde_yaml::from_str::<Task>(text).ok()
}

/// Structural validation of a resolved definition
fn validate(definition: &PipelineDefinition) -> Result<(), OrchestrationError> {
    if definition.name.is_empty() {
        return Err(OrchestrationError::Validation(
            "definition has no name".to_string(),
        ));
    }
    if definition.tasks.is_empty() {
        return Err(OrchestrationError::Validation(format!(
            "{} has no tasks",
            definition.name
        )));
    }

    let mut names = HashSet::new();
    for task in &definition.tasks {
        if !names.insert(task.name.as_str()) {
            return Err(OrchestrationError::Validation(format!(
                "{} has duplicate task {}",
                definition.name, task.name
            )));
        }
        if !task.is_resolved() {
            return Err(OrchestrationError::Validation(format!(
                "task {} in {} has no resolved body",
                task.name, definition.name
            )));
        }
    }
    for task in &definition.tasks {
        for dep in &task.run_after {
            if !names.contains(dep.as_str()) {
                return Err(OrchestrationError::Validation(format!(
                    "task {} runs after unknown task {}",
                    task.name, dep
                )));
            }
        }
    }
    Ok(())
}
