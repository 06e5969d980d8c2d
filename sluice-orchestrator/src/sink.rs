//! Event sink
//!
//! Entry point for one webhook delivery: builds the normalized event,
//! binds the delivery span, matches the repository, resolves pipeline
//! definitions, and hands each one to the controller. Deliveries for
//! unregistered repositories and resolution failures that precede any
//! run identity are dropped quietly; everything else surfaces as an
//! error to the transport layer.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, error, field::Empty, info, info_span};

use sluice_core::domain::event::{Event, EventType, RequestRecord};
use sluice_core::error::OrchestrationError;
use sluice_providers::{Provider, WebhookRequest};

use crate::cluster::ClusterCapability;
use crate::config::Config;
use crate::controller::RunController;
use crate::matcher::match_repository;
use crate::resolver::Resolver;

/// Marks a delivery as a manual trigger; its value may name the VCS
/// backend whose repository the trigger targets
pub const INCOMING_EVENT_HEADER: &str = "x-incoming-event";
/// Self-hosted GitHub host override, honored for manual triggers only
pub const ENTERPRISE_HOST_HEADER: &str = "x-github-enterprise-host";

/// Body of a manual trigger: which repository and branch to run on
#[derive(Debug, Deserialize)]
struct IncomingPayload {
    repository: String,
    branch: String,
    #[serde(default)]
    sha: String,
}

pub struct EventSink {
    cluster: Arc<dyn ClusterCapability>,
    controller: Arc<RunController>,
    providers: Arc<HashMap<&'static str, Arc<dyn Provider>>>,
    config: Config,
}

impl EventSink {
    pub fn new(
        cluster: Arc<dyn ClusterCapability>,
        controller: Arc<RunController>,
        providers: Arc<HashMap<&'static str, Arc<dyn Provider>>>,
        config: Config,
    ) -> Self {
        Self {
            cluster,
            controller,
            providers,
            config,
        }
    }

    /// Processes one delivery end to end.
    ///
    /// Dropped-delivery outcomes (unregistered or ambiguous repository)
    /// and resolution failures reached before any run exists are logged
    /// and swallowed here; the sender gets a success response because
    /// retrying such a delivery can never help.
    pub async fn process(
        &self,
        provider: Arc<dyn Provider>,
        request: WebhookRequest,
    ) -> Result<(), OrchestrationError> {
        let event = build_event(provider.as_ref(), &request).await?;

        // Manual triggers run against a real backend when the hint
        // header names one; the placeholder provider stays otherwise.
        let provider = if event.event_type == EventType::Incoming {
            request
                .header(INCOMING_EVENT_HEADER)
                .and_then(|name| self.providers.get(name).cloned())
                .unwrap_or(provider)
        } else {
            provider
        };

        let span = delivery_span(&event);
        provider.set_logger(span.clone());

        match self.route(provider, event).instrument(span).await {
            Err(e) if e.is_dropped_delivery() => {
                info!("dropping delivery: {}", e);
                Ok(())
            }
            Err(e) if e.is_resolution_failure() => {
                info!("no run produced: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    async fn route(
        &self,
        provider: Arc<dyn Provider>,
        event: Event,
    ) -> Result<(), OrchestrationError> {
        let repositories = self
            .cluster
            .list_repositories(self.config.namespace.as_deref())
            .await
            .map_err(|e| OrchestrationError::Cluster(e.to_string()))?;

        let repository = match_repository(&repositories, &event)?.clone();
        info!(repository = %repository.key(), "matched repository");

        // Repository-scoped credentials take precedence over any
        // globally configured token.
        let provider = match &repository.secret_ref {
            Some(secret) => {
                let token = self
                    .cluster
                    .get_secret(&repository.namespace, secret)
                    .await
                    .map_err(|e| OrchestrationError::Cluster(e.to_string()))?;
                provider.with_credentials(&token)
            }
            None => provider,
        };

        let resolver = Resolver::new(provider.clone(), &self.config);
        let definitions = resolver.resolve_for_event(&event).await?;
        info!(definitions = definitions.len(), "resolved pipeline definitions");

        for definition in definitions {
            self.controller
                .submit(&repository, provider.clone(), event.clone(), definition)
                .await?;
        }
        Ok(())
    }
}

/// Builds the normalized event for one delivery.
///
/// Manual triggers bypass provider payload parsing entirely: the target
/// repository and branch come from the trigger body, and the enterprise
/// host header, when present, overrides the provider target. Every other
/// kind goes through the provider. The verbatim request is retained on
/// the event either way.
pub(crate) async fn build_event(
    provider: &dyn Provider,
    request: &WebhookRequest,
) -> Result<Event, OrchestrationError> {
    let mut event = if request.header(INCOMING_EVENT_HEADER).is_some() {
        let mut event = incoming_event(&request.body)?;
        if let Some(host) = request.header(ENTERPRISE_HOST_HEADER) {
            event.provider_url = host.to_string();
            event.enterprise_url = Some(host.to_string());
        }
        event
    } else {
        provider.parse_payload(request).await.map_err(|e| {
            error!("failed to parse {} payload: {}", provider.name(), e);
            OrchestrationError::Payload(e.to_string())
        })?
    };

    event.request = Some(RequestRecord::new(request.headers.clone(), &request.body));
    Ok(event)
}

/// Synthesizes the event for a manual trigger from its body
fn incoming_event(body: &str) -> Result<Event, OrchestrationError> {
    let payload: IncomingPayload = serde_json::from_str(body.trim())
        .map_err(|e| OrchestrationError::Payload(format!("incoming payload: {}", e)))?;

    let mut event = Event::new(EventType::Incoming);
    event.url = payload.repository;
    event.source_branch = payload.branch.clone();
    event.target_branch = payload.branch;
    event.sha = payload.sha;
    Ok(event)
}

/// The span every log line of one delivery is attached to.
///
/// SHA, event type, and source repository URL are always present; the
/// target branch is recorded when non-empty, and the source branch only
/// when it differs from the target.
fn delivery_span(event: &Event) -> tracing::Span {
    let span = info_span!(
        "delivery",
        event_sha = %event.sha,
        event_type = %event.event_type,
        source_repo_url = %event.url,
        target_branch = Empty,
        source_branch = Empty,
    );
    if !event.target_branch.is_empty() {
        span.record("target_branch", event.target_branch.as_str());
    }
    if !event.source_branch.is_empty() && event.source_branch != event.target_branch {
        span.record("source_branch", event.source_branch.as_str());
    }
    span
}
