//! Incoming provider
//!
//! Backs manually triggered "incoming" events. These deliveries carry no
//! parseable payload and no commit to report against, so parsing always
//! fails and status reports are logged no-ops.

use async_trait::async_trait;
use std::sync::RwLock;
use tracing::{Span, debug};

use sluice_core::domain::event::Event;
use sluice_core::domain::status::Status;

use crate::error::{ProviderError, Result};
use crate::{Provider, WebhookRequest};

/// Provider implementation for manual triggers
pub struct IncomingProvider {
    span: RwLock<Span>,
}

impl IncomingProvider {
    pub fn new() -> Self {
        Self {
            span: RwLock::new(Span::none()),
        }
    }

    fn log_span(&self) -> Span {
        self.span.read().expect("span lock poisoned").clone()
    }
}

impl Default for IncomingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for IncomingProvider {
    fn name(&self) -> &'static str {
        "incoming"
    }

    async fn parse_payload(&self, _request: &WebhookRequest) -> Result<Event> {
        // Incoming events are synthesized by the sink, never parsed.
        Err(ProviderError::Payload(
            "incoming events carry no parseable payload".to_string(),
        ))
    }

    fn set_logger(&self, span: Span) {
        *self.span.write().expect("span lock poisoned") = span;
    }

    fn with_credentials(&self, _token: &str) -> std::sync::Arc<dyn Provider> {
        std::sync::Arc::new(Self {
            span: RwLock::new(self.log_span()),
        })
    }

    async fn report_status(&self, _event: &Event, status: Status, _description: &str) -> Result<()> {
        debug!(
            parent: &self.log_span(),
            status = %status,
            "incoming event has no status target, skipping report"
        );
        Ok(())
    }

    async fn get_file(&self, _event: &Event, path: &str) -> Result<String> {
        Err(ProviderError::FileNotFound(path.to_string()))
    }

    async fn get_config_files(&self, _event: &Event, _dir: &str) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}
