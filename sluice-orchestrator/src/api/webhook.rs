//! Webhook API Handler
//!
//! Receives VCS deliveries, identifies the sending backend, and hands
//! the request to the event sink. Responds 202 once the delivery has
//! been fully routed.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::collections::HashMap;
use std::sync::Arc;

use sluice_providers::{Provider, WebhookRequest, detect};

use crate::api::error::{ApiError, ApiResult};
use crate::sink::{EventSink, INCOMING_EVENT_HEADER};

/// Shared state for the API layer
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<EventSink>,
    /// Providers keyed by their short name
    pub providers: Arc<HashMap<&'static str, Arc<dyn Provider>>>,
}

/// POST /webhook
/// Receive one VCS delivery
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let request = webhook_request(&headers, body);

    let provider_name = if request.header(INCOMING_EVENT_HEADER).is_some() {
        "incoming"
    } else {
        detect(&request).ok_or_else(|| {
            ApiError::BadRequest("cannot identify provider from headers".to_string())
        })?
    };

    let provider = state
        .providers
        .get(provider_name)
        .ok_or_else(|| {
            ApiError::InternalError(format!("provider {} not configured", provider_name))
        })?
        .clone();

    tracing::debug!("received {} delivery", provider_name);
    state.sink.process(provider, request).await?;

    Ok(StatusCode::ACCEPTED)
}

fn webhook_request(headers: &HeaderMap, body: String) -> WebhookRequest {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    WebhookRequest::new(headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_webhook_request_carries_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", HeaderValue::from_static("push"));
        let request = webhook_request(&headers, "{}".to_string());
        assert_eq!(request.header("x-github-event"), Some("push"));
        assert_eq!(request.body, "{}");
        assert_eq!(detect(&request), Some("github"));
    }
}
