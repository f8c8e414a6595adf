//! Upstream connectors, one per wire format.

mod anthropic;
mod gemini;
mod http_client;
mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use config::{ServiceType, UpstreamService};
use futures::Stream;
use reqwest::Client;
use secrecy::SecretString;

pub(crate) use http_client::build_http_client;

use crate::error::LlmError;
use crate::messages::unified::{UnifiedDelta, UnifiedRequest, UnifiedResponse};

/// A finite stream of unified deltas, ending with `Done` on the happy path
/// or an `Err` element on mid-stream failure.
pub(crate) type DeltaStream = Pin<Box<dyn Stream<Item = crate::Result<UnifiedDelta>> + Send>>;

/// One upstream connector, bound to a service and a resolved credential.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    /// Buffered completion.
    async fn chat(&self, request: UnifiedRequest) -> crate::Result<UnifiedResponse>;

    /// Streaming completion. An `Err` return means the upstream failed
    /// before sending body bytes and failover is still possible.
    async fn chat_stream(&self, request: UnifiedRequest) -> crate::Result<DeltaStream>;

    fn name(&self) -> &str;
}

/// Build the connector for a configured upstream.
pub(crate) fn for_service(
    service: &UpstreamService,
    api_key: SecretString,
    client: Client,
) -> Box<dyn Provider> {
    match service.service_type {
        ServiceType::Openai => Box::new(openai::OpenAiProvider::new(service, api_key, client)),
        ServiceType::Anthropic => Box::new(anthropic::AnthropicProvider::new(service, api_key, client)),
        ServiceType::Gemini => Box::new(gemini::GeminiProvider::new(service, api_key, client)),
    }
}

/// Classify a transport-level send failure.
///
/// Connect-phase failures (refused, reset, handshake timeout) are
/// retriable on the next candidate; a request that went silent past the
/// configured deadline is not.
pub(crate) fn send_failure(provider: &str, error: reqwest::Error) -> LlmError {
    if error.is_timeout() && !error.is_connect() {
        log::error!("Request to {provider} exceeded the deadline: {error}");
        return LlmError::DeadlineExceeded;
    }

    LlmError::Connection(format!("Failed to reach {provider}: {error}"))
}

/// Read a failed upstream response into the matching error class.
pub(crate) async fn failure_from_response(provider: &str, response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    log::error!("{provider} upstream error ({status}): {message}");
    LlmError::from_upstream_status(status, message)
}
