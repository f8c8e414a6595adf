use std::collections::VecDeque;

use async_trait::async_trait;
use config::UpstreamService;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::messages::{
    anthropic,
    unified::{UnifiedRequest, UnifiedResponse},
};
use crate::provider::{DeltaStream, Provider, failure_from_response, send_failure};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: SecretString,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(service: &UpstreamService, api_key: SecretString, client: Client) -> Self {
        Self {
            name: service.name.clone(),
            base_url: service
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            client,
        }
    }

    async fn send(&self, request: &anthropic::MessagesRequest) -> crate::Result<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);

        let body = sonic_rs::to_vec(request)
            .map_err(|e| LlmError::MalformedRequest(format!("Failed to serialize request: {e}")))?;

        self.client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| send_failure(&self.name, e))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat(&self, request: UnifiedRequest) -> crate::Result<UnifiedResponse> {
        let mut wire_request = anthropic::MessagesRequest::from(request);
        wire_request.stream = Some(false);

        let response = self.send(&wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read response body from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        let wire_response: anthropic::MessagesResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse messages response from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        Ok(UnifiedResponse::from(wire_response))
    }

    async fn chat_stream(&self, request: UnifiedRequest) -> crate::Result<DeltaStream> {
        let mut wire_request = anthropic::MessagesRequest::from(request);
        wire_request.stream = Some(true);

        let response = self.send(&wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        struct StreamState<S> {
            events: S,
            decoder: anthropic::StreamDecoder,
            pending: VecDeque<crate::Result<crate::messages::unified::UnifiedDelta>>,
            finished: bool,
            provider: String,
        }

        let state = StreamState {
            events: response.bytes_stream().eventsource(),
            decoder: anthropic::StreamDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
            provider: self.name.clone(),
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }

                if st.finished {
                    return None;
                }

                match st.events.next().await {
                    Some(Ok(event)) => {
                        let parsed = sonic_rs::from_str::<anthropic::StreamEvent>(&event.data);

                        match parsed {
                            Ok(anthropic::StreamEvent::Error { error }) => {
                                log::error!(
                                    "Stream error from {}: {} - {}",
                                    st.provider,
                                    error.error_type,
                                    error.message
                                );
                                st.finished = true;
                                return Some((
                                    Err(LlmError::UpstreamApiError {
                                        status: 502,
                                        message: error.message,
                                    }),
                                    st,
                                ));
                            }
                            Ok(parsed_event) => {
                                let is_stop = matches!(parsed_event, anthropic::StreamEvent::MessageStop);
                                st.pending.extend(st.decoder.decode(parsed_event).into_iter().map(Ok));

                                if is_stop {
                                    st.finished = true;
                                }
                            }
                            Err(e) => {
                                log::warn!("Skipping unparsable event from {}: {e}", st.provider)
                            }
                        }
                    }
                    Some(Err(e)) => {
                        log::error!("Stream transport error from {}: {e}", st.provider);
                        st.finished = true;
                        return Some((
                            Err(LlmError::Connection(format!("upstream stream failed: {e}"))),
                            st,
                        ));
                    }
                    // Stream ended without message_stop; synthesize one so
                    // the delta sequence still terminates with Done.
                    None => {
                        st.pending.extend(
                            st.decoder
                                .decode(anthropic::StreamEvent::MessageStop)
                                .into_iter()
                                .map(Ok),
                        );
                        st.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
