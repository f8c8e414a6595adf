use std::collections::VecDeque;

use async_trait::async_trait;
use config::UpstreamService;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::messages::{openai, unified::{UnifiedRequest, UnifiedResponse}};
use crate::provider::{DeltaStream, Provider, failure_from_response, send_failure};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key: SecretString,
    client: Client,
}

impl OpenAiProvider {
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

    async fn send(&self, request: &openai::ChatCompletionRequest) -> crate::Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = sonic_rs::to_vec(request)
            .map_err(|e| LlmError::MalformedRequest(format!("Failed to serialize request: {e}")))?;

        self.client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| send_failure(&self.name, e))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, request: UnifiedRequest) -> crate::Result<UnifiedResponse> {
        let mut wire_request = openai::ChatCompletionRequest::from(request);
        wire_request.stream = Some(false);

        let response = self.send(&wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read response body from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        let wire_response: openai::ChatCompletionResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse chat completion response from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        Ok(UnifiedResponse::from(wire_response))
    }

    async fn chat_stream(&self, request: UnifiedRequest) -> crate::Result<DeltaStream> {
        let mut wire_request = openai::ChatCompletionRequest::from(request);
        wire_request.stream = Some(true);

        let response = self.send(&wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        struct StreamState<S> {
            events: S,
            decoder: openai::StreamDecoder,
            pending: VecDeque<crate::Result<crate::messages::unified::UnifiedDelta>>,
            finished: bool,
            provider: String,
        }

        let state = StreamState {
            events: response.bytes_stream().eventsource(),
            decoder: openai::StreamDecoder::new(),
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
                        if event.data == "[DONE]" {
                            st.pending.extend(st.decoder.finish().into_iter().map(Ok));
                            st.finished = true;
                            continue;
                        }

                        match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
                            Ok(chunk) => st.pending.extend(st.decoder.decode(chunk).into_iter().map(Ok)),
                            Err(e) => log::warn!("Skipping unparsable chunk from {}: {e}", st.provider),
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
                    // Stream ended without the [DONE] marker; close out
                    // whatever the decoder still holds.
                    None => {
                        st.pending.extend(st.decoder.finish().into_iter().map(Ok));
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
