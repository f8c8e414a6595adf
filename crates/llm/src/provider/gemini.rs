use std::collections::VecDeque;

use async_trait::async_trait;
use config::UpstreamService;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::messages::{
    gemini,
    unified::{UnifiedRequest, UnifiedResponse},
};
use crate::provider::{DeltaStream, Provider, failure_from_response, send_failure};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(crate) struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: SecretString,
    client: Client,
}

impl GeminiProvider {
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

    async fn send(&self, url: String, request: &gemini::GenerateContentRequest) -> crate::Result<reqwest::Response> {
        let body = sonic_rs::to_vec(request)
            .map_err(|e| LlmError::MalformedRequest(format!("Failed to serialize request: {e}")))?;

        self.client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| send_failure(&self.name, e))
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat(&self, request: UnifiedRequest) -> crate::Result<UnifiedResponse> {
        let model = request.model.clone();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            model,
            self.api_key.expose_secret()
        );

        let wire_request = gemini::GenerateContentRequest::from(request);
        let response = self.send(url, &wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read response body from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        let wire_response: gemini::GenerateContentResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse generateContent response from {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        if wire_response.candidates.is_empty() {
            log::error!("{} returned an empty candidates array", self.name);
            return Err(LlmError::Internal(None));
        }

        let mut unified = UnifiedResponse::from(wire_response);
        if unified.model.is_empty() {
            unified.model = model;
        }

        Ok(unified)
    }

    async fn chat_stream(&self, request: UnifiedRequest) -> crate::Result<DeltaStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            request.model,
            self.api_key.expose_secret()
        );

        let wire_request = gemini::GenerateContentRequest::from(request);
        let response = self.send(url, &wire_request).await?;

        if !response.status().is_success() {
            return Err(failure_from_response(&self.name, response).await);
        }

        struct StreamState<S> {
            events: S,
            decoder: gemini::StreamDecoder,
            pending: VecDeque<crate::Result<crate::messages::unified::UnifiedDelta>>,
            finished: bool,
            provider: String,
        }

        let state = StreamState {
            events: response.bytes_stream().eventsource(),
            decoder: gemini::StreamDecoder::new(),
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
                        match sonic_rs::from_str::<gemini::GenerateContentResponse>(&event.data) {
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
                    // The wire has no end marker; the connection closing is
                    // the terminator.
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
