//! LLM reverse proxy core: protocol endpoints, the transcoding pipeline,
//! upstream routing with priority failover, and prompt-injected function
//! calling.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use serde::Deserialize;

mod error;
mod messages;
mod provider;
mod request;
mod router;
mod server;
mod tooling;

pub use error::{AnthropicError, AnthropicResult, GeminiError, GeminiResult, LlmError, LlmResult as Result};

use config::ConfigWatcher;
use messages::{anthropic, gemini, openai, unified::UnifiedRequest, unix_timestamp};
use server::ProxyServer;

/// Build the axum router serving every protocol endpoint.
pub fn router(watcher: ConfigWatcher) -> Router {
    let server = Arc::new(ProxyServer::new(watcher));

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1beta/models/{model_action}", post(gemini_generate))
        .with_state(server)
}

/// OpenAI-format chat completions, buffered or SSE.
async fn chat_completions(
    State(server): State<Arc<ProxyServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> Result<Response> {
    let context = request::openai_context(&headers);
    server.authorize(&context)?;

    log::debug!(
        "Chat completions request for model '{}' ({} messages, stream: {})",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let streaming = request.stream.unwrap_or(false);
    let model = request.model.clone();
    let unified = UnifiedRequest::from(request);

    if streaming {
        let stream = server.completion_stream(unified, &context).await?;

        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        let mut encoder = openai::StreamEncoder::new(id, model, unix_timestamp());

        let events = stream
            .flat_map(move |result| {
                let frames: Vec<std::result::Result<Event, Infallible>> = match result {
                    Ok(delta) => encoder
                        .encode(&delta)
                        .into_iter()
                        .map(|chunk| Ok(Event::default().data(serialize_frame(&chunk))))
                        .collect(),
                    Err(error) => {
                        log::error!("Stream error: {error}");
                        vec![Ok(Event::default().data(error.openai_error_json()))]
                    }
                };

                futures::stream::iter(frames)
            })
            .chain(futures::stream::once(async {
                Ok::<_, Infallible>(Event::default().data("[DONE]"))
            }));

        Ok(Sse::new(events).into_response())
    } else {
        let unified_response = server.completion(unified, &context).await?;
        let response = openai::ChatCompletionResponse::from(unified_response);

        Ok(Json(response).into_response())
    }
}

/// Deduplicated union of every configured model.
async fn list_models(State(server): State<Arc<ProxyServer>>) -> Result<impl IntoResponse> {
    let response = server.models();

    log::debug!("Returning {} models", response.data.len());
    Ok(Json(response))
}

/// Anthropic-format messages, buffered or SSE.
async fn anthropic_messages(
    State(server): State<Arc<ProxyServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    let context = request::anthropic_context(&headers);
    server.authorize(&context).map_err(AnthropicError::from)?;

    log::debug!(
        "Messages request for model '{}' ({} messages, stream: {})",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let streaming = request.stream.unwrap_or(false);
    let model = request.model.clone();
    let unified = UnifiedRequest::from(request);

    if streaming {
        let stream = server
            .completion_stream(unified, &context)
            .await
            .map_err(AnthropicError::from)?;

        let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let mut encoder = anthropic::StreamEncoder::new(id, model);

        let events = stream.flat_map(move |result| {
            let frames: Vec<std::result::Result<Event, Infallible>> = match result {
                Ok(delta) => encoder
                    .encode(&delta)
                    .into_iter()
                    .map(|event| {
                        Ok(Event::default()
                            .event(event.event_name())
                            .data(serialize_frame(&event)))
                    })
                    .collect(),
                Err(error) => {
                    log::error!("Stream error: {error}");
                    let event = anthropic::StreamEvent::Error {
                        error: AnthropicError(error).payload(),
                    };
                    vec![Ok(Event::default().event("error").data(serialize_frame(&event)))]
                }
            };

            futures::stream::iter(frames)
        });

        Ok(Sse::new(events).into_response())
    } else {
        let unified_response = server
            .completion(unified, &context)
            .await
            .map_err(AnthropicError::from)?;
        let response = anthropic::MessagesResponse::from(unified_response);

        Ok(Json(response).into_response())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiQuery {
    key: Option<String>,
}

/// Gemini-format generation; the path segment carries `model:action`.
async fn gemini_generate(
    State(server): State<Arc<ProxyServer>>,
    Path(model_action): Path<String>,
    Query(query): Query<GeminiQuery>,
    headers: HeaderMap,
    Sonic(request): Sonic<gemini::GenerateContentRequest>,
) -> GeminiResult<Response> {
    let Some((model, action)) = model_action.split_once(':') else {
        return Err(GeminiError(LlmError::MalformedRequest(format!(
            "Expected 'model:action' in the path, got '{model_action}'"
        ))));
    };

    let context = request::gemini_context(&headers, query.key);
    server.authorize(&context).map_err(GeminiError::from)?;

    log::debug!("generateContent request for model '{model}' (action: {action})");

    let mut unified = UnifiedRequest::from(request);
    unified.model = model.to_string();

    match action {
        "generateContent" => {
            let unified_response = server
                .completion(unified, &context)
                .await
                .map_err(GeminiError::from)?;
            let response = gemini::GenerateContentResponse::from(unified_response);

            Ok(Json(response).into_response())
        }
        "streamGenerateContent" => {
            let model = model.to_string();
            let stream = server
                .completion_stream(unified, &context)
                .await
                .map_err(GeminiError::from)?;

            let mut encoder = gemini::StreamEncoder::new(model);

            let events = stream.flat_map(move |result| {
                let frames: Vec<std::result::Result<Event, Infallible>> = match result {
                    Ok(delta) => encoder
                        .encode(&delta)
                        .into_iter()
                        .map(|chunk| Ok(Event::default().data(serialize_frame(&chunk))))
                        .collect(),
                    Err(error) => {
                        log::error!("Stream error: {error}");
                        let payload = GeminiError(error).payload();
                        vec![Ok(Event::default().data(serialize_frame(&payload)))]
                    }
                };

                futures::stream::iter(frames)
            });

            Ok(Sse::new(events).into_response())
        }
        other => Err(GeminiError(LlmError::MalformedRequest(format!(
            "Unknown action ':{other}'"
        )))),
    }
}

fn serialize_frame<T: serde::Serialize>(frame: &T) -> String {
    sonic_rs::to_string(frame).unwrap_or_else(|e| {
        log::error!("Failed to serialize stream frame: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}
