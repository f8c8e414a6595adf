//! The proxy pipeline: authorize, route, inject, forward, re-encode.

pub(crate) mod stream;

use std::fmt::Write as _;
use std::sync::Arc;

use config::{Config, ConfigWatcher, UpstreamService};
use itertools::Itertools;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::messages::openai;
use crate::messages::unified::{
    UnifiedContent, UnifiedContentContainer, UnifiedMessage, UnifiedRequest, UnifiedResponse, UnifiedRole,
};
use crate::messages::unified::to_openai::arguments_string;
use crate::provider::{self, DeltaStream, Provider};
use crate::request::RequestContext;
use crate::router;
use crate::tooling::id_map::ToolCallIdMap;
use crate::tooling::parser::{self, Segment};
use crate::tooling::prompt::{self, PromptVariant};
use crate::tooling::generate_call_id;

type ProviderFactory =
    Box<dyn Fn(&UpstreamService, SecretString, Client) -> Box<dyn Provider> + Send + Sync>;

/// Shared per-process proxy state.
///
/// Cross-request state is limited to the configuration snapshot holder,
/// the tool-call ID map and the upstream connection pool; everything else
/// lives per request.
pub(crate) struct ProxyServer {
    watcher: ConfigWatcher,
    id_map: Arc<ToolCallIdMap>,
    http: Client,
    factory: ProviderFactory,
}

impl ProxyServer {
    pub fn new(watcher: ConfigWatcher) -> Self {
        let timeout = watcher.snapshot().server.timeout;

        Self {
            watcher,
            id_map: Arc::new(ToolCallIdMap::new()),
            http: provider::build_http_client(timeout),
            factory: Box::new(|service, key, client| provider::for_service(service, key, client)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.watcher.snapshot()
    }

    /// Check the presented client credential against the allowed set.
    pub fn authorize(&self, context: &RequestContext) -> crate::Result<()> {
        let snapshot = self.snapshot();
        let auth = &snapshot.client_authentication;

        if !auth.enabled() {
            return Ok(());
        }

        match &context.client_key {
            Some(key) if auth.allows(key.expose_secret()) => Ok(()),
            Some(_) => Err(LlmError::Unauthorized("Invalid API key".to_string())),
            None => Err(LlmError::Unauthorized("Missing API key".to_string())),
        }
    }

    /// Deduplicated union of every configured model.
    pub fn models(&self) -> openai::ModelsResponse {
        let snapshot = self.snapshot();

        let data = snapshot
            .upstream_services
            .iter()
            .flat_map(|service| {
                service.models.iter().map(move |model| openai::Model {
                    id: model.clone(),
                    object: openai::ObjectType::Model,
                    created: 0,
                    owned_by: service.name.clone(),
                })
            })
            .unique_by(|model| model.id.clone())
            .collect();

        openai::ModelsResponse {
            object: openai::ObjectType::List,
            data,
        }
    }

    fn resolve_key(
        &self,
        snapshot: &Config,
        service: &UpstreamService,
        context: &RequestContext,
    ) -> Option<SecretString> {
        if service.has_api_key() {
            return service.api_key.clone();
        }

        if snapshot.features.key_passthrough {
            return context.client_key.clone();
        }

        None
    }

    /// Buffered completion with priority failover.
    pub async fn completion(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<UnifiedResponse> {
        let snapshot = self.snapshot();
        let candidates = router::candidates(&snapshot, &request.model, context.client_key.is_some());

        if candidates.is_empty() {
            return Err(LlmError::ModelUnavailable(request.model));
        }

        let mut last_error: Option<LlmError> = None;

        for candidate in candidates {
            let service = candidate.service;
            let inject = should_inject(&snapshot, service, &request);

            let mut attempt = request.clone();
            attempt.model = candidate.model.clone();

            if inject {
                prepare_injected_request(&mut attempt, &snapshot, service);
            } else {
                rewrite_ids_for_upstream(&mut attempt, &self.id_map);
            }

            let Some(key) = self.resolve_key(&snapshot, service, context) else {
                continue;
            };

            let provider = (self.factory)(service, key, self.http.clone());
            log::debug!("Attempting upstream '{}' with model '{}'", service.name, attempt.model);

            match provider.chat(attempt).await {
                Ok(mut response) => {
                    if inject {
                        extract_tool_calls(&mut response);
                    } else {
                        publish_response_ids(&mut response, &self.id_map);
                    }

                    return Ok(response);
                }
                Err(error) if error.is_retriable() => {
                    log::warn!(
                        "Upstream '{}' failed ({error}); trying the next candidate",
                        service.name
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(LlmError::UpstreamExhausted {
            last: last_error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "no usable upstream".to_string()),
        })
    }

    /// Streaming completion.
    ///
    /// Only the initial status of each candidate can trigger failover; once
    /// a body stream exists, mid-stream failures propagate to the client.
    pub async fn completion_stream(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<DeltaStream> {
        let snapshot = self.snapshot();
        let candidates = router::candidates(&snapshot, &request.model, context.client_key.is_some());

        if candidates.is_empty() {
            return Err(LlmError::ModelUnavailable(request.model));
        }

        let mut last_error: Option<LlmError> = None;

        for candidate in candidates {
            let service = candidate.service;
            let inject = should_inject(&snapshot, service, &request);

            let mut attempt = request.clone();
            attempt.model = candidate.model.clone();
            attempt.stream = Some(true);

            if inject {
                prepare_injected_request(&mut attempt, &snapshot, service);
            } else {
                rewrite_ids_for_upstream(&mut attempt, &self.id_map);
            }

            let Some(key) = self.resolve_key(&snapshot, service, context) else {
                continue;
            };

            let provider = (self.factory)(service, key, self.http.clone());
            log::debug!(
                "Attempting streaming upstream '{}' with model '{}'",
                service.name,
                attempt.model
            );

            match provider.chat_stream(attempt).await {
                Ok(upstream) => {
                    return Ok(if inject {
                        stream::extract_injected(upstream)
                    } else {
                        stream::map_native_ids(upstream, self.id_map.clone())
                    });
                }
                Err(error) if error.is_retriable() => {
                    log::warn!(
                        "Streaming upstream '{}' failed ({error}); trying the next candidate",
                        service.name
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(LlmError::UpstreamExhausted {
            last: last_error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "no usable upstream".to_string()),
        })
    }

    #[cfg(test)]
    fn with_factory(watcher: ConfigWatcher, factory: ProviderFactory) -> Self {
        let timeout = watcher.snapshot().server.timeout;

        Self {
            watcher,
            id_map: Arc::new(ToolCallIdMap::new()),
            http: provider::build_http_client(timeout),
            factory,
        }
    }
}

fn should_inject(snapshot: &Config, service: &UpstreamService, request: &UnifiedRequest) -> bool {
    snapshot.injection_enabled(service) && request.tools.as_ref().is_some_and(|tools| !tools.is_empty())
}

/// Turn a tool-bearing request into its injected form: synthesize the
/// system prompt, strip the declarations, and flatten prior tool traffic
/// into plain text the upstream can follow.
fn prepare_injected_request(request: &mut UnifiedRequest, snapshot: &Config, service: &UpstreamService) {
    let tools = request.tools.take().unwrap_or_default();

    let variant = if snapshot.optimized_prompt(service) {
        PromptVariant::Optimized
    } else {
        PromptVariant::Detailed
    };

    let rendered = prompt::render(&tools, variant, snapshot.features.prompt_template.as_deref());
    request.system = Some(prompt::prepend_to_system(rendered, request.system.take()));

    flatten_tool_history(&mut request.messages);
}

/// Rewrite earlier tool calls and results as sublanguage text, since an
/// injected upstream knows tools only through the prompt.
fn flatten_tool_history(messages: &mut [UnifiedMessage]) {
    for msg in messages.iter_mut() {
        match msg.role {
            UnifiedRole::Assistant => {
                let mut text = String::new();

                match &msg.content {
                    UnifiedContentContainer::Text(existing) => text.push_str(existing),
                    UnifiedContentContainer::Blocks(blocks) => {
                        for block in blocks {
                            match block {
                                UnifiedContent::Text { text: t } => text.push_str(t),
                                UnifiedContent::ToolUse { name, input, .. } => {
                                    append_call_block(&mut text, name, &arguments_string(input));
                                }
                                _ => {}
                            }
                        }
                    }
                }

                for call in msg.tool_calls.take().into_iter().flatten() {
                    append_call_block(&mut text, &call.name, &call.arguments);
                }

                msg.content = UnifiedContentContainer::Text(text);
            }
            UnifiedRole::Tool => {
                let content = msg.text_content();
                msg.role = UnifiedRole::User;
                msg.content =
                    UnifiedContentContainer::Text(format!("<tool_result>\n{content}\n</tool_result>"));
                msg.tool_call_id = None;
            }
            _ => {}
        }
    }
}

fn append_call_block(text: &mut String, name: &str, arguments: &str) {
    if !text.is_empty() {
        text.push('\n');
    }

    let _ = write!(
        text,
        "<tool_call>\n<name>{name}</name>\n<arguments>{arguments}</arguments>\n</tool_call>"
    );
}

/// Map client-facing call IDs in the conversation history to the IDs the
/// upstream knows them by.
fn rewrite_ids_for_upstream(request: &mut UnifiedRequest, id_map: &ToolCallIdMap) {
    let mut rewrite = |id: &mut String| {
        if let Some(upstream_id) = id_map.get(id) {
            *id = upstream_id;
        }
    };

    for msg in &mut request.messages {
        if let Some(id) = msg.tool_call_id.as_mut() {
            rewrite(id);
        }

        for call in msg.tool_calls.iter_mut().flatten() {
            rewrite(&mut call.id);
        }

        if let UnifiedContentContainer::Blocks(blocks) = &mut msg.content {
            for block in blocks {
                match block {
                    UnifiedContent::ToolUse { id, .. } => rewrite(id),
                    UnifiedContent::ToolResult { tool_use_id, .. } => rewrite(tool_use_id),
                    _ => {}
                }
            }
        }
    }
}

/// Replace upstream call IDs with fresh client-facing ones, recording the
/// pairing for later turns.
fn publish_response_ids(response: &mut UnifiedResponse, id_map: &ToolCallIdMap) {
    for part in &mut response.content {
        if let UnifiedContent::ToolUse { id, .. } = part {
            let client_id = generate_call_id();
            let upstream_id = std::mem::replace(id, client_id.clone());
            id_map.insert(client_id, upstream_id);
        }
    }
}

/// Run the sublanguage parser over an injected response's text.
///
/// A response already carrying native tool calls wins outright and its
/// text is left untouched.
fn extract_tool_calls(response: &mut UnifiedResponse) {
    if response.has_tool_calls() {
        log::debug!("Response carries native tool calls; skipping sublanguage extraction");
        return;
    }

    let mut content = Vec::with_capacity(response.content.len());
    let mut extracted = false;

    for part in std::mem::take(&mut response.content) {
        match part {
            UnifiedContent::Text { text } => {
                for segment in parser::parse_message(&text) {
                    match segment {
                        Segment::Text(text) => content.push(UnifiedContent::Text { text }),
                        Segment::ToolCall(invocation) => {
                            extracted = true;
                            content.push(UnifiedContent::ToolUse {
                                id: invocation.id,
                                name: invocation.name,
                                input: invocation.input,
                            });
                        }
                    }
                }
            }
            other => content.push(other),
        }
    }

    response.content = content;

    if extracted {
        response.finish_reason = crate::messages::unified::UnifiedFinishReason::ToolCalls;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::messages::unified::{UnifiedDelta, UnifiedFinishReason, UnifiedTool};

    struct ScriptedProvider {
        name: String,
        attempts: Arc<Mutex<Vec<String>>>,
        outcome: Outcome,
    }

    #[derive(Clone)]
    enum Outcome {
        Ok(Vec<UnifiedContent>),
        Err(fn() -> LlmError),
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, _request: UnifiedRequest) -> crate::Result<UnifiedResponse> {
            self.attempts.lock().unwrap().push(self.name.clone());

            match &self.outcome {
                Outcome::Ok(content) => Ok(UnifiedResponse {
                    id: "resp-1".into(),
                    model: "stub-model".into(),
                    content: content.clone(),
                    finish_reason: UnifiedFinishReason::Stop,
                    usage: Default::default(),
                }),
                Outcome::Err(make) => Err(make()),
            }
        }

        async fn chat_stream(&self, _request: UnifiedRequest) -> crate::Result<DeltaStream> {
            self.attempts.lock().unwrap().push(self.name.clone());

            match &self.outcome {
                Outcome::Ok(_) => Ok(Box::pin(futures::stream::iter(vec![
                    Ok(UnifiedDelta::Text("ok".into())),
                    Ok(UnifiedDelta::Done {
                        finish_reason: UnifiedFinishReason::Stop,
                        usage: None,
                    }),
                ]))),
                Outcome::Err(make) => Err(make()),
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn scripted_server(
        toml: &str,
        outcomes: Vec<(&'static str, Outcome)>,
    ) -> (ProxyServer, Arc<Mutex<Vec<String>>>) {
        let config: Config = toml::from_str(toml).expect("valid config");
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let recorded = attempts.clone();

        let factory: ProviderFactory = Box::new(move |service, _key, _client| {
            let outcome = outcomes
                .iter()
                .find(|(name, _)| *name == service.name)
                .map(|(_, outcome)| outcome.clone())
                .expect("provider for configured service");

            Box::new(ScriptedProvider {
                name: service.name.clone(),
                attempts: recorded.clone(),
                outcome,
            })
        });

        (
            ProxyServer::with_factory(ConfigWatcher::new(config), factory),
            attempts,
        )
    }

    fn user_request(model: &str) -> UnifiedRequest {
        UnifiedRequest {
            model: model.into(),
            messages: vec![UnifiedMessage::text(UnifiedRole::User, "hi")],
            system: None,
            tools: None,
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop_sequences: None,
            reasoning_effort: None,
        }
    }

    const TWO_TIER: &str = r#"
        [[upstream_services]]
        name = "backup"
        service_type = "openai"
        api_key = "sk-b"
        priority = 50
        models = ["gpt-4"]

        [[upstream_services]]
        name = "primary"
        service_type = "openai"
        api_key = "sk-a"
        priority = 100
        models = ["gpt-4"]
    "#;

    #[tokio::test]
    async fn rate_limited_primary_fails_over_to_backup() {
        let (server, attempts) = scripted_server(
            TWO_TIER,
            vec![
                ("primary", Outcome::Err(|| LlmError::RateLimited {
                    message: "slow down".into(),
                })),
                ("backup", Outcome::Ok(vec![UnifiedContent::Text { text: "hello".into() }])),
            ],
        );

        let response = server
            .completion(user_request("gpt-4"), &RequestContext::default())
            .await
            .expect("backup should succeed");

        assert_eq!(*attempts.lock().unwrap(), vec!["primary", "backup"]);
        assert!(matches!(&response.content[0], UnifiedContent::Text { text } if text == "hello"));
    }

    #[tokio::test]
    async fn non_retriable_errors_stop_the_attempt_sequence() {
        let (server, attempts) = scripted_server(
            TWO_TIER,
            vec![
                ("primary", Outcome::Err(|| LlmError::UpstreamRefused {
                    status: 401,
                    message: "bad key".into(),
                })),
                ("backup", Outcome::Ok(vec![])),
            ],
        );

        let error = server
            .completion(user_request("gpt-4"), &RequestContext::default())
            .await
            .expect_err("401 must be terminal");

        assert_eq!(*attempts.lock().unwrap(), vec!["primary"]);
        assert!(matches!(error, LlmError::UpstreamRefused { status: 401, .. }));
    }

    #[tokio::test]
    async fn exhausting_every_candidate_reports_the_last_error() {
        let (server, attempts) = scripted_server(
            TWO_TIER,
            vec![
                ("primary", Outcome::Err(|| LlmError::Connection("refused".into()))),
                ("backup", Outcome::Err(|| LlmError::RateLimited {
                    message: "still slow".into(),
                })),
            ],
        );

        let error = server
            .completion(user_request("gpt-4"), &RequestContext::default())
            .await
            .expect_err("both candidates fail");

        assert_eq!(*attempts.lock().unwrap(), vec!["primary", "backup"]);
        let LlmError::UpstreamExhausted { last } = error else {
            panic!("expected exhaustion, got {error:?}");
        };
        assert!(last.contains("still slow"));
    }

    #[tokio::test]
    async fn unknown_models_are_rejected_up_front() {
        let (server, attempts) = scripted_server(TWO_TIER, vec![]);

        let error = server
            .completion(user_request("unknown"), &RequestContext::default())
            .await
            .expect_err("no candidate advertises the model");

        assert!(attempts.lock().unwrap().is_empty());
        assert!(matches!(error, LlmError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn injected_responses_get_sublanguage_extraction() {
        const INJECTED: &str = r#"
            [features]
            inject_function_calling = true

            [[upstream_services]]
            name = "prompt-only"
            service_type = "openai"
            api_key = "sk-a"
            models = ["gpt-4"]
        "#;

        let xml = "Sure.<tool_call><name>get_weather</name><arguments>{\"city\":\"Tokyo\"}</arguments></tool_call>";
        let (server, _) = scripted_server(
            INJECTED,
            vec![("prompt-only", Outcome::Ok(vec![UnifiedContent::Text { text: xml.into() }]))],
        );

        let mut request = user_request("gpt-4");
        request.tools = Some(vec![UnifiedTool {
            name: "get_weather".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);

        let response = server
            .completion(request, &RequestContext::default())
            .await
            .expect("request should succeed");

        assert_eq!(response.finish_reason, UnifiedFinishReason::ToolCalls);
        assert!(matches!(&response.content[0], UnifiedContent::Text { text } if text == "Sure."));

        let UnifiedContent::ToolUse { id, name, input } = &response.content[1] else {
            panic!("expected extracted tool use");
        };
        assert!(id.starts_with("call_"));
        assert_eq!(name, "get_weather");
        assert_eq!(input, &serde_json::json!({"city": "Tokyo"}));
    }

    #[tokio::test]
    async fn native_tool_calls_suppress_sublanguage_extraction() {
        const INJECTED: &str = r#"
            [features]
            inject_function_calling = true

            [[upstream_services]]
            name = "prompt-only"
            service_type = "openai"
            api_key = "sk-a"
            models = ["gpt-4"]
        "#;

        let (server, _) = scripted_server(
            INJECTED,
            vec![(
                "prompt-only",
                Outcome::Ok(vec![
                    UnifiedContent::ToolUse {
                        id: "native_1".into(),
                        name: "f".into(),
                        input: serde_json::json!({}),
                    },
                    UnifiedContent::Text {
                        text: "<tool_call><name>ghost</name><arguments>{}</arguments></tool_call>".into(),
                    },
                ]),
            )],
        );

        let mut request = user_request("gpt-4");
        request.tools = Some(vec![UnifiedTool {
            name: "f".into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }]);

        let response = server
            .completion(request, &RequestContext::default())
            .await
            .expect("request should succeed");

        // Native wins; the XML text is left exactly as the upstream sent it.
        let tool_parts = response
            .content
            .iter()
            .filter(|part| matches!(part, UnifiedContent::ToolUse { .. }))
            .count();
        assert_eq!(tool_parts, 1);
        assert!(matches!(
            &response.content[1],
            UnifiedContent::Text { text } if text.contains("<tool_call>")
        ));
    }

    #[tokio::test]
    async fn native_response_ids_are_replaced_and_mapped() {
        let (server, _) = scripted_server(
            TWO_TIER,
            vec![
                ("primary", Outcome::Ok(vec![UnifiedContent::ToolUse {
                    id: "toolu_upstream".into(),
                    name: "f".into(),
                    input: serde_json::json!({}),
                }])),
                ("backup", Outcome::Ok(vec![])),
            ],
        );

        let response = server
            .completion(user_request("gpt-4"), &RequestContext::default())
            .await
            .expect("request should succeed");

        let UnifiedContent::ToolUse { id, .. } = &response.content[0] else {
            panic!("expected tool use");
        };
        assert!(id.starts_with("call_"));
        assert_eq!(server.id_map.get(id).as_deref(), Some("toolu_upstream"));
    }

    #[test]
    fn flattened_history_renders_the_sublanguage() {
        let mut messages = vec![
            UnifiedMessage {
                role: UnifiedRole::Assistant,
                content: UnifiedContentContainer::Text("Checking.".into()),
                tool_calls: Some(vec![crate::messages::unified::UnifiedToolCall {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    arguments: "{\"city\":\"Tokyo\"}".into(),
                }]),
                tool_call_id: None,
            },
            {
                let mut msg = UnifiedMessage::text(UnifiedRole::Tool, "sunny");
                msg.tool_call_id = Some("call_1".into());
                msg
            },
        ];

        flatten_tool_history(&mut messages);

        let UnifiedContentContainer::Text(assistant) = &messages[0].content else {
            panic!("expected text content");
        };
        assert!(assistant.starts_with("Checking.\n<tool_call>"));
        assert!(assistant.contains("<name>get_weather</name>"));

        assert_eq!(messages[1].role, UnifiedRole::User);
        let UnifiedContentContainer::Text(result) = &messages[1].content else {
            panic!("expected text content");
        };
        assert_eq!(result, "<tool_result>\nsunny\n</tool_result>");
    }
}
