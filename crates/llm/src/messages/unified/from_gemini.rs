//! Conversions from Gemini protocol types to unified types.
//!
//! The wire has no tool-call identifiers; calls correlate to their results
//! by function name. Fresh IDs are synthesized for every `functionCall`
//! part and results reuse the latest ID recorded for their name.

use std::collections::HashMap;

use crate::messages::{gemini, unified};
use crate::tooling::generate_call_id;

fn system_text(content: gemini::Content) -> String {
    content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<gemini::GenerateContentRequest> for unified::UnifiedRequest {
    fn from(req: gemini::GenerateContentRequest) -> Self {
        let mut messages = Vec::with_capacity(req.contents.len());
        // name → latest synthesized call id, for correlating results.
        let mut call_ids: HashMap<String, String> = HashMap::new();

        for content in req.contents {
            let role = match content.role {
                Some(gemini::ContentRole::Model) => unified::UnifiedRole::Assistant,
                _ => unified::UnifiedRole::User,
            };

            let mut blocks = Vec::with_capacity(content.parts.len());

            for part in content.parts {
                if let Some(text) = part.text {
                    blocks.push(unified::UnifiedContent::Text { text });
                }

                if let Some(blob) = part.inline_data {
                    blocks.push(unified::UnifiedContent::Image {
                        source: unified::UnifiedImageSource::Base64 {
                            media_type: blob.mime_type,
                            data: blob.data,
                        },
                    });
                }

                if let Some(call) = part.function_call {
                    let id = generate_call_id();
                    call_ids.insert(call.name.clone(), id.clone());
                    blocks.push(unified::UnifiedContent::ToolUse {
                        id,
                        name: call.name,
                        input: call.args,
                    });
                }

                if let Some(response) = part.function_response {
                    if !blocks.is_empty() {
                        messages.push(unified::UnifiedMessage {
                            role,
                            content: unified::UnifiedContentContainer::Blocks(std::mem::take(&mut blocks)),
                            tool_calls: None,
                            tool_call_id: None,
                        });
                    }

                    let id = call_ids
                        .get(&response.name)
                        .cloned()
                        .unwrap_or_else(generate_call_id);

                    let content = serde_json::to_string(&response.response)
                        .unwrap_or_else(|_| "{}".to_string());

                    let mut message = unified::UnifiedMessage::text(unified::UnifiedRole::Tool, content);
                    message.tool_call_id = Some(id);
                    messages.push(message);
                }
            }

            if !blocks.is_empty() {
                messages.push(unified::UnifiedMessage {
                    role,
                    content: unified::UnifiedContentContainer::Blocks(blocks),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }

        let config = req.generation_config.unwrap_or_default();

        Self {
            // The model name rides in the URL path, not the body; the
            // handler fills it in after decoding.
            model: String::new(),
            messages,
            system: req.system_instruction.map(system_text),
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .flat_map(|tool| tool.function_declarations)
                    .map(|decl| unified::UnifiedTool {
                        name: decl.name,
                        description: decl.description,
                        parameters: decl.parameters.unwrap_or(serde_json::json!({"type": "object"})),
                    })
                    .collect()
            }),
            stream: None,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_output_tokens,
            stop_sequences: config.stop_sequences,
            reasoning_effort: config
                .thinking_config
                .map(|thinking| unified::ReasoningEffort::from_budget_tokens(thinking.thinking_budget)),
        }
    }
}

impl From<gemini::GenerateContentResponse> for unified::UnifiedResponse {
    fn from(resp: gemini::GenerateContentResponse) -> Self {
        let mut content = Vec::new();
        let mut finish_reason = unified::UnifiedFinishReason::Stop;

        if let Some(candidate) = resp.candidates.into_iter().next() {
            if let Some(reason) = candidate.finish_reason {
                finish_reason = reason.into();
            }

            for part in candidate.content.into_iter().flat_map(|c| c.parts) {
                if let Some(text) = part.text {
                    content.push(unified::UnifiedContent::Text { text });
                }

                if let Some(call) = part.function_call {
                    content.push(unified::UnifiedContent::ToolUse {
                        id: generate_call_id(),
                        name: call.name,
                        input: call.args,
                    });
                }
            }
        }

        if content
            .iter()
            .any(|part| matches!(part, unified::UnifiedContent::ToolUse { .. }))
        {
            finish_reason = unified::UnifiedFinishReason::ToolCalls;
        }

        Self {
            id: format!("gen-{}", uuid::Uuid::new_v4().simple()),
            model: resp.model_version.unwrap_or_default(),
            content,
            finish_reason,
            usage: resp.usage_metadata.map(Into::into).unwrap_or_default(),
        }
    }
}
