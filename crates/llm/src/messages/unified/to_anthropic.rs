//! Conversions from unified types to the Anthropic protocol.

use serde_json::Value;

use crate::messages::{anthropic, unified};

/// The Messages API requires `max_tokens`; used when the client sent none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

fn content_into_block(part: unified::UnifiedContent) -> anthropic::ContentBlock {
    match part {
        unified::UnifiedContent::Text { text } => anthropic::ContentBlock::Text { text },
        unified::UnifiedContent::Image { source } => anthropic::ContentBlock::Image {
            source: match source {
                unified::UnifiedImageSource::Base64 { media_type, data } => {
                    anthropic::ImageSource::Base64 { media_type, data }
                }
                unified::UnifiedImageSource::Url { url } => anthropic::ImageSource::Url { url },
            },
        },
        unified::UnifiedContent::ToolUse { id, name, input } => {
            anthropic::ContentBlock::ToolUse { id, name, input }
        }
        unified::UnifiedContent::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content: anthropic::ToolResultContent::Text(content),
            is_error,
        },
    }
}

/// Parse an OpenAI-style argument string, keeping failures visible.
fn parse_arguments(arguments: String) -> Value {
    serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
}

fn message_into_blocks(msg: unified::UnifiedMessage) -> (anthropic::MessageRole, Vec<anthropic::ContentBlock>) {
    match msg.role {
        unified::UnifiedRole::Tool => {
            let block = anthropic::ContentBlock::ToolResult {
                tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                content: anthropic::ToolResultContent::Text(msg.text_content()),
                is_error: None,
            };

            (anthropic::MessageRole::User, vec![block])
        }
        role => {
            let wire_role = match role {
                unified::UnifiedRole::Assistant => anthropic::MessageRole::Assistant,
                _ => anthropic::MessageRole::User,
            };

            let mut blocks = match msg.content {
                unified::UnifiedContentContainer::Text(text) => {
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![anthropic::ContentBlock::Text { text }]
                    }
                }
                unified::UnifiedContentContainer::Blocks(parts) => {
                    parts.into_iter().map(content_into_block).collect()
                }
            };

            for call in msg.tool_calls.into_iter().flatten() {
                blocks.push(anthropic::ContentBlock::ToolUse {
                    id: call.id,
                    name: call.name,
                    input: parse_arguments(call.arguments),
                });
            }

            (wire_role, blocks)
        }
    }
}

impl From<unified::UnifiedRequest> for anthropic::MessagesRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        // The wire wants alternating roles; adjacent same-role outputs
        // (e.g. a tool result followed by user text) merge into one message.
        let mut messages: Vec<anthropic::InputMessage> = Vec::with_capacity(req.messages.len());

        for msg in req.messages {
            let (role, blocks) = message_into_blocks(msg);

            if blocks.is_empty() {
                continue;
            }

            match messages.last_mut() {
                Some(last) if last.role == role => {
                    let anthropic::InputContent::Blocks(existing) = &mut last.content else {
                        unreachable!("messages are always built with block content");
                    };
                    existing.extend(blocks);
                }
                _ => messages.push(anthropic::InputMessage {
                    role,
                    content: anthropic::InputContent::Blocks(blocks),
                }),
            }
        }

        Self {
            model: req.model,
            messages,
            system: req.system.map(anthropic::SystemPrompt::Text),
            max_tokens: Some(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| anthropic::ToolDefinition {
                        name: tool.name,
                        description: tool.description,
                        input_schema: tool.parameters,
                    })
                    .collect()
            }),
            thinking: req.reasoning_effort.map(|effort| anthropic::ThinkingConfig::Enabled {
                budget_tokens: effort.budget_tokens(),
            }),
        }
    }
}

impl From<unified::UnifiedResponse> for anthropic::MessagesResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        let stop_reason = anthropic::StopReason::from(resp.finish_reason);

        Self {
            id: resp.id,
            response_type: anthropic::ResponseType::Message,
            role: anthropic::MessageRole::Assistant,
            content: resp.content.into_iter().map(content_into_block).collect(),
            model: resp.model,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: resp.usage.into(),
        }
    }
}
