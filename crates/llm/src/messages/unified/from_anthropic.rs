//! Conversions from Anthropic protocol types to unified types.

use crate::messages::{anthropic, unified};

fn block_into_content(block: anthropic::ContentBlock) -> unified::UnifiedContent {
    match block {
        anthropic::ContentBlock::Text { text } => unified::UnifiedContent::Text { text },
        anthropic::ContentBlock::Thinking { thinking } => unified::UnifiedContent::Text { text: thinking },
        anthropic::ContentBlock::Image { source } => unified::UnifiedContent::Image {
            source: match source {
                anthropic::ImageSource::Base64 { media_type, data } => {
                    unified::UnifiedImageSource::Base64 { media_type, data }
                }
                anthropic::ImageSource::Url { url } => unified::UnifiedImageSource::Url { url },
            },
        },
        anthropic::ContentBlock::ToolUse { id, name, input } => {
            unified::UnifiedContent::ToolUse { id, name, input }
        }
        anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => unified::UnifiedContent::ToolResult {
            tool_use_id,
            content: content.into_text(),
            is_error,
        },
    }
}

/// Split one wire message into unified messages.
///
/// Tool results ride inside user messages on this wire; they become
/// dedicated tool-role messages so every format encodes them natively,
/// with the surrounding parts kept in their original order.
fn split_message(msg: anthropic::InputMessage) -> Vec<unified::UnifiedMessage> {
    let role = match msg.role {
        anthropic::MessageRole::User => unified::UnifiedRole::User,
        anthropic::MessageRole::Assistant => unified::UnifiedRole::Assistant,
    };

    let blocks = match msg.content {
        anthropic::InputContent::Text(text) => {
            return vec![unified::UnifiedMessage::text(role, text)];
        }
        anthropic::InputContent::Blocks(blocks) => blocks,
    };

    let mut messages = Vec::with_capacity(1);
    let mut pending: Vec<unified::UnifiedContent> = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                if !pending.is_empty() {
                    messages.push(unified::UnifiedMessage {
                        role,
                        content: unified::UnifiedContentContainer::Blocks(std::mem::take(&mut pending)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }

                let mut message =
                    unified::UnifiedMessage::text(unified::UnifiedRole::Tool, content.into_text());
                message.tool_call_id = Some(tool_use_id);
                messages.push(message);
            }
            other => pending.push(block_into_content(other)),
        }
    }

    if !pending.is_empty() || messages.is_empty() {
        messages.push(unified::UnifiedMessage {
            role,
            content: unified::UnifiedContentContainer::Blocks(pending),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages
}

impl From<anthropic::MessagesRequest> for unified::UnifiedRequest {
    fn from(req: anthropic::MessagesRequest) -> Self {
        let reasoning_effort = req.thinking.and_then(|thinking| match thinking {
            anthropic::ThinkingConfig::Enabled { budget_tokens } => {
                Some(unified::ReasoningEffort::from_budget_tokens(budget_tokens))
            }
            anthropic::ThinkingConfig::Disabled {} => None,
        });

        Self {
            model: req.model,
            messages: req.messages.into_iter().flat_map(split_message).collect(),
            system: req.system.map(anthropic::SystemPrompt::into_text),
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| unified::UnifiedTool {
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.input_schema,
                    })
                    .collect()
            }),
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop_sequences: req.stop_sequences,
            reasoning_effort,
        }
    }
}

impl From<anthropic::MessagesResponse> for unified::UnifiedResponse {
    fn from(resp: anthropic::MessagesResponse) -> Self {
        let content: Vec<unified::UnifiedContent> =
            resp.content.into_iter().map(block_into_content).collect();

        let finish_reason = resp
            .stop_reason
            .map(unified::UnifiedFinishReason::from)
            .unwrap_or(unified::UnifiedFinishReason::Stop);

        Self {
            id: resp.id,
            model: resp.model,
            content,
            finish_reason,
            usage: resp.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedRole, UnifiedContent, UnifiedContentContainer};

    #[test]
    fn tool_results_become_tool_role_messages() {
        let request: anthropic::MessagesRequest = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-20250514",
                "max_tokens": 1024,
                "messages": [
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "call_9", "content": "sunny"},
                        {"type": "text", "text": "and tomorrow?"}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(request);
        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, UnifiedRole::Tool);
        assert_eq!(unified.messages[0].tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(unified.messages[1].role, UnifiedRole::User);
    }

    #[test]
    fn thinking_budget_buckets_into_reasoning_effort() {
        let request: anthropic::MessagesRequest = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-20250514",
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": "hi"}],
                "thinking": {"type": "enabled", "budget_tokens": 8192}
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(request);
        assert_eq!(unified.reasoning_effort, Some(unified::ReasoningEffort::Medium));
    }

    #[test]
    fn response_content_order_is_preserved() {
        let response: anthropic::MessagesResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "text", "text": "let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Tokyo"}},
                    {"type": "text", "text": "done"}
                ],
                "stop_reason": "tool_use",
                "stop_sequence": null,
                "usage": {"input_tokens": 10, "output_tokens": 20}
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedResponse::from(response);
        assert!(matches!(unified.content[0], UnifiedContent::Text { .. }));
        assert!(matches!(unified.content[1], UnifiedContent::ToolUse { .. }));
        assert!(matches!(unified.content[2], UnifiedContent::Text { .. }));
        assert_eq!(unified.finish_reason, unified::UnifiedFinishReason::ToolCalls);
        assert_eq!(unified.usage.total_tokens, 30);
    }

    #[test]
    fn string_content_stays_a_plain_message() {
        let msg = anthropic::InputMessage {
            role: anthropic::MessageRole::User,
            content: anthropic::InputContent::Text("hello".into()),
        };

        let unified = split_message(msg);
        assert_eq!(unified.len(), 1);
        assert!(matches!(&unified[0].content, UnifiedContentContainer::Text(t) if t == "hello"));
    }
}
