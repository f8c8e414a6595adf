//! Conversions from OpenAI protocol types to unified types.

use crate::messages::{openai, unified};

impl From<openai::ChatRole> for unified::UnifiedRole {
    fn from(role: openai::ChatRole) -> Self {
        match role {
            openai::ChatRole::System => unified::UnifiedRole::System,
            openai::ChatRole::User => unified::UnifiedRole::User,
            openai::ChatRole::Assistant => unified::UnifiedRole::Assistant,
            openai::ChatRole::Tool => unified::UnifiedRole::Tool,
        }
    }
}

impl From<openai::MessageContent> for unified::UnifiedContentContainer {
    fn from(content: openai::MessageContent) -> Self {
        match content {
            openai::MessageContent::Text(text) => unified::UnifiedContentContainer::Text(text),
            openai::MessageContent::Parts(parts) => unified::UnifiedContentContainer::Blocks(
                parts
                    .into_iter()
                    .map(|part| match part {
                        openai::ContentPart::Text { text } => unified::UnifiedContent::Text { text },
                        openai::ContentPart::ImageUrl { image_url } => unified::UnifiedContent::Image {
                            source: unified::UnifiedImageSource::Url { url: image_url.url },
                        },
                    })
                    .collect(),
            ),
        }
    }
}

impl From<openai::ChatMessage> for unified::UnifiedMessage {
    fn from(msg: openai::ChatMessage) -> Self {
        let content = msg
            .content
            .map(unified::UnifiedContentContainer::from)
            .unwrap_or(unified::UnifiedContentContainer::Text(String::new()));

        let tool_calls = msg.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| unified::UnifiedToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect()
        });

        Self {
            role: unified::UnifiedRole::from(msg.role),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<openai::ChatCompletionRequest> for unified::UnifiedRequest {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        let mut system_content = Vec::with_capacity(1);
        let mut messages = Vec::with_capacity(req.messages.len());

        for msg in req.messages {
            if msg.role == openai::ChatRole::System {
                if let Some(content) = msg.content {
                    system_content.push(match content {
                        openai::MessageContent::Text(text) => text,
                        parts => unified::UnifiedMessage {
                            role: unified::UnifiedRole::System,
                            content: parts.into(),
                            tool_calls: None,
                            tool_call_id: None,
                        }
                        .text_content(),
                    });
                }
            } else {
                messages.push(unified::UnifiedMessage::from(msg));
            }
        }

        let system = if system_content.is_empty() {
            None
        } else {
            Some(system_content.join("\n"))
        };

        let reasoning_effort = req.reasoning_effort.as_deref().and_then(|effort| match effort {
            "low" => Some(unified::ReasoningEffort::Low),
            "medium" => Some(unified::ReasoningEffort::Medium),
            "high" => Some(unified::ReasoningEffort::High),
            other => {
                log::warn!("Ignoring unknown reasoning_effort value '{other}'");
                None
            }
        });

        Self {
            model: req.model,
            messages,
            system,
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| unified::UnifiedTool {
                        name: tool.function.name,
                        description: tool.function.description,
                        parameters: tool.function.parameters,
                    })
                    .collect()
            }),
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop_sequences: req.stop.map(openai::StopSequences::into_vec),
            reasoning_effort,
        }
    }
}

impl From<openai::ChatCompletionResponse> for unified::UnifiedResponse {
    fn from(resp: openai::ChatCompletionResponse) -> Self {
        let mut content = Vec::new();
        let mut finish_reason = unified::UnifiedFinishReason::Stop;

        if let Some(choice) = resp.choices.into_iter().next() {
            finish_reason = choice.finish_reason.into();

            if let Some(message_content) = choice.message.content {
                let text = match message_content {
                    openai::MessageContent::Text(text) => text,
                    openai::MessageContent::Parts(parts) => parts
                        .into_iter()
                        .filter_map(|part| match part {
                            openai::ContentPart::Text { text } => Some(text),
                            openai::ContentPart::ImageUrl { .. } => None,
                        })
                        .collect(),
                };

                if !text.is_empty() {
                    content.push(unified::UnifiedContent::Text { text });
                }
            }

            for call in choice.message.tool_calls.into_iter().flatten() {
                // Keep malformed arguments visible as a raw string.
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(serde_json::Value::String(call.function.arguments));

                content.push(unified::UnifiedContent::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input,
                });
            }
        }

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
    use crate::messages::unified::{UnifiedContent, UnifiedContentContainer, UnifiedRole};

    #[test]
    fn system_messages_move_to_the_system_field() {
        let request: openai::ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(request);
        assert_eq!(unified.system.as_deref(), Some("be brief"));
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].role, UnifiedRole::User);
    }

    #[test]
    fn malformed_tool_arguments_survive_as_raw_strings() {
        let response: openai::ChatCompletionResponse = serde_json::from_str(
            r#"{
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 0,
                "model": "gpt-4",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "f", "arguments": "{not json"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedResponse::from(response);
        let UnifiedContent::ToolUse { input, .. } = &unified.content[0] else {
            panic!("expected a tool use part");
        };
        assert_eq!(input, &serde_json::Value::String("{not json".into()));
    }

    #[test]
    fn multi_part_content_keeps_part_order() {
        let message: openai::ChatMessage = serde_json::from_str(
            r#"{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look at"},
                    {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                    {"type": "text", "text": "this"}
                ]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedMessage::from(message);
        let UnifiedContentContainer::Blocks(blocks) = &unified.content else {
            panic!("expected block content");
        };

        assert!(matches!(blocks[0], UnifiedContent::Text { .. }));
        assert!(matches!(blocks[1], UnifiedContent::Image { .. }));
        assert!(matches!(blocks[2], UnifiedContent::Text { .. }));
    }
}
