//! Conversions from unified types to the OpenAI protocol.

use serde_json::Value;

use crate::messages::{openai, unified, unix_timestamp};

/// Render a tool-use input for the `arguments` string field.
///
/// A string input is the raw text of a failed JSON parse and is forwarded
/// verbatim so the client sees exactly what the model emitted.
pub(crate) fn arguments_string(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string()),
    }
}

impl From<unified::UnifiedRole> for openai::ChatRole {
    fn from(role: unified::UnifiedRole) -> Self {
        match role {
            unified::UnifiedRole::System => openai::ChatRole::System,
            unified::UnifiedRole::User => openai::ChatRole::User,
            unified::UnifiedRole::Assistant => openai::ChatRole::Assistant,
            unified::UnifiedRole::Tool => openai::ChatRole::Tool,
        }
    }
}

impl From<unified::UnifiedTool> for openai::Tool {
    fn from(tool: unified::UnifiedTool) -> Self {
        Self {
            tool_type: openai::ToolType::Function,
            function: openai::FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters,
            },
        }
    }
}

impl From<unified::UnifiedToolCall> for openai::ToolCall {
    fn from(call: unified::UnifiedToolCall) -> Self {
        Self {
            id: call.id,
            tool_type: openai::ToolType::Function,
            function: openai::FunctionCall {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

fn message_into_chat(msg: unified::UnifiedMessage) -> openai::ChatMessage {
    let mut tool_calls: Vec<openai::ToolCall> = msg
        .tool_calls
        .into_iter()
        .flatten()
        .map(openai::ToolCall::from)
        .collect();

    let content = match msg.content {
        unified::UnifiedContentContainer::Text(text) => {
            if text.is_empty() && msg.role == unified::UnifiedRole::Assistant {
                None
            } else {
                Some(openai::MessageContent::Text(text))
            }
        }
        unified::UnifiedContentContainer::Blocks(blocks) => {
            let mut parts = Vec::new();

            for block in blocks {
                match block {
                    unified::UnifiedContent::Text { text } => {
                        parts.push(openai::ContentPart::Text { text });
                    }
                    unified::UnifiedContent::Image { source } => {
                        let url = match source {
                            unified::UnifiedImageSource::Url { url } => url,
                            unified::UnifiedImageSource::Base64 { media_type, data } => {
                                format!("data:{media_type};base64,{data}")
                            }
                        };
                        parts.push(openai::ContentPart::ImageUrl {
                            image_url: openai::ImageUrl { url },
                        });
                    }
                    unified::UnifiedContent::ToolUse { id, name, input } => {
                        tool_calls.push(openai::ToolCall {
                            id,
                            tool_type: openai::ToolType::Function,
                            function: openai::FunctionCall {
                                name,
                                arguments: arguments_string(&input),
                            },
                        });
                    }
                    // Tool results travel as dedicated tool-role messages;
                    // a stray block degrades to its text.
                    unified::UnifiedContent::ToolResult { content, .. } => {
                        parts.push(openai::ContentPart::Text { text: content });
                    }
                }
            }

            if parts.is_empty() {
                None
            } else if parts.len() == 1
                && let openai::ContentPart::Text { text } = &parts[0]
            {
                Some(openai::MessageContent::Text(text.clone()))
            } else {
                Some(openai::MessageContent::Parts(parts))
            }
        }
    };

    openai::ChatMessage {
        role: msg.role.into(),
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: msg.tool_call_id,
    }
}

impl From<unified::UnifiedRequest> for openai::ChatCompletionRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        if let Some(system) = req.system {
            messages.push(openai::ChatMessage {
                role: openai::ChatRole::System,
                content: Some(openai::MessageContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        messages.extend(req.messages.into_iter().map(message_into_chat));

        Self {
            model: req.model,
            messages,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop: req.stop_sequences.map(openai::StopSequences::Many),
            stream: req.stream,
            tools: req.tools.map(|tools| tools.into_iter().map(openai::Tool::from).collect()),
            reasoning_effort: req.reasoning_effort.map(|effort| {
                match effort {
                    unified::ReasoningEffort::Low => "low",
                    unified::ReasoningEffort::Medium => "medium",
                    unified::ReasoningEffort::High => "high",
                }
                .to_string()
            }),
        }
    }
}

impl From<unified::UnifiedResponse> for openai::ChatCompletionResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in resp.content {
            match part {
                unified::UnifiedContent::Text { text: t } => text.push_str(&t),
                unified::UnifiedContent::ToolUse { id, name, input } => {
                    tool_calls.push(openai::ToolCall {
                        id,
                        tool_type: openai::ToolType::Function,
                        function: openai::FunctionCall {
                            name,
                            arguments: arguments_string(&input),
                        },
                    });
                }
                unified::UnifiedContent::Image { .. } | unified::UnifiedContent::ToolResult { .. } => {}
            }
        }

        Self {
            id: resp.id,
            object: openai::ObjectType::ChatCompletion,
            created: unix_timestamp(),
            model: resp.model,
            choices: vec![openai::ChatChoice {
                index: 0,
                message: openai::ChatMessage {
                    role: openai::ChatRole::Assistant,
                    content: if text.is_empty() { None } else { Some(openai::MessageContent::Text(text)) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                },
                finish_reason: resp.finish_reason.into(),
            }],
            usage: resp.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::{openai, unified};

    #[test]
    fn request_round_trips_semantically() {
        let original: openai::ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "weather?"},
                    {"role": "assistant", "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Tokyo\"}"}
                    }]},
                    {"role": "tool", "content": "sunny", "tool_call_id": "call_1"}
                ],
                "temperature": 0.5,
                "reasoning_effort": "medium",
                "tools": [{
                    "type": "function",
                    "function": {"name": "get_weather", "description": "d", "parameters": {"type": "object"}}
                }]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(original);
        let back = openai::ChatCompletionRequest::from(unified);

        assert_eq!(back.model, "gpt-4");
        assert_eq!(back.messages.len(), 4);
        assert_eq!(back.messages[0].role, openai::ChatRole::System);
        assert_eq!(back.messages[2].tool_calls.as_ref().unwrap()[0].id, "call_1");
        assert_eq!(back.messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(back.reasoning_effort.as_deref(), Some("medium"));
        assert_eq!(back.temperature, Some(0.5));
        assert_eq!(back.tools.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn raw_string_input_is_forwarded_verbatim() {
        let response = unified::UnifiedResponse {
            id: "resp".into(),
            model: "m".into(),
            content: vec![unified::UnifiedContent::ToolUse {
                id: "call_1".into(),
                name: "f".into(),
                input: serde_json::Value::String("{broken".into()),
            }],
            finish_reason: unified::UnifiedFinishReason::ToolCalls,
            usage: Default::default(),
        };

        let encoded = openai::ChatCompletionResponse::from(response);
        let call = &encoded.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.arguments, "{broken");
    }
}
