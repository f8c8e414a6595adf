//! Conversions from unified types to the Gemini protocol.

use serde_json::Value;

use crate::messages::{gemini, unified};

/// Remove JSON-Schema fields the Gemini API rejects.
fn sanitize_schema(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("additionalProperties");
        obj.remove("$schema");
        obj.remove("default");

        if let Some(properties) = obj.get_mut("properties")
            && let Some(props) = properties.as_object_mut()
        {
            for (_, prop) in props.iter_mut() {
                *prop = sanitize_schema(prop.take());
            }
        }

        if let Some(items) = obj.get_mut("items") {
            *items = sanitize_schema(items.take());
        }
    }

    value
}

/// Look up the function name an earlier assistant turn used for a call ID.
fn call_name_for<'a>(messages: &'a [unified::UnifiedMessage], call_id: &str) -> Option<&'a str> {
    for msg in messages.iter().rev() {
        if let unified::UnifiedContentContainer::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let unified::UnifiedContent::ToolUse { id, name, .. } = block
                    && id == call_id
                {
                    return Some(name);
                }
            }
        }

        for call in msg.tool_calls.iter().flatten() {
            if call.id == call_id {
                return Some(&call.name);
            }
        }
    }

    None
}

/// Function responses must be JSON objects; anything else gets wrapped.
fn response_object(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value) if value.is_object() => value,
        _ => serde_json::json!({ "result": content }),
    }
}

fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or(Value::Object(serde_json::Map::new()))
}

impl From<unified::UnifiedRequest> for gemini::GenerateContentRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let mut contents = Vec::with_capacity(req.messages.len());

        for (position, msg) in req.messages.iter().enumerate() {
            match msg.role {
                unified::UnifiedRole::Tool => {
                    let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_name_for(&req.messages[..position], call_id)
                        .unwrap_or_else(|| {
                            log::warn!("No earlier call found for tool result '{call_id}'");
                            "unknown_function"
                        })
                        .to_string();

                    contents.push(gemini::Content {
                        role: Some(gemini::ContentRole::User),
                        parts: vec![gemini::Part {
                            function_response: Some(gemini::FunctionResponse {
                                name,
                                response: response_object(&msg.text_content()),
                            }),
                            ..Default::default()
                        }],
                    });
                }
                role => {
                    let wire_role = match role {
                        unified::UnifiedRole::Assistant => gemini::ContentRole::Model,
                        _ => gemini::ContentRole::User,
                    };

                    let mut parts = Vec::new();

                    match &msg.content {
                        unified::UnifiedContentContainer::Text(text) => {
                            if !text.is_empty() {
                                parts.push(gemini::Part::text(text.clone()));
                            }
                        }
                        unified::UnifiedContentContainer::Blocks(blocks) => {
                            for block in blocks {
                                match block {
                                    unified::UnifiedContent::Text { text } => {
                                        parts.push(gemini::Part::text(text.clone()));
                                    }
                                    unified::UnifiedContent::Image { source } => match source {
                                        unified::UnifiedImageSource::Base64 { media_type, data } => {
                                            parts.push(gemini::Part {
                                                inline_data: Some(gemini::Blob {
                                                    mime_type: media_type.clone(),
                                                    data: data.clone(),
                                                }),
                                                ..Default::default()
                                            });
                                        }
                                        unified::UnifiedImageSource::Url { url } => {
                                            log::warn!("Dropping URL image part; the wire only takes inline data");
                                            let _ = url;
                                        }
                                    },
                                    unified::UnifiedContent::ToolUse { name, input, .. } => {
                                        let args = match input {
                                            Value::String(raw) => parse_arguments(raw),
                                            other => other.clone(),
                                        };
                                        parts.push(gemini::Part {
                                            function_call: Some(gemini::FunctionCall {
                                                name: name.clone(),
                                                args,
                                            }),
                                            ..Default::default()
                                        });
                                    }
                                    unified::UnifiedContent::ToolResult { content, .. } => {
                                        parts.push(gemini::Part {
                                            function_response: Some(gemini::FunctionResponse {
                                                name: "unknown_function".to_string(),
                                                response: response_object(content),
                                            }),
                                            ..Default::default()
                                        });
                                    }
                                }
                            }
                        }
                    }

                    for call in msg.tool_calls.iter().flatten() {
                        parts.push(gemini::Part {
                            function_call: Some(gemini::FunctionCall {
                                name: call.name.clone(),
                                args: parse_arguments(&call.arguments),
                            }),
                            ..Default::default()
                        });
                    }

                    if !parts.is_empty() {
                        contents.push(gemini::Content {
                            role: Some(wire_role),
                            parts,
                        });
                    }
                }
            }
        }

        let generation_config = gemini::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_tokens,
            stop_sequences: req.stop_sequences,
            thinking_config: req.reasoning_effort.map(|effort| gemini::ThinkingConfig {
                thinking_budget: effort.budget_tokens(),
            }),
        };

        Self {
            contents,
            system_instruction: req
                .system
                .map(|system| gemini::Content::text(None, system)),
            generation_config: Some(generation_config),
            tools: req.tools.map(|tools| {
                vec![gemini::GeminiTool {
                    function_declarations: tools
                        .into_iter()
                        .map(|tool| gemini::FunctionDeclaration {
                            name: tool.name,
                            description: tool.description,
                            parameters: Some(sanitize_schema(tool.parameters)),
                        })
                        .collect(),
                }]
            }),
        }
    }
}

impl From<unified::UnifiedResponse> for gemini::GenerateContentResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        let parts: Vec<gemini::Part> = resp
            .content
            .into_iter()
            .filter_map(|part| match part {
                unified::UnifiedContent::Text { text } => Some(gemini::Part::text(text)),
                unified::UnifiedContent::ToolUse { name, input, .. } => Some(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        name,
                        args: match input {
                            Value::String(raw) => Value::String(raw),
                            other => other,
                        },
                    }),
                    ..Default::default()
                }),
                _ => None,
            })
            .collect();

        Self {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some(gemini::ContentRole::Model),
                    parts,
                }),
                finish_reason: Some(resp.finish_reason.into()),
                index: Some(0),
            }],
            usage_metadata: Some(resp.usage.into()),
            model_version: Some(resp.model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{
        UnifiedContent, UnifiedContentContainer, UnifiedMessage, UnifiedRequest, UnifiedRole,
    };

    fn request_with(messages: Vec<UnifiedMessage>) -> UnifiedRequest {
        UnifiedRequest {
            model: "gemini-2.0-flash".into(),
            messages,
            system: Some("be helpful".into()),
            tools: None,
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop_sequences: None,
            reasoning_effort: None,
        }
    }

    #[test]
    fn tool_results_recover_the_function_name() {
        let assistant = UnifiedMessage {
            role: UnifiedRole::Assistant,
            content: UnifiedContentContainer::Blocks(vec![UnifiedContent::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: serde_json::json!({"city": "Tokyo"}),
            }]),
            tool_calls: None,
            tool_call_id: None,
        };

        let mut tool = UnifiedMessage::text(UnifiedRole::Tool, "sunny");
        tool.tool_call_id = Some("call_1".into());

        let wire = gemini::GenerateContentRequest::from(request_with(vec![assistant, tool]));

        let response = wire.contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "get_weather");
        assert_eq!(response.response, serde_json::json!({"result": "sunny"}));
    }

    #[test]
    fn schema_sanitizer_strips_rejected_fields() {
        let cleaned = sanitize_schema(serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "nested": {"type": "object", "additionalProperties": false},
                "list": {"type": "array", "items": {"default": 1, "type": "number"}}
            }
        }));

        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["nested"].get("additionalProperties").is_none());
        assert!(cleaned["properties"]["list"]["items"].get("default").is_none());
        assert_eq!(cleaned["type"], "object");
    }

    #[test]
    fn system_prompt_becomes_system_instruction() {
        let wire = gemini::GenerateContentRequest::from(request_with(vec![UnifiedMessage::text(
            UnifiedRole::User,
            "hi",
        )]));

        let instruction = wire.system_instruction.unwrap();
        assert_eq!(instruction.parts[0].text.as_deref(), Some("be helpful"));
        assert!(instruction.role.is_none());
    }
}
