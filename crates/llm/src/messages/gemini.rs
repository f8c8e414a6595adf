//! Gemini generateContent wire types and streaming codec.
//!
//! Streaming responses are the same `GenerateContentResponse` shape sent as
//! SSE `data:` frames on the `streamGenerateContent` endpoint with
//! `alt=sse`. Function calls are never fragmented on this wire; a call
//! arrives (and is emitted) as one complete `functionCall` part.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::unified::{UnifiedDelta, UnifiedFinishReason, UnifiedUsage};
use crate::tooling::generate_call_id;

/// generateContent request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
}

/// A conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`; absent on system instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ContentRole>,
    pub parts: Vec<Part>,
}

impl Content {
    /// A single-text content with the given role.
    pub fn text(role: Option<ContentRole>, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::text(text)],
        }
    }
}

/// Turn role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

/// One part of a content.
///
/// The wire discriminates parts by which single field is present, so this
/// is a struct of options rather than an enum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Inline binary data, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// A model-issued function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A client-supplied function result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// Generation parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

/// Thinking-budget configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

/// Tool wrapper carrying function declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// One declared function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// generateContent response body; streaming chunks share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// One response candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<GeminiFinishReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Candidate finish reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeminiFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

impl From<GeminiFinishReason> for UnifiedFinishReason {
    fn from(reason: GeminiFinishReason) -> Self {
        match reason {
            GeminiFinishReason::Stop => UnifiedFinishReason::Stop,
            GeminiFinishReason::MaxTokens => UnifiedFinishReason::Length,
            GeminiFinishReason::Safety | GeminiFinishReason::Recitation => UnifiedFinishReason::ContentFilter,
            GeminiFinishReason::Other => UnifiedFinishReason::Stop,
        }
    }
}

impl From<UnifiedFinishReason> for GeminiFinishReason {
    fn from(reason: UnifiedFinishReason) -> Self {
        match reason {
            UnifiedFinishReason::Length => GeminiFinishReason::MaxTokens,
            UnifiedFinishReason::ContentFilter => GeminiFinishReason::Safety,
            // The wire has no tool-call finish reason; a call-bearing
            // candidate still finishes with STOP.
            UnifiedFinishReason::Stop | UnifiedFinishReason::ToolCalls | UnifiedFinishReason::Error => {
                GeminiFinishReason::Stop
            }
        }
    }
}

/// Token accounting block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl From<UsageMetadata> for UnifiedUsage {
    fn from(usage: UsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

impl From<UnifiedUsage> for UsageMetadata {
    fn from(usage: UnifiedUsage) -> Self {
        Self {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens,
            total_token_count: usage.total_tokens,
        }
    }
}

/// Error body returned by the Gemini API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorPayload,
}

/// Error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(code: u16, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorPayload {
                code,
                message: message.into(),
                status: status.into(),
            },
        }
    }
}

/// Encodes a unified delta sequence as streaming response chunks.
///
/// Argument fragments are buffered until the call ends because the wire
/// carries function calls whole.
#[derive(Default)]
pub struct StreamEncoder {
    model: String,
    pending_call: Option<PendingCall>,
}

struct PendingCall {
    name: String,
    arguments: String,
}

impl StreamEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            pending_call: None,
        }
    }

    fn chunk(&self, parts: Vec<Part>, finish_reason: Option<GeminiFinishReason>, usage: Option<UsageMetadata>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some(ContentRole::Model),
                    parts,
                }),
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: usage,
            model_version: Some(self.model.clone()),
        }
    }

    pub fn encode(&mut self, delta: &UnifiedDelta) -> Vec<GenerateContentResponse> {
        match delta {
            UnifiedDelta::Text(text) => vec![self.chunk(vec![Part::text(text.clone())], None, None)],
            UnifiedDelta::ToolCallStart { name, .. } => {
                self.pending_call = Some(PendingCall {
                    name: name.clone(),
                    arguments: String::new(),
                });
                vec![]
            }
            UnifiedDelta::ToolCallArguments { fragment, .. } => {
                if let Some(call) = self.pending_call.as_mut() {
                    call.arguments.push_str(fragment);
                }
                vec![]
            }
            UnifiedDelta::ToolCallEnd { .. } => {
                let Some(call) = self.pending_call.take() else {
                    return vec![];
                };

                let args = serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::String(call.arguments));

                vec![self.chunk(
                    vec![Part {
                        function_call: Some(FunctionCall { name: call.name, args }),
                        ..Default::default()
                    }],
                    None,
                    None,
                )]
            }
            UnifiedDelta::Done { finish_reason, usage } => vec![self.chunk(
                vec![],
                Some(GeminiFinishReason::from(*finish_reason)),
                usage.map(UsageMetadata::from),
            )],
        }
    }
}

/// Decodes streaming response chunks into unified deltas.
#[derive(Default)]
pub struct StreamDecoder {
    next_tool_index: usize,
    finish_reason: Option<GeminiFinishReason>,
    usage: Option<UsageMetadata>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: GenerateContentResponse) -> Vec<UnifiedDelta> {
        let mut deltas = Vec::new();

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage);
        }

        for candidate in chunk.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text
                        && !text.is_empty()
                    {
                        deltas.push(UnifiedDelta::Text(text));
                    }

                    if let Some(call) = part.function_call {
                        let index = self.next_tool_index;
                        self.next_tool_index += 1;

                        let fragment = serde_json::to_string(&call.args)
                            .unwrap_or_else(|_| "{}".to_string());

                        deltas.push(UnifiedDelta::ToolCallStart {
                            index,
                            id: generate_call_id(),
                            name: call.name,
                        });
                        deltas.push(UnifiedDelta::ToolCallArguments { index, fragment });
                        deltas.push(UnifiedDelta::ToolCallEnd { index });
                    }
                }
            }

            if let Some(reason) = candidate.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        deltas
    }

    /// Close the stream once the upstream connection ends.
    pub fn finish(&mut self) -> Vec<UnifiedDelta> {
        let finish_reason = match self.finish_reason.take() {
            _ if self.next_tool_index > 0 => UnifiedFinishReason::ToolCalls,
            Some(reason) => UnifiedFinishReason::from(reason),
            None => UnifiedFinishReason::Stop,
        };

        vec![UnifiedDelta::Done {
            finish_reason,
            usage: self.usage.take().map(UnifiedUsage::from),
        }]
    }
}
