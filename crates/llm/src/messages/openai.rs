//! OpenAI Chat Completions wire types and streaming codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::unified::{UnifiedDelta, UnifiedFinishReason, UnifiedUsage};

/// Chat completion request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model.
    pub model: String,

    /// Conversation messages.
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences; the wire accepts a bare string or a list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Reasoning effort knob, `low` / `medium` / `high`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Stop sequences accepted either as one string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,

    /// Either a bare string or typed parts; absent for assistant messages
    /// that only carry tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Bare string or ordered typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A typed content part of a multi-modal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image reference inside a content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// Either an HTTP(S) URL or a `data:` URI.
    pub url: String,
}

/// Tool declaration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDefinition,
}

/// The only tool type the Chat Completions API defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Function,
}

/// Function declaration carried inside a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

/// An assistant tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionCall,
}

/// The function name and its arguments as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Buffered chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: ObjectType,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
}

/// Response object discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "list")]
    List,
}

/// One response choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl From<FinishReason> for UnifiedFinishReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => UnifiedFinishReason::Stop,
            FinishReason::Length => UnifiedFinishReason::Length,
            FinishReason::ToolCalls => UnifiedFinishReason::ToolCalls,
            FinishReason::ContentFilter => UnifiedFinishReason::ContentFilter,
        }
    }
}

impl From<UnifiedFinishReason> for FinishReason {
    fn from(reason: UnifiedFinishReason) -> Self {
        match reason {
            UnifiedFinishReason::Stop | UnifiedFinishReason::Error => FinishReason::Stop,
            UnifiedFinishReason::Length => FinishReason::Length,
            UnifiedFinishReason::ToolCalls => FinishReason::ToolCalls,
            UnifiedFinishReason::ContentFilter => FinishReason::ContentFilter,
        }
    }
}

/// Token usage block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<Usage> for UnifiedUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<UnifiedUsage> for Usage {
    fn from(usage: UnifiedUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// One streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: ObjectType,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoiceDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    pub index: u32,
    pub delta: ChatMessageDelta,
    pub finish_reason: Option<FinishReason>,
}

/// Partial message content inside a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

/// Streaming tool-call updates.
///
/// The first frame for a call carries `id` and the function name; later
/// frames carry only argument fragments. The untagged split mirrors how the
/// wire distinguishes the two by field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingToolCall {
    Start {
        index: usize,
        id: String,
        #[serde(rename = "type")]
        tool_type: ToolType,
        function: FunctionStart,
    },
    Delta {
        index: usize,
        function: FunctionDelta,
    },
}

/// Function header in the first frame of a streaming call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStart {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Argument fragment in subsequent frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    pub arguments: String,
}

/// Model metadata returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: ObjectType,
    pub created: u64,
    pub owned_by: String,
}

/// Payload of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: ObjectType,
    pub data: Vec<Model>,
}

/// Encodes a unified delta sequence as Chat Completions chunks.
///
/// Driven once per delta; the caller wraps each produced chunk in an SSE
/// `data:` frame and appends the `[DONE]` marker after the stream ends.
pub struct StreamEncoder {
    id: String,
    model: String,
    created: u64,
    role_sent: bool,
}

impl StreamEncoder {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: u64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
            role_sent: false,
        }
    }

    fn chunk(&self, delta: ChatMessageDelta, finish_reason: Option<FinishReason>, usage: Option<Usage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    pub fn encode(&mut self, delta: &UnifiedDelta) -> Vec<ChatCompletionChunk> {
        let mut chunks = Vec::with_capacity(2);

        if !self.role_sent {
            self.role_sent = true;
            chunks.push(self.chunk(
                ChatMessageDelta {
                    role: Some(ChatRole::Assistant),
                    ..Default::default()
                },
                None,
                None,
            ));
        }

        match delta {
            UnifiedDelta::Text(text) => chunks.push(self.chunk(
                ChatMessageDelta {
                    content: Some(text.clone()),
                    ..Default::default()
                },
                None,
                None,
            )),
            UnifiedDelta::ToolCallStart { index, id, name } => chunks.push(self.chunk(
                ChatMessageDelta {
                    tool_calls: Some(vec![StreamingToolCall::Start {
                        index: *index,
                        id: id.clone(),
                        tool_type: ToolType::Function,
                        function: FunctionStart {
                            name: name.clone(),
                            arguments: String::new(),
                        },
                    }]),
                    ..Default::default()
                },
                None,
                None,
            )),
            UnifiedDelta::ToolCallArguments { index, fragment } => chunks.push(self.chunk(
                ChatMessageDelta {
                    tool_calls: Some(vec![StreamingToolCall::Delta {
                        index: *index,
                        function: FunctionDelta {
                            arguments: fragment.clone(),
                        },
                    }]),
                    ..Default::default()
                },
                None,
                None,
            )),
            // The wire has no per-call terminator; the next start or the
            // finish_reason closes the call implicitly.
            UnifiedDelta::ToolCallEnd { .. } => {}
            UnifiedDelta::Done { finish_reason, usage } => {
                chunks.push(self.chunk(
                    ChatMessageDelta::default(),
                    Some(FinishReason::from(*finish_reason)),
                    usage.map(Usage::from),
                ));
            }
        }

        chunks
    }
}

/// Decodes upstream Chat Completions chunks into unified deltas.
///
/// Tracks which tool call is open so the implicit call boundaries of the
/// wire become explicit [`UnifiedDelta::ToolCallEnd`] elements.
#[derive(Default)]
pub struct StreamDecoder {
    open_call: Option<usize>,
    saw_tool_calls: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: ChatCompletionChunk) -> Vec<UnifiedDelta> {
        let mut deltas = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                deltas.push(UnifiedDelta::Text(content));
            }

            for call in choice.delta.tool_calls.into_iter().flatten() {
                match call {
                    StreamingToolCall::Start { index, id, function, .. } => {
                        if let Some(open) = self.open_call.take() {
                            deltas.push(UnifiedDelta::ToolCallEnd { index: open });
                        }

                        self.open_call = Some(index);
                        self.saw_tool_calls = true;
                        deltas.push(UnifiedDelta::ToolCallStart {
                            index,
                            id,
                            name: function.name,
                        });

                        if !function.arguments.is_empty() {
                            deltas.push(UnifiedDelta::ToolCallArguments {
                                index,
                                fragment: function.arguments,
                            });
                        }
                    }
                    StreamingToolCall::Delta { index, function } => {
                        deltas.push(UnifiedDelta::ToolCallArguments {
                            index,
                            fragment: function.arguments,
                        });
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        deltas
    }

    /// Close the stream after the upstream `[DONE]` marker.
    pub fn finish(&mut self) -> Vec<UnifiedDelta> {
        let mut deltas = Vec::new();

        if let Some(open) = self.open_call.take() {
            deltas.push(UnifiedDelta::ToolCallEnd { index: open });
        }

        let finish_reason = match self.finish_reason.take() {
            Some(reason) => UnifiedFinishReason::from(reason),
            None if self.saw_tool_calls => UnifiedFinishReason::ToolCalls,
            None => UnifiedFinishReason::Stop,
        };

        deltas.push(UnifiedDelta::Done {
            finish_reason,
            usage: self.usage.take().map(UnifiedUsage::from),
        });

        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_chunk(content: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".into(),
            object: ObjectType::ChatCompletionChunk,
            created: 0,
            model: "gpt-4".into(),
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta: ChatMessageDelta {
                    content: Some(content.into()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn decoder_reconstructs_call_boundaries() {
        let mut decoder = StreamDecoder::new();

        let start = ChatCompletionChunk {
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta: ChatMessageDelta {
                    tool_calls: Some(vec![StreamingToolCall::Start {
                        index: 0,
                        id: "call_abc".into(),
                        tool_type: ToolType::Function,
                        function: FunctionStart {
                            name: "get_weather".into(),
                            arguments: String::new(),
                        },
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            ..text_chunk("")
        };

        let mut deltas = decoder.decode(start);
        deltas.extend(decoder.decode(ChatCompletionChunk {
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta: ChatMessageDelta {
                    tool_calls: Some(vec![StreamingToolCall::Delta {
                        index: 0,
                        function: FunctionDelta {
                            arguments: r#"{"city":"Tokyo"}"#.into(),
                        },
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            ..text_chunk("")
        }));
        deltas.extend(decoder.finish());

        assert_eq!(
            deltas,
            vec![
                UnifiedDelta::ToolCallStart {
                    index: 0,
                    id: "call_abc".into(),
                    name: "get_weather".into(),
                },
                UnifiedDelta::ToolCallArguments {
                    index: 0,
                    fragment: r#"{"city":"Tokyo"}"#.into(),
                },
                UnifiedDelta::ToolCallEnd { index: 0 },
                UnifiedDelta::Done {
                    finish_reason: UnifiedFinishReason::ToolCalls,
                    usage: None,
                },
            ]
        );
    }

    #[test]
    fn encoder_sends_role_on_first_chunk_only() {
        let mut encoder = StreamEncoder::new("chatcmpl-1", "gpt-4", 0);

        let first = encoder.encode(&UnifiedDelta::Text("hi".into()));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(first[1].choices[0].delta.content.as_deref(), Some("hi"));

        let second = encoder.encode(&UnifiedDelta::Text(" there".into()));
        assert_eq!(second.len(), 1);
        assert!(second[0].choices[0].delta.role.is_none());
    }

    #[test]
    fn streaming_tool_call_deserializes_by_field_presence() {
        let start: StreamingToolCall = serde_json::from_str(
            r#"{"index":0,"id":"call_1","type":"function","function":{"name":"f","arguments":""}}"#,
        )
        .unwrap();
        assert!(matches!(start, StreamingToolCall::Start { .. }));

        let delta: StreamingToolCall =
            serde_json::from_str(r#"{"index":0,"function":{"arguments":"{\"a\":1}"}}"#).unwrap();
        assert!(matches!(delta, StreamingToolCall::Delta { .. }));
    }
}
