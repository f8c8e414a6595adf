//! Anthropic Messages wire types and streaming codec.
//!
//! Streaming uses typed SSE events: a stream opens with `message_start`,
//! runs one or more `content_block_start` → `content_block_delta*` →
//! `content_block_stop` lifecycles, and closes with `message_delta` followed
//! by `message_stop`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::unified::{UnifiedDelta, UnifiedFinishReason, UnifiedUsage};

/// Messages API request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,

    pub messages: Vec<InputMessage>,

    /// Top-level system prompt; a string or a list of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Required by the upstream API; optional on decode so transcoded
    /// requests without a limit still parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Extended-thinking budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

/// System prompt, a bare string or text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten to a single string.
    pub fn into_text(self) -> String {
        match self {
            SystemPrompt::Text(text) => text,
            SystemPrompt::Blocks(blocks) => blocks
                .into_iter()
                .map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a block-shaped system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

/// A conversation message; the wire only knows `user` and `assistant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: MessageRole,
    pub content: InputContent,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content, a bare string or ordered blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
    },
}

/// Image source of an image block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Tool result payload, a bare string or nested blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten to a single string.
    pub fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Tool declaration with a JSON-Schema `input_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

/// Extended-thinking configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ThinkingConfig {
    Enabled { budget_tokens: u32 },
    Disabled {},
}

/// Buffered Messages API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

/// Response object discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Message,
    Error,
}

/// Why the model stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
}

impl From<StopReason> for UnifiedFinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence => UnifiedFinishReason::Stop,
            StopReason::MaxTokens => UnifiedFinishReason::Length,
            StopReason::ToolUse => UnifiedFinishReason::ToolCalls,
            StopReason::Refusal => UnifiedFinishReason::ContentFilter,
        }
    }
}

impl From<UnifiedFinishReason> for StopReason {
    fn from(reason: UnifiedFinishReason) -> Self {
        match reason {
            UnifiedFinishReason::Stop | UnifiedFinishReason::Error => StopReason::EndTurn,
            UnifiedFinishReason::Length => StopReason::MaxTokens,
            UnifiedFinishReason::ToolCalls => StopReason::ToolUse,
            UnifiedFinishReason::ContentFilter => StopReason::Refusal,
        }
    }
}

/// Token usage block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl From<AnthropicUsage> for UnifiedUsage {
    fn from(usage: AnthropicUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

impl From<UnifiedUsage> for AnthropicUsage {
    fn from(usage: UnifiedUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

/// Error payload carried by error responses and `error` stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Top-level error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub error: ErrorPayload,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Error,
            error: ErrorPayload {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// Typed SSE event surface of the streaming Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorPayload,
    },
}

impl StreamEvent {
    /// The SSE `event:` name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Metadata announced by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStart {
    pub id: String,
    pub model: String,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

/// Incremental update of one content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
}

/// Top-level changes carried by `message_delta`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Encodes a unified delta sequence as Messages streaming events.
///
/// Tracks the open content block so interleaved text and tool calls get
/// correct block lifecycles and indices.
pub struct StreamEncoder {
    id: String,
    model: String,
    started: bool,
    next_block_index: u32,
    open_block: Option<OpenBlock>,
    saw_tool_use: bool,
}

enum OpenBlock {
    Text,
    ToolUse,
}

impl StreamEncoder {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            started: false,
            next_block_index: 0,
            open_block: None,
            saw_tool_use: false,
        }
    }

    fn open_block_index(&self) -> u32 {
        self.next_block_index.saturating_sub(1)
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block.take().is_some() {
            events.push(StreamEvent::ContentBlockStop {
                index: self.open_block_index(),
            });
        }
    }

    pub fn encode(&mut self, delta: &UnifiedDelta) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(3);

        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                message: MessageStart {
                    id: self.id.clone(),
                    model: self.model.clone(),
                    role: MessageRole::Assistant,
                    content: vec![],
                    stop_reason: None,
                    stop_sequence: None,
                    usage: AnthropicUsage::default(),
                },
            });
        }

        match delta {
            UnifiedDelta::Text(text) => {
                if !matches!(self.open_block, Some(OpenBlock::Text)) {
                    self.close_open_block(&mut events);
                    self.open_block = Some(OpenBlock::Text);
                    events.push(StreamEvent::ContentBlockStart {
                        index: self.next_block_index,
                        content_block: ContentBlock::Text { text: String::new() },
                    });
                    self.next_block_index += 1;
                }

                events.push(StreamEvent::ContentBlockDelta {
                    index: self.open_block_index(),
                    delta: BlockDelta::TextDelta { text: text.clone() },
                });
            }
            UnifiedDelta::ToolCallStart { id, name, .. } => {
                self.close_open_block(&mut events);
                self.open_block = Some(OpenBlock::ToolUse);
                self.saw_tool_use = true;
                events.push(StreamEvent::ContentBlockStart {
                    index: self.next_block_index,
                    content_block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: Value::Object(serde_json::Map::new()),
                    },
                });
                self.next_block_index += 1;
            }
            UnifiedDelta::ToolCallArguments { fragment, .. } => {
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.open_block_index(),
                    delta: BlockDelta::InputJsonDelta {
                        partial_json: fragment.clone(),
                    },
                });
            }
            UnifiedDelta::ToolCallEnd { .. } => {
                self.close_open_block(&mut events);
            }
            UnifiedDelta::Done { finish_reason, usage } => {
                self.close_open_block(&mut events);

                let stop_reason = match finish_reason {
                    UnifiedFinishReason::Stop if self.saw_tool_use => StopReason::ToolUse,
                    other => StopReason::from(*other),
                };

                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaPayload {
                        stop_reason: Some(stop_reason),
                        stop_sequence: None,
                    },
                    usage: usage.map(AnthropicUsage::from),
                });
                events.push(StreamEvent::MessageStop);
            }
        }

        events
    }
}

/// Decodes upstream Messages streaming events into unified deltas.
///
/// `error` events are not handled here; the caller surfaces them before the
/// decoder sees them.
#[derive(Default)]
pub struct StreamDecoder {
    /// Block index → unified tool-call ordinal for open tool blocks.
    tool_blocks: std::collections::HashMap<u32, usize>,
    next_tool_index: usize,
    input_tokens: u32,
    stop_reason: Option<StopReason>,
    usage: Option<AnthropicUsage>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, event: StreamEvent) -> Vec<UnifiedDelta> {
        let mut deltas = Vec::with_capacity(1);

        match event {
            StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
            }
            StreamEvent::ContentBlockStart { index, content_block } => {
                if let ContentBlock::ToolUse { id, name, .. } = content_block {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(index, tool_index);
                    deltas.push(UnifiedDelta::ToolCallStart {
                        index: tool_index,
                        id,
                        name,
                    });
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => deltas.push(UnifiedDelta::Text(text)),
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(&tool_index) = self.tool_blocks.get(&index) {
                        deltas.push(UnifiedDelta::ToolCallArguments {
                            index: tool_index,
                            fragment: partial_json,
                        });
                    }
                }
                BlockDelta::ThinkingDelta { thinking } => deltas.push(UnifiedDelta::Text(thinking)),
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(tool_index) = self.tool_blocks.remove(&index) {
                    deltas.push(UnifiedDelta::ToolCallEnd { index: tool_index });
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                if let Some(mut usage) = usage {
                    if usage.input_tokens == 0 {
                        usage.input_tokens = self.input_tokens;
                    }
                    self.usage = Some(usage);
                }
            }
            StreamEvent::MessageStop => {
                let finish_reason = match self.stop_reason.take() {
                    Some(reason) => UnifiedFinishReason::from(reason),
                    None if self.next_tool_index > 0 => UnifiedFinishReason::ToolCalls,
                    None => UnifiedFinishReason::Stop,
                };

                deltas.push(UnifiedDelta::Done {
                    finish_reason,
                    usage: self.usage.take().map(UnifiedUsage::from),
                });
            }
            StreamEvent::Ping | StreamEvent::Error { .. } => {}
        }

        deltas
    }
}
