//! Protocol-agnostic message types shared by all three wire formats.
//!
//! Every client request is decoded into a [`UnifiedRequest`], routed, and
//! re-encoded for the chosen upstream; responses travel the same road in
//! reverse. The conversion flow:
//!
//! ```text
//! client wire format → UnifiedRequest → upstream wire format
//! upstream wire format → UnifiedResponse / UnifiedDelta → client wire format
//! ```
//!
//! Content parts are ordered, and every conversion in this module tree
//! preserves that order. Tool arguments stay an opaque [`serde_json::Value`]
//! since their schema is user-defined at runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_gemini;
pub(crate) mod from_openai;
pub(crate) mod to_anthropic;
pub(crate) mod to_gemini;
pub(crate) mod to_openai;

/// Unified request representation for all supported protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Client-requested model name, before any per-upstream mapping.
    pub model: String,

    /// Conversation messages in order.
    pub messages: Vec<UnifiedMessage>,

    /// System instruction, held separately from the messages array.
    ///
    /// OpenAI carries it as a leading `system` message, Anthropic as a
    /// top-level `system` field, Gemini as `systemInstruction`.
    pub system: Option<String>,

    /// Tool declarations available to the model.
    pub tools: Option<Vec<UnifiedTool>>,

    /// Whether the response should stream.
    pub stream: Option<bool>,

    /// Sampling temperature, passed through untouched.
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff, passed through untouched.
    pub top_p: Option<f32>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,

    /// Stop sequences that halt generation.
    pub stop_sequences: Option<Vec<String>>,

    /// The canonical reasoning knob.
    ///
    /// OpenAI speaks the enum directly; Anthropic and Gemini speak a numeric
    /// thinking budget, converted through [`ReasoningEffort::budget_tokens`].
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Reasoning effort levels with their exact thinking-budget equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// 2048 thinking-budget tokens.
    Low,
    /// 8192 thinking-budget tokens.
    Medium,
    /// 16384 thinking-budget tokens.
    High,
}

impl ReasoningEffort {
    /// The numeric thinking budget this effort level encodes to.
    pub fn budget_tokens(self) -> u32 {
        match self {
            ReasoningEffort::Low => 2048,
            ReasoningEffort::Medium => 8192,
            ReasoningEffort::High => 16384,
        }
    }

    /// Bucket a numeric budget by nearest-below threshold.
    pub fn from_budget_tokens(budget: u32) -> Self {
        match budget {
            0..=2048 => ReasoningEffort::Low,
            2049..=8192 => ReasoningEffort::Medium,
            _ => ReasoningEffort::High,
        }
    }
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    /// Who sent the message.
    pub role: UnifiedRole,

    /// Message content, either a bare string or ordered typed parts.
    pub content: UnifiedContentContainer,

    /// Tool calls made by an assistant message, OpenAI-shaped.
    ///
    /// Anthropic and Gemini express the same information as `ToolUse`
    /// content parts; both representations are accepted and the codecs
    /// normalize between them.
    pub tool_calls: Option<Vec<UnifiedToolCall>>,

    /// For `tool` role messages, the ID of the call being answered.
    pub tool_call_id: Option<String>,
}

impl UnifiedMessage {
    /// Build a plain-text message.
    pub fn text(role: UnifiedRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: UnifiedContentContainer::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Concatenated text of the message, ignoring non-text parts.
    pub fn text_content(&self) -> String {
        match &self.content {
            UnifiedContentContainer::Text(text) => text.clone(),
            UnifiedContentContainer::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    UnifiedContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// Content that is either a bare string or ordered typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedContentContainer {
    /// Simple text content.
    Text(String),
    /// Ordered content parts.
    Blocks(Vec<UnifiedContent>),
}

/// A typed content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedContent {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// Image input.
    Image {
        /// Inline data or URL reference.
        source: UnifiedImageSource,
    },

    /// A tool invocation requested by the assistant.
    ToolUse {
        /// Client-facing call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments. A JSON object when the model produced valid JSON; a
        /// string carrying the raw emission when it did not, so the failure
        /// stays visible to the client.
        input: Value,
    },

    /// The result of executing a tool.
    ToolResult {
        /// ID of the call this result answers.
        tool_use_id: String,
        /// Tool output, flattened to text.
        content: String,
        /// Whether the execution failed.
        is_error: Option<bool>,
    },
}

impl UnifiedContent {
    /// The text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            UnifiedContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Image source for multi-modal content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnifiedImageSource {
    /// Base64-encoded inline image data.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// The encoded bytes.
        data: String,
    },
    /// Externally hosted image.
    Url {
        /// HTTP(S) URL of the image.
        url: String,
    },
}

/// A tool declaration: flat name, description and JSON-Schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTool {
    /// Tool name, unique within a request.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON Schema describing the accepted arguments.
    pub parameters: Value,
}

/// An assistant tool call in OpenAI shape: arguments as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    /// Client-facing call identifier.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON string, forwarded verbatim.
    pub arguments: String,
}

/// Unified buffered response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Response identifier.
    pub id: String,

    /// The upstream model that actually produced the response.
    pub model: String,

    /// Text and tool-call parts in production order.
    pub content: Vec<UnifiedContent>,

    /// Why generation stopped.
    pub finish_reason: UnifiedFinishReason,

    /// Token accounting, zeroed when the upstream omits it.
    pub usage: UnifiedUsage,
}

impl UnifiedResponse {
    /// Whether any tool-use part is present.
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, UnifiedContent::ToolUse { .. }))
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedFinishReason {
    /// Natural completion.
    Stop,
    /// `max_tokens` reached.
    Length,
    /// The response requests tool invocations.
    ToolCalls,
    /// Content was filtered by the upstream.
    ContentFilter,
    /// Generation failed upstream.
    Error,
}

impl std::fmt::Display for UnifiedFinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnifiedFinishReason::Stop => f.write_str("stop"),
            UnifiedFinishReason::Length => f.write_str("length"),
            UnifiedFinishReason::ToolCalls => f.write_str("tool_calls"),
            UnifiedFinishReason::ContentFilter => f.write_str("content_filter"),
            UnifiedFinishReason::Error => f.write_str("error"),
        }
    }
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

/// One element of a streaming response.
///
/// A finite, non-restartable sequence: [`UnifiedDelta::Done`] is terminal
/// and nothing follows it. Within one response, elements arrive in strict
/// upstream production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnifiedDelta {
    /// Append text to the running assistant message.
    Text(String),

    /// Begin the tool call at ordinal `index`. The name is always complete
    /// by the time this element is released.
    ToolCallStart {
        /// Zero-based ordinal of the call within the response.
        index: usize,
        /// Client-facing call identifier.
        id: String,
        /// Tool name.
        name: String,
    },

    /// Append a fragment to a call's argument buffer. Fragments concatenated
    /// in order yield the full argument text.
    ToolCallArguments {
        /// Ordinal of the call being extended.
        index: usize,
        /// The JSON fragment.
        fragment: String,
    },

    /// The call at `index` is complete.
    ToolCallEnd {
        /// Ordinal of the completed call.
        index: usize,
    },

    /// Terminal element.
    Done {
        /// Why generation stopped.
        finish_reason: UnifiedFinishReason,
        /// Final token accounting when the upstream reported it.
        usage: Option<UnifiedUsage>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_budget_mapping_is_exact() {
        assert_eq!(ReasoningEffort::Low.budget_tokens(), 2048);
        assert_eq!(ReasoningEffort::Medium.budget_tokens(), 8192);
        assert_eq!(ReasoningEffort::High.budget_tokens(), 16384);
    }

    #[test]
    fn budget_buckets_by_nearest_below_threshold() {
        assert_eq!(ReasoningEffort::from_budget_tokens(1), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget_tokens(2048), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget_tokens(2049), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget_tokens(8192), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget_tokens(8193), ReasoningEffort::High);
        assert_eq!(ReasoningEffort::from_budget_tokens(1_000_000), ReasoningEffort::High);
    }

    #[test]
    fn effort_round_trips_through_budget() {
        for effort in [ReasoningEffort::Low, ReasoningEffort::Medium, ReasoningEffort::High] {
            assert_eq!(ReasoningEffort::from_budget_tokens(effort.budget_tokens()), effort);
        }
    }

    #[test]
    fn text_content_skips_tool_parts() {
        let message = UnifiedMessage {
            role: UnifiedRole::Assistant,
            content: UnifiedContentContainer::Blocks(vec![
                UnifiedContent::Text { text: "a".into() },
                UnifiedContent::ToolUse {
                    id: "call_1".into(),
                    name: "f".into(),
                    input: serde_json::json!({}),
                },
                UnifiedContent::Text { text: "b".into() },
            ]),
            tool_calls: None,
            tool_call_id: None,
        };

        assert_eq!(message.text_content(), "ab");
    }
}
