//! XML tool-call parsing for completed assistant messages.

use serde_json::Value;

use crate::tooling::generate_call_id;

pub(crate) const TOOL_CALL_OPEN: &str = "<tool_call>";
pub(crate) const TOOL_CALL_CLOSE: &str = "</tool_call>";
pub(crate) const NAME_OPEN: &str = "<name>";
pub(crate) const NAME_CLOSE: &str = "</name>";
pub(crate) const ARGUMENTS_OPEN: &str = "<arguments>";
pub(crate) const ARGUMENTS_CLOSE: &str = "</arguments>";
pub(crate) const THINK_OPEN: &str = "<think>";
pub(crate) const THINK_CLOSE: &str = "</think>";

/// One parsed segment of an assistant message, in original order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    /// Ordinary assistant text, think blocks included.
    Text(String),
    /// An extracted tool invocation.
    ToolCall(Invocation),
}

/// A tool invocation extracted from the sublanguage.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Invocation {
    /// Freshly synthesized client-facing ID.
    pub id: String,
    /// Trimmed `<name>` inner text.
    pub name: String,
    /// Parsed arguments, or the raw inner text as a JSON string when the
    /// model emitted something that does not parse. The invocation is never
    /// discarded; a hidden failure would be undebuggable.
    pub input: Value,
}

/// Parse a completed message into interleaved text and invocations.
///
/// Scanning never happens inside `<think>` blocks, so a model reasoning
/// aloud about a call cannot trigger a phantom extraction. Think blocks
/// pass through as text, tags included.
pub(crate) fn parse_message(message: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = message;

    loop {
        let tool_at = rest.find(TOOL_CALL_OPEN);
        let think_at = rest.find(THINK_OPEN);

        match (tool_at, think_at) {
            (Some(tool), think) if think.is_none_or(|think| tool < think) => {
                text.push_str(&rest[..tool]);
                let after_open = &rest[tool + TOOL_CALL_OPEN.len()..];

                let Some(close) = after_open.find(TOOL_CALL_CLOSE) else {
                    // Unterminated block: degrade to literal text.
                    text.push_str(&rest[tool..]);
                    break;
                };

                flush_text(&mut segments, &mut text);
                segments.push(Segment::ToolCall(parse_invocation(&after_open[..close])));
                rest = &after_open[close + TOOL_CALL_CLOSE.len()..];
            }
            (Some(_), None) => unreachable!("guard above covers (Some, None)"),
            (_, Some(think)) => {
                // Copy the whole think block through untouched.
                let after_open = &rest[think + THINK_OPEN.len()..];

                match after_open.find(THINK_CLOSE) {
                    Some(close) => {
                        let end = think + THINK_OPEN.len() + close + THINK_CLOSE.len();
                        text.push_str(&rest[..end]);
                        rest = &rest[end..];
                    }
                    None => {
                        text.push_str(rest);
                        break;
                    }
                }
            }
            (None, None) => {
                text.push_str(rest);
                break;
            }
        }
    }

    flush_text(&mut segments, &mut text);
    segments
}

fn flush_text(segments: &mut Vec<Segment>, text: &mut String) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

fn parse_invocation(block: &str) -> Invocation {
    let name = inner_text(block, NAME_OPEN, NAME_CLOSE)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let input = match inner_text(block, ARGUMENTS_OPEN, ARGUMENTS_CLOSE) {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        None => Value::Object(serde_json::Map::new()),
    };

    Invocation {
        id: generate_call_id(),
        name,
        input,
    }
}

pub(crate) fn inner_text<'a>(block: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = block.find(open)? + open.len();
    let len = block[start..].find(close)?;
    Some(&block[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interleaving_is_preserved() {
        let segments = parse_message(
            "Let me check.<tool_call><name>get_weather</name><arguments>{\"city\":\"Tokyo\"}</arguments></tool_call>Also:<tool_call><name>get_time</name><arguments>{}</arguments></tool_call>",
        );

        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], Segment::Text("Let me check.".into()));

        let Segment::ToolCall(first) = &segments[1] else {
            panic!("expected an invocation");
        };
        assert_eq!(first.name, "get_weather");
        assert_eq!(first.input, json!({"city": "Tokyo"}));
        assert!(first.id.starts_with("call_"));

        assert_eq!(segments[2], Segment::Text("Also:".into()));

        let Segment::ToolCall(second) = &segments[3] else {
            panic!("expected an invocation");
        };
        assert_eq!(second.name, "get_time");
    }

    #[test]
    fn think_blocks_shield_their_contents() {
        let segments = parse_message(
            "<think>should I call get_weather? <tool_call> looks right. Yes.</think><tool_call><name>get_weather</name><arguments>{\"city\":\"Paris\"}</arguments></tool_call>",
        );

        assert_eq!(segments.len(), 2);
        let Segment::Text(text) = &segments[0] else {
            panic!("expected text");
        };
        assert!(text.starts_with("<think>"));
        assert!(text.ends_with("</think>"));

        let Segment::ToolCall(call) = &segments[1] else {
            panic!("expected exactly one invocation");
        };
        assert_eq!(call.input, json!({"city": "Paris"}));
    }

    #[test]
    fn malformed_arguments_survive_as_the_raw_string() {
        let segments =
            parse_message("<tool_call><name>f</name><arguments>{oops not json</arguments></tool_call>");

        let Segment::ToolCall(call) = &segments[0] else {
            panic!("expected an invocation");
        };
        assert_eq!(call.input, Value::String("{oops not json".into()));
    }

    #[test]
    fn whitespace_inside_tags_is_tolerated() {
        let segments = parse_message(
            "<tool_call>\n  <name> get_weather </name>\n  <arguments>\n{\"city\": \"Oslo\"}\n</arguments>\n</tool_call>",
        );

        let Segment::ToolCall(call) = &segments[0] else {
            panic!("expected an invocation");
        };
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.input, json!({"city": "Oslo"}));
    }

    #[test]
    fn unterminated_block_degrades_to_text() {
        let segments = parse_message("before <tool_call><name>f</name>");

        assert_eq!(
            segments,
            vec![Segment::Text("before <tool_call><name>f</name>".into())]
        );
    }

    #[test]
    fn plain_text_passes_through_whole() {
        let segments = parse_message("no calls here, just prose");
        assert_eq!(segments, vec![Segment::Text("no calls here, just prose".into())]);
    }
}
