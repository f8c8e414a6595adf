//! Streaming tool-call extraction.
//!
//! Runs the XML sublanguage over an upstream token flow as an explicit
//! state machine, deterministic for arbitrary chunk boundaries: text passes
//! through immediately, a rolling lookahead of at most ten characters (the
//! longest proper prefix of `<tool_call>`) guards against split tags, and
//! complete blocks come out as structured tool-call deltas.
//!
//! For input containing no trigger, the concatenation of emitted text
//! deltas equals the input byte-for-byte once the stream finishes.

use crate::messages::unified::{UnifiedDelta, UnifiedFinishReason, UnifiedUsage};
use crate::tooling::generate_call_id;
use crate::tooling::parser::{
    ARGUMENTS_CLOSE, ARGUMENTS_OPEN, NAME_CLOSE, NAME_OPEN, THINK_CLOSE, THINK_OPEN, TOOL_CALL_CLOSE,
    TOOL_CALL_OPEN, inner_text,
};

enum State {
    /// Forwarding text, watching for `<tool_call>` and `<think>`.
    Passthrough,
    /// Inside a think block; detection suspended until `</think>`.
    Think,
    /// After `<tool_call>`, collecting the `<name>` element. The start
    /// delta is held until the name is complete.
    CallHeader,
    /// Between `<arguments>` and `</arguments>`, streaming fragments.
    Arguments { index: usize },
    /// After `</arguments>`, awaiting `</tool_call>`.
    CallTail { index: usize },
}

/// Feed-driven extractor producing unified deltas.
pub(crate) struct StreamingExtractor {
    state: State,
    buf: String,
    next_index: usize,
    extracted: bool,
}

impl StreamingExtractor {
    pub fn new() -> Self {
        Self {
            state: State::Passthrough,
            buf: String::new(),
            next_index: 0,
            extracted: false,
        }
    }

    /// Process one upstream text chunk.
    pub fn feed(&mut self, chunk: &str) -> Vec<UnifiedDelta> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();

        loop {
            match self.state {
                State::Passthrough => {
                    let tool = self.buf.find(TOOL_CALL_OPEN);
                    let think = self.buf.find(THINK_OPEN);

                    match (tool, think) {
                        (Some(tool), think) if think.is_none_or(|think| tool < think) => {
                            if tool > 0 {
                                out.push(UnifiedDelta::Text(self.buf[..tool].to_string()));
                            }
                            self.buf.drain(..tool + TOOL_CALL_OPEN.len());
                            self.state = State::CallHeader;
                        }
                        (Some(_), None) => unreachable!("guard above covers (Some, None)"),
                        (_, Some(think)) => {
                            let end = think + THINK_OPEN.len();
                            out.push(UnifiedDelta::Text(self.buf[..end].to_string()));
                            self.buf.drain(..end);
                            self.state = State::Think;
                        }
                        (None, None) => {
                            self.emit_all_but_holdback(&mut out, &[TOOL_CALL_OPEN, THINK_OPEN]);
                            break;
                        }
                    }
                }
                State::Think => match self.buf.find(THINK_CLOSE) {
                    Some(close) => {
                        let end = close + THINK_CLOSE.len();
                        out.push(UnifiedDelta::Text(self.buf[..end].to_string()));
                        self.buf.drain(..end);
                        self.state = State::Passthrough;
                    }
                    None => {
                        self.emit_all_but_holdback(&mut out, &[THINK_CLOSE]);
                        break;
                    }
                },
                State::CallHeader => {
                    let args = self.buf.find(ARGUMENTS_OPEN);
                    let close = self.buf.find(TOOL_CALL_CLOSE);

                    match (args, close) {
                        (Some(args), close) if close.is_none_or(|close| args < close) => {
                            let index = self.start_call(&mut out, args);
                            self.buf.drain(..args + ARGUMENTS_OPEN.len());
                            self.state = State::Arguments { index };
                        }
                        (Some(_), None) => unreachable!("guard above covers (Some, None)"),
                        (_, Some(close)) => {
                            // A block that never opened its arguments still
                            // surfaces as an (empty) invocation.
                            let index = self.start_call(&mut out, close);
                            out.push(UnifiedDelta::ToolCallEnd { index });
                            self.buf.drain(..close + TOOL_CALL_CLOSE.len());
                            self.state = State::Passthrough;
                        }
                        (None, None) => break,
                    }
                }
                State::Arguments { index } => match self.buf.find(ARGUMENTS_CLOSE) {
                    Some(close) => {
                        if close > 0 {
                            out.push(UnifiedDelta::ToolCallArguments {
                                index,
                                fragment: self.buf[..close].to_string(),
                            });
                        }
                        self.buf.drain(..close + ARGUMENTS_CLOSE.len());
                        self.state = State::CallTail { index };
                    }
                    None => {
                        let hold = holdback(&self.buf, &[ARGUMENTS_CLOSE]);
                        let emit = self.buf.len() - hold;
                        if emit > 0 {
                            out.push(UnifiedDelta::ToolCallArguments {
                                index,
                                fragment: self.buf[..emit].to_string(),
                            });
                            self.buf.drain(..emit);
                        }
                        break;
                    }
                },
                State::CallTail { index } => match self.buf.find(TOOL_CALL_CLOSE) {
                    Some(close) => {
                        out.push(UnifiedDelta::ToolCallEnd { index });
                        self.buf.drain(..close + TOOL_CALL_CLOSE.len());
                        self.state = State::Passthrough;
                    }
                    None => break,
                },
            }
        }

        out
    }

    /// Close the stream: flush whatever the current state buffered, then
    /// emit the terminal element.
    pub fn finish(
        &mut self,
        upstream_finish: Option<UnifiedFinishReason>,
        usage: Option<UnifiedUsage>,
    ) -> Vec<UnifiedDelta> {
        let mut out = self.abandon();

        let finish_reason = if self.extracted {
            UnifiedFinishReason::ToolCalls
        } else {
            upstream_finish.unwrap_or(UnifiedFinishReason::Stop)
        };

        out.push(UnifiedDelta::Done { finish_reason, usage });
        out
    }

    /// Flush whatever the current state buffered and reset to pass-through,
    /// without terminating the sequence. Used when extraction is abandoned
    /// mid-stream in favor of native tool calls.
    pub fn abandon(&mut self) -> Vec<UnifiedDelta> {
        let mut out = Vec::new();

        match self.state {
            State::Passthrough | State::Think => {
                if !self.buf.is_empty() {
                    out.push(UnifiedDelta::Text(std::mem::take(&mut self.buf)));
                }
            }
            // The stream died inside a half-read header; give the raw
            // bytes back as text rather than losing them.
            State::CallHeader => {
                out.push(UnifiedDelta::Text(format!(
                    "{TOOL_CALL_OPEN}{}",
                    std::mem::take(&mut self.buf)
                )));
            }
            State::Arguments { index } => {
                if !self.buf.is_empty() {
                    out.push(UnifiedDelta::ToolCallArguments {
                        index,
                        fragment: std::mem::take(&mut self.buf),
                    });
                }
                out.push(UnifiedDelta::ToolCallEnd { index });
            }
            State::CallTail { index } => {
                self.buf.clear();
                out.push(UnifiedDelta::ToolCallEnd { index });
            }
        }

        self.state = State::Passthrough;
        out
    }

    /// How many calls have started so far; native ordinals continue from
    /// here when extraction is abandoned.
    pub fn calls_started(&self) -> usize {
        self.next_index
    }

    fn start_call(&mut self, out: &mut Vec<UnifiedDelta>, header_end: usize) -> usize {
        let name = inner_text(&self.buf[..header_end], NAME_OPEN, NAME_CLOSE)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let index = self.next_index;
        self.next_index += 1;
        self.extracted = true;

        out.push(UnifiedDelta::ToolCallStart {
            index,
            id: generate_call_id(),
            name,
        });

        index
    }

    fn emit_all_but_holdback(&mut self, out: &mut Vec<UnifiedDelta>, tokens: &[&str]) {
        let hold = holdback(&self.buf, tokens);
        let emit = self.buf.len() - hold;

        if emit > 0 {
            out.push(UnifiedDelta::Text(self.buf[..emit].to_string()));
            self.buf.drain(..emit);
        }
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of any
/// token. These bytes must stay buffered; everything before them is safe
/// to release.
fn holdback(buf: &str, tokens: &[&str]) -> usize {
    let longest = tokens.iter().map(|t| t.len() - 1).max().unwrap_or(0);

    for take in (1..=longest.min(buf.len())).rev() {
        let start = buf.len() - take;
        if !buf.is_char_boundary(start) {
            continue;
        }

        let suffix = &buf[start..];
        if tokens.iter().any(|t| t.len() > take && t.starts_with(suffix)) {
            return take;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(chunks: &[&str]) -> Vec<UnifiedDelta> {
        let mut extractor = StreamingExtractor::new();
        let mut deltas = Vec::new();

        for chunk in chunks {
            deltas.extend(extractor.feed(chunk));
        }

        deltas.extend(extractor.finish(Some(UnifiedFinishReason::Stop), None));
        deltas
    }

    fn collected_text(deltas: &[UnifiedDelta]) -> String {
        deltas
            .iter()
            .filter_map(|delta| match delta {
                UnifiedDelta::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn trigger_free_streams_pass_through_byte_for_byte() {
        let input = "Plain prose with <markup>-ish noise, a lone < sign, and </closing> tags.";

        // Every chunking of the same input must reproduce it exactly.
        for size in [1, 3, 7, 10, input.len()] {
            let chunks: Vec<&str> = input
                .as_bytes()
                .chunks(size)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();

            let deltas = drive(&chunks);
            assert_eq!(collected_text(&deltas), input, "chunk size {size}");
            assert_eq!(
                deltas.last(),
                Some(&UnifiedDelta::Done {
                    finish_reason: UnifiedFinishReason::Stop,
                    usage: None,
                })
            );
        }
    }

    #[test]
    fn split_tag_across_chunks_never_leaks() {
        let deltas = drive(&[
            "Sure, let me ",
            "check.<tool_",
            "call><name>f</name><arguments>{}</arguments></tool_call>",
        ]);

        assert_eq!(collected_text(&deltas), "Sure, let me check.");
        assert!(deltas.iter().any(|d| matches!(
            d,
            UnifiedDelta::ToolCallStart { index: 0, name, .. } if name == "f"
        )));
        assert_eq!(
            deltas.last(),
            Some(&UnifiedDelta::Done {
                finish_reason: UnifiedFinishReason::ToolCalls,
                usage: None,
            })
        );
    }

    #[test]
    fn suspected_trigger_flushes_on_mismatch() {
        let deltas = drive(&["half a tag: <tool_", "box> end"]);
        assert_eq!(collected_text(&deltas), "half a tag: <tool_box> end");
        assert!(!deltas.iter().any(|d| matches!(d, UnifiedDelta::ToolCallStart { .. })));
    }

    #[test]
    fn arguments_stream_incrementally_with_chunk_pacing() {
        let deltas = drive(&[
            "<tool_call><name>get_weather</name><arguments>",
            r#"{"city":"#,
            r#""Tokyo"}"#,
            "</arguments></tool_call>",
        ]);

        let fragments: Vec<&str> = deltas
            .iter()
            .filter_map(|delta| match delta {
                UnifiedDelta::ToolCallArguments { fragment, .. } => Some(fragment.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(fragments.concat(), r#"{"city":"Tokyo"}"#);
        assert!(fragments.len() >= 2, "arguments should not arrive as one blob");
    }

    #[test]
    fn split_arguments_close_tag_is_held_back() {
        let deltas = drive(&[
            "<tool_call><name>f</name><arguments>{}</argu",
            "ments></tool_call>",
        ]);

        let fragments: String = deltas
            .iter()
            .filter_map(|delta| match delta {
                UnifiedDelta::ToolCallArguments { fragment, .. } => Some(fragment.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(fragments, "{}");
    }

    #[test]
    fn consecutive_calls_get_increasing_ordinals() {
        let deltas = drive(&[
            "<tool_call><name>a</name><arguments>{}</arguments></tool_call>",
            "<tool_call><name>b</name><arguments>{}</arguments></tool_call>",
        ]);

        let starts: Vec<(usize, &str)> = deltas
            .iter()
            .filter_map(|delta| match delta {
                UnifiedDelta::ToolCallStart { index, name, .. } => Some((*index, name.as_str())),
                _ => None,
            })
            .collect();

        assert_eq!(starts, vec![(0, "a"), (1, "b")]);

        let ends: Vec<usize> = deltas
            .iter()
            .filter_map(|delta| match delta {
                UnifiedDelta::ToolCallEnd { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![0, 1]);
    }

    #[test]
    fn think_blocks_suppress_detection_and_pass_through() {
        let deltas = drive(&[
            "<think>should I call get_weather? <tool_call> yes.</think>",
            "<tool_call><name>get_weather</name><arguments>{\"city\":\"Paris\"}</arguments></tool_call>",
        ]);

        assert_eq!(
            collected_text(&deltas),
            "<think>should I call get_weather? <tool_call> yes.</think>"
        );

        let starts = deltas
            .iter()
            .filter(|d| matches!(d, UnifiedDelta::ToolCallStart { .. }))
            .count();
        assert_eq!(starts, 1, "the think-block mention must not extract");
    }

    #[test]
    fn split_think_open_is_held_back_too() {
        let deltas = drive(&["before <th", "ink>hidden <tool_call></think>after"]);
        assert_eq!(
            collected_text(&deltas),
            "before <think>hidden <tool_call></think>after"
        );
    }

    #[test]
    fn upstream_death_mid_header_flushes_raw_text() {
        let mut extractor = StreamingExtractor::new();
        let mut deltas = extractor.feed("text <tool_call><name>f</na");
        deltas.extend(extractor.finish(Some(UnifiedFinishReason::Stop), None));

        assert_eq!(collected_text(&deltas), "text <tool_call><name>f</na");
        assert_eq!(
            deltas.last(),
            Some(&UnifiedDelta::Done {
                finish_reason: UnifiedFinishReason::Stop,
                usage: None,
            })
        );
    }

    #[test]
    fn upstream_death_mid_arguments_closes_the_call() {
        let mut extractor = StreamingExtractor::new();
        let mut deltas = extractor.feed("<tool_call><name>f</name><arguments>{\"partial\":");
        deltas.extend(extractor.finish(None, None));

        assert!(deltas.iter().any(|d| matches!(d, UnifiedDelta::ToolCallEnd { index: 0 })));
        assert_eq!(
            deltas.last(),
            Some(&UnifiedDelta::Done {
                finish_reason: UnifiedFinishReason::ToolCalls,
                usage: None,
            })
        );
    }

    #[test]
    fn passthrough_finish_reason_survives_when_nothing_extracted() {
        let mut extractor = StreamingExtractor::new();
        let mut deltas = extractor.feed("just text");
        deltas.extend(extractor.finish(Some(UnifiedFinishReason::Length), None));

        assert_eq!(
            deltas.last(),
            Some(&UnifiedDelta::Done {
                finish_reason: UnifiedFinishReason::Length,
                usage: None,
            })
        );
    }

    #[test]
    fn text_between_blocks_is_preserved_in_order() {
        let deltas = drive(&[
            "first<tool_call><name>a</name><arguments>{}</arguments></tool_call>between<tool_call><name>b</name><arguments>{}</arguments></tool_call>after",
        ]);

        assert_eq!(collected_text(&deltas), "firstbetweenafter");

        let kinds: Vec<&'static str> = deltas
            .iter()
            .map(|delta| match delta {
                UnifiedDelta::Text(_) => "text",
                UnifiedDelta::ToolCallStart { .. } => "start",
                UnifiedDelta::ToolCallArguments { .. } => "args",
                UnifiedDelta::ToolCallEnd { .. } => "end",
                UnifiedDelta::Done { .. } => "done",
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                "text", "start", "args", "end", "text", "start", "args", "end", "text", "done"
            ]
        );
    }
}
