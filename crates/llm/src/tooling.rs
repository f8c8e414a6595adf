//! Prompt-injected function calling.
//!
//! Upstreams without native tool support get a synthesized system prompt
//! teaching them to emit calls in an XML sublanguage; their output is then
//! parsed back into native tool-call shape, buffered or mid-stream.

pub(crate) mod extractor;
pub(crate) mod id_map;
pub(crate) mod parser;
pub(crate) mod prompt;

pub(crate) use id_map::generate_call_id;
