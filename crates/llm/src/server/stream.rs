//! Delta-stream adapters for the two response pipelines.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;

use crate::messages::unified::UnifiedDelta;
use crate::provider::DeltaStream;
use crate::tooling::extractor::StreamingExtractor;
use crate::tooling::generate_call_id;
use crate::tooling::id_map::ToolCallIdMap;

/// Replace upstream tool-call IDs with fresh client-facing ones on a
/// native (non-injected) stream, recording each pairing.
pub(crate) fn map_native_ids(upstream: DeltaStream, id_map: Arc<ToolCallIdMap>) -> DeltaStream {
    let mapped = upstream.map(move |result| {
        result.map(|delta| match delta {
            UnifiedDelta::ToolCallStart { index, id, name } => {
                let client_id = generate_call_id();
                id_map.insert(client_id.clone(), id);

                UnifiedDelta::ToolCallStart {
                    index,
                    id: client_id,
                    name,
                }
            }
            other => other,
        })
    });

    Box::pin(mapped)
}

/// Drive the sublanguage extractor over an injected stream.
///
/// Text deltas feed the extractor; its output replaces them. If the
/// upstream produces native tool-call deltas anyway, native wins: the
/// extractor is abandoned (flushing its lookahead as text) and everything
/// passes through untouched from then on, with native call ordinals offset
/// past any calls the extractor already emitted.
pub(crate) fn extract_injected(upstream: DeltaStream) -> DeltaStream {
    struct State {
        upstream: DeltaStream,
        extractor: StreamingExtractor,
        pending: VecDeque<crate::Result<UnifiedDelta>>,
        native: bool,
        index_offset: usize,
        terminated: bool,
    }

    let state = State {
        upstream,
        extractor: StreamingExtractor::new(),
        pending: VecDeque::new(),
        native: false,
        index_offset: 0,
        terminated: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }

            if st.terminated {
                return None;
            }

            match st.upstream.next().await {
                Some(Ok(UnifiedDelta::Text(text))) if !st.native => {
                    st.pending.extend(st.extractor.feed(&text).into_iter().map(Ok));
                }
                Some(Ok(UnifiedDelta::Done { finish_reason, usage })) => {
                    if st.native {
                        st.pending.push_back(Ok(UnifiedDelta::Done { finish_reason, usage }));
                    } else {
                        st.pending
                            .extend(st.extractor.finish(Some(finish_reason), usage).into_iter().map(Ok));
                    }
                    st.terminated = true;
                }
                Some(Ok(delta)) => {
                    if !st.native
                        && matches!(
                            delta,
                            UnifiedDelta::ToolCallStart { .. }
                                | UnifiedDelta::ToolCallArguments { .. }
                                | UnifiedDelta::ToolCallEnd { .. }
                        )
                    {
                        log::debug!("Native tool calls observed mid-stream; bypassing extraction");
                        st.native = true;
                        st.index_offset = st.extractor.calls_started();
                        st.pending.extend(st.extractor.abandon().into_iter().map(Ok));
                    }

                    st.pending.push_back(Ok(offset_indices(delta, st.index_offset)));
                }
                Some(Err(error)) => {
                    st.pending.push_back(Err(error));
                }
                None => {
                    if !st.native {
                        st.pending.extend(st.extractor.finish(None, None).into_iter().map(Ok));
                    }
                    st.terminated = true;
                }
            }
        }
    });

    Box::pin(stream)
}

fn offset_indices(delta: UnifiedDelta, offset: usize) -> UnifiedDelta {
    if offset == 0 {
        return delta;
    }

    match delta {
        UnifiedDelta::ToolCallStart { index, id, name } => UnifiedDelta::ToolCallStart {
            index: index + offset,
            id,
            name,
        },
        UnifiedDelta::ToolCallArguments { index, fragment } => UnifiedDelta::ToolCallArguments {
            index: index + offset,
            fragment,
        },
        UnifiedDelta::ToolCallEnd { index } => UnifiedDelta::ToolCallEnd { index: index + offset },
        other => other,
    }
}
