//! Streaming event normalizer
//!
//! Raw SSE bytes -> [`Segment`]s -> [`StreamEvent`]s -> folded [`Message`]s.

mod accumulate;
mod decoder;
mod normalize;

pub use accumulate::StreamAccumulator;
pub use decoder::{Segment, SseDecoder};
pub use normalize::normalize;

use crate::llm::{EventStream, LlmError, Message, Role, ThreadRun};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// Closed set of semantic events produced by a stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Fragment of an in-progress message
    MessagePartial(MessageDelta),
    /// Message closed; `message` carries the full body when the server sent one
    MessageCompleted {
        id: String,
        message: Option<Message>,
    },
    /// Any run lifecycle event, including `requires_action`
    RunStatus(ThreadRun),
    Error(LlmError),
    Done,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDelta {
    pub id: String,
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

/// Fragment of the tool call at `index`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turn a byte stream into normalized events.
///
/// A transport error or the `[DONE]` marker ends the stream after it is
/// yielded, even if the connection stays open.
pub fn decode_stream<S, B>(bytes: S, delimiter: &'static str) -> EventStream
where
    S: Stream<Item = Result<B, LlmError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(delimiter),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if matches!(event, StreamEvent::Done) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for segment in state.decoder.push(chunk.as_ref()) {
                        state.pending.extend(normalize(&segment));
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    if let Some(segment) = state.decoder.finish() {
                        state.pending.extend(normalize(&segment));
                    }
                }
            }
        }
    })
    .boxed()
}
