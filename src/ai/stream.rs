//! Server-sent event decoding for streaming completions
//!
//! The body is consumed line by line:
//! - blank lines and `:` comments are ignored
//! - `data: [DONE]` ends the stream
//! - any other `data:` payload is a JSON chunk carrying a delta
//!
//! A chunk that fails to parse is skipped so one garbled frame does not
//! lose the rest of the answer. Read errors and oversized lines abort.

use super::types::{Completion, Message, StreamFragment, ToolCall, Usage};
use crate::error::ChatError;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum length of a single SSE line
const MAX_SSE_LINE_SIZE: usize = 1_000_000;

/// Streaming chunk structure
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// LM Studio thinking tokens (`reasoning_content` on other servers)
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// What a single line of the event stream means
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Ignore,
    Done,
    Data(&'a str),
}

/// Classify one line of the event stream
pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.trim().is_empty() || line.starts_with(':') {
        return SseLine::Ignore;
    }

    let Some(data) = line.strip_prefix("data:") else {
        // event:, id:, retry: carry nothing we use
        return SseLine::Ignore;
    };

    let data = data.strip_prefix(' ').unwrap_or(data);
    match data.trim() {
        "" => SseLine::Ignore,
        "[DONE]" => SseLine::Done,
        _ => SseLine::Data(data),
    }
}

/// Tool call being assembled from deltas: (id, name, arguments)
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream chunks into a final [`Completion`]
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<String>,
    usage: Usage,
    skipped_frames: usize,
}

impl StreamAccumulator {
    /// Apply one `data:` payload, forwarding text deltas to `on_fragment`
    ///
    /// Thinking is emitted before content when a delta carries both; the
    /// two never share a fragment.
    pub fn push_payload(&mut self, payload: &str, on_fragment: &mut dyn FnMut(StreamFragment)) {
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped_frames += 1;
                debug!(error = %e, len = payload.len(), "Skipping malformed stream chunk");
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }

            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                self.reasoning.push_str(&reasoning);
                on_fragment(StreamFragment::Thinking(reasoning));
            }

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                self.content.push_str(&content);
                on_fragment(StreamFragment::Content(content));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                self.merge_tool_call(call);
            }
        }
    }

    fn merge_tool_call(&mut self, call: ToolCallDelta) {
        let idx = match call.index {
            Some(idx) => idx,
            // No index: a new id opens a new call, anything else extends the last
            None => match (&call.id, self.tool_calls.last()) {
                (Some(id), Some(last)) if !last.id.is_empty() && &last.id != id => {
                    self.tool_calls.len()
                }
                (_, Some(_)) => self.tool_calls.len() - 1,
                (_, None) => 0,
            },
        };

        // Ensure we have enough slots
        while self.tool_calls.len() <= idx {
            self.tool_calls.push(PartialToolCall::default());
        }

        let slot = &mut self.tool_calls[idx];
        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            slot.id = id;
        }
        if let Some(function) = call.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                slot.name = name;
            }
            if let Some(arguments) = function.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
    }

    /// Reasoning text received so far
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Number of frames dropped as malformed
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    pub fn finish(self) -> Completion {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .enumerate()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(idx, call)| {
                let id = if call.id.is_empty() {
                    ToolCall::fallback_id(idx)
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect();

        Completion {
            message: Message::assistant_with_tools(self.content, tool_calls),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Splits a byte stream into lines, tolerating UTF-8 sequences cut across chunks
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Result<Option<String>, ChatError> {
        match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None if self.buf.len() > MAX_SSE_LINE_SIZE => Err(ChatError::Stream(format!(
                "SSE line exceeded maximum size of {} bytes",
                MAX_SSE_LINE_SIZE
            ))),
            None => Ok(None),
        }
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Decode a streaming completion body
///
/// The cancellation token is checked before every line and while waiting
/// for bytes; cancellation surfaces as [`ChatError::Cancelled`].
pub async fn decode_event_stream<S, B, E>(
    mut body: S,
    cancel: &CancellationToken,
    on_fragment: &mut (dyn FnMut(StreamFragment) + Send),
) -> Result<Completion, ChatError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut lines = LineBuffer::default();
    let mut acc = StreamAccumulator::default();
    let mut saw_done = false;

    'read: loop {
        while let Some(line) = lines.next_line()? {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            match classify_line(&line) {
                SseLine::Ignore => {}
                SseLine::Done => {
                    saw_done = true;
                    break 'read;
                }
                SseLine::Data(payload) => acc.push_payload(payload, &mut *on_fragment),
            }
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => lines.extend(bytes.as_ref()),
            Some(Err(e)) => return Err(ChatError::Stream(e.to_string())),
            None => {
                // Final line without a trailing newline
                if let Some(line) = lines.take_remainder() {
                    match classify_line(&line) {
                        SseLine::Data(payload) => acc.push_payload(payload, &mut *on_fragment),
                        SseLine::Done => saw_done = true,
                        SseLine::Ignore => {}
                    }
                }
                break;
            }
        }
    }

    debug!(
        done_sentinel = saw_done,
        skipped_frames = acc.skipped_frames(),
        reasoning_len = acc.reasoning().len(),
        "Stream finished"
    );

    Ok(acc.finish())
}
