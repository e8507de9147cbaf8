//! Re-framing of upstream Chat Completions SSE chunks into Messages stream events.
//!
//! [`StreamReframer`] is the per-request state machine: it owns the
//! content-block bookkeeping and turns each upstream line into zero or more
//! [`StreamEvent`]s. [`pump`] drives it from a line-oriented reader into an
//! [`EventSink`] until the upstream is exhausted or the client goes away.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::conversion::map_finish_reason;
use crate::diagnostics::take_first_chars;
use crate::models::chat::{ChatCompletionChunk, ToolCallDelta};
use crate::models::messages::{
    BlockDelta, MessageDelta, MessagesResponse, MessagesUsage, ResponseBlock, StopReason,
    StreamEvent,
};

/// Errors that end a stream early.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reading the next line from the upstream body failed.
    #[error("upstream read failed: {0}")]
    Upstream(#[from] std::io::Error),

    /// The downstream client is gone; nothing more can be delivered.
    #[error("client disconnected")]
    SinkClosed,
}

/// Destination for re-framed events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event, failing once the receiving side has gone away.
    async fn emit(&mut self, event: StreamEvent) -> Result<(), StreamError>;

    /// Resolves when the receiving side has gone away.
    async fn wait_closed(&self);
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamEvent> {
    async fn emit(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        self.send(event).await.map_err(|_| StreamError::SinkClosed)
    }

    async fn wait_closed(&self) {
        mpsc::Sender::closed(self).await
    }
}

/// In-memory sink; never closes.
#[async_trait]
impl EventSink for Vec<StreamEvent> {
    async fn emit(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        self.push(event);
        Ok(())
    }

    async fn wait_closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Whether the upstream should be read further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    /// The `[DONE]` sentinel was seen.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    kind: BlockKind,
}

/// Bookkeeping for one upstream tool call, keyed by its upstream index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallState {
    pub block_index: u32,
    pub id: String,
    pub name: String,
}

/// Counters reported once a stream completes. They never affect the events.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub chunks: usize,
    pub text_chars: usize,
    pub tool_fragments: usize,
    pub tool_arg_chars: usize,
    pub finish_reason: Option<String>,
    pub saw_done: bool,
    pub preview: String,
    preview_chars: usize,
    preview_max: usize,
}

impl StreamStats {
    fn new(preview_max: usize) -> Self {
        Self {
            preview_max,
            ..Self::default()
        }
    }

    fn record_text(&mut self, text: &str) {
        let n = text.chars().count();
        self.text_chars += n;
        if self.preview_chars < self.preview_max {
            let taken = take_first_chars(text, self.preview_max - self.preview_chars);
            self.preview_chars += taken.chars().count();
            self.preview.push_str(taken);
        }
    }
}

/// Per-request state machine translating Chat chunks into Messages events.
///
/// Invariants: at most one content block is open at a time; a block of a
/// different kind is only opened after the open one is stopped; a tool call's
/// block index never changes; the text block, once opened, is never reopened.
#[derive(Debug)]
pub struct StreamReframer {
    message_id: String,
    model: String,
    next_index: u32,
    open: Option<OpenBlock>,
    text_index: Option<u32>,
    tools: BTreeMap<u32, ToolCallState>,
    finish_reason: Option<String>,
    stats: StreamStats,
}

impl StreamReframer {
    /// New state for one streaming request. `preview_max` bounds the text
    /// preview kept for diagnostics (0 disables it).
    pub fn new(model: impl Into<String>, preview_max: usize) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.into(),
            next_index: 0,
            open: None,
            text_index: None,
            tools: BTreeMap::new(),
            finish_reason: None,
            stats: StreamStats::new(preview_max),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn into_stats(self) -> StreamStats {
        self.stats
    }

    /// Tool call bookkeeping keyed by upstream index.
    pub fn tool_calls(&self) -> &BTreeMap<u32, ToolCallState> {
        &self.tools
    }

    /// The opening `message_start` event.
    pub fn start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse::start(self.message_id.clone(), self.model.clone()),
        }
    }

    /// Consume one raw upstream line, appending any resulting events to `out`.
    ///
    /// Blank lines, comments, non-`data:` lines and undecodable payloads are
    /// skipped.
    pub fn push_line(&mut self, line: &str, out: &mut Vec<StreamEvent>) -> LineOutcome {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line.starts_with(':') {
            return LineOutcome::Continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return LineOutcome::Continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.stats.saw_done = true;
            return LineOutcome::Done;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.push_chunk(&chunk, out),
            Err(e) => tracing::debug!(error = %e, "skipping unparseable stream chunk"),
        }
        LineOutcome::Continue
    }

    /// Apply one decoded chunk: tool fragments, then text, then finish reason.
    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<StreamEvent>) {
        let Some(choice) = chunk.choices.first() else {
            return;
        };
        self.stats.chunks += 1;

        for fragment in choice.delta.tool_calls.iter().flatten() {
            self.push_tool_fragment(fragment, out);
        }

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            self.push_text(text, out);
        }

        if let Some(reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            self.finish_reason = Some(reason.to_string());
            self.stats.finish_reason = Some(reason.to_string());
            out.push(message_delta(map_finish_reason(reason)));
        }
    }

    /// Close whatever is open and append the closing sequence.
    pub fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        self.close_open_block(out);
        if self.finish_reason.is_none() {
            out.push(message_delta(StopReason::EndTurn));
        }
        out.push(StreamEvent::MessageStop);
    }

    fn push_tool_fragment(&mut self, fragment: &ToolCallDelta, out: &mut Vec<StreamEvent>) {
        self.stats.tool_fragments += 1;

        let key = u32::try_from(fragment.index.max(0)).unwrap_or(u32::MAX);
        let id = fragment.id.as_deref().map(str::trim).unwrap_or_default();
        let function = fragment.function.as_ref();
        let name = function
            .and_then(|f| f.name.as_deref())
            .map(str::trim)
            .unwrap_or_default();

        let block_index = match self.tools.get_mut(&key) {
            Some(state) => {
                if state.id.is_empty() && !id.is_empty() {
                    state.id = id.to_string();
                }
                if state.name.is_empty() && !name.is_empty() {
                    state.name = name.to_string();
                }
                state.block_index
            }
            None => {
                self.close_open_block(out);
                let index = self.assign_index();
                let state = ToolCallState {
                    block_index: index,
                    id: if id.is_empty() {
                        format!("call_{}_{key}", Uuid::new_v4().simple())
                    } else {
                        id.to_string()
                    },
                    name: if name.is_empty() {
                        format!("tool_{key}")
                    } else {
                        name.to_string()
                    },
                };
                out.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::ToolUse {
                        id: state.id.clone(),
                        name: state.name.clone(),
                        input: json!({}),
                    },
                });
                self.open = Some(OpenBlock {
                    index,
                    kind: BlockKind::ToolUse,
                });
                self.tools.insert(key, state);
                index
            }
        };

        if let Some(args) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty())
        {
            self.stats.tool_arg_chars += args.chars().count();
            out.push(StreamEvent::ContentBlockDelta {
                index: block_index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: args.to_string(),
                },
            });
        }
    }

    fn push_text(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        self.stats.record_text(text);

        if matches!(self.open, Some(open) if open.kind != BlockKind::Text) {
            self.close_open_block(out);
        }

        let index = match self.text_index {
            Some(index) => index,
            None => {
                let index = self.assign_index();
                self.text_index = Some(index);
                self.open = Some(OpenBlock {
                    index,
                    kind: BlockKind::Text,
                });
                out.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };

        out.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn assign_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn close_open_block(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open.take() {
            out.push(StreamEvent::ContentBlockStop { index: open.index });
        }
    }
}

fn message_delta(stop_reason: StopReason) -> StreamEvent {
    StreamEvent::MessageDelta {
        delta: MessageDelta {
            stop_reason,
            stop_sequence: None,
        },
        usage: MessagesUsage::default(),
    }
}

/// Drive `reframer` over every line of `reader`, emitting into `sink`.
///
/// `message_start` goes out before the first read. The closing sequence is
/// emitted after EOF or `[DONE]`. Lines are decoded lossily, so invalid UTF-8
/// never ends the stream. An upstream read error or a closed sink abandons the
/// stream immediately; the caller drops the upstream body.
pub async fn pump<R, S>(
    mut reframer: StreamReframer,
    reader: R,
    sink: &mut S,
) -> Result<StreamStats, StreamError>
where
    R: AsyncBufRead + Unpin + Send,
    S: EventSink + ?Sized,
{
    sink.emit(reframer.start()).await?;

    let mut reader = reader;
    let mut buf = Vec::new();
    let mut pending = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = sink.wait_closed() => return Err(StreamError::SinkClosed),
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            break;
        }

        // Bad byte sequences become U+FFFD; only the JSON decode decides.
        let line = String::from_utf8_lossy(&buf);
        let outcome = reframer.push_line(&line, &mut pending);
        for event in pending.drain(..) {
            sink.emit(event).await?;
        }
        if outcome == LineOutcome::Done {
            break;
        }
    }

    reframer.finish(&mut pending);
    for event in pending.drain(..) {
        sink.emit(event).await?;
    }
    Ok(reframer.into_stats())
}
