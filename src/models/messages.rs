use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::conversion::ConversionError;

/// Output cap applied when the client omits `max_tokens` or sends zero.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Messages API request (the subset this proxy understands).
///
/// Unknown top-level fields such as `thinking` or `metadata` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    /// Either a plain string or an array of content blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

impl MessagesRequest {
    /// `max_tokens` with the zero/absent default applied.
    pub fn effective_max_tokens(&self) -> u32 {
        match self.max_tokens {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_TOKENS,
        }
    }
}

/// One conversation turn as sent by the client.
///
/// `content` stays raw on the wire type; [`MessageContent::decode`] is the only
/// place that decides between the string and block-list shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

/// Decoded message content.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Decode a raw `content` value: a string (null reads as empty), then a block array.
    ///
    /// Blocks without a `type` decode as [`ContentBlock::Other`].
    pub fn decode(raw: &Value, role: &str) -> Result<Self, ConversionError> {
        let invalid = |reason: String| ConversionError::InvalidContent {
            role: role.to_string(),
            reason,
        };
        let items = match raw {
            Value::String(s) => return Ok(Self::Text(s.clone())),
            Value::Null => return Ok(Self::Text(String::new())),
            Value::Array(items) => items,
            other => return Err(invalid(format!("expected string or array, got {other}"))),
        };
        items
            .iter()
            .map(|item| match item.get("type") {
                None | Some(Value::Null) => Ok(ContentBlock::Other),
                Some(Value::String(t)) if t.is_empty() => Ok(ContentBlock::Other),
                Some(_) => ContentBlock::deserialize(item),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Blocks)
            .map_err(|e| invalid(e.to_string()))
    }
}

/// Typed content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default, deserialize_with = "null_as_empty")]
        text: String,
    },
    Image {
        #[serde(default)]
        source: Option<ImageSource>,
    },
    ToolUse {
        #[serde(default, deserialize_with = "null_as_empty")]
        id: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResult {
        #[serde(default, deserialize_with = "null_as_empty")]
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
    },
    /// Block types the converter does not translate (e.g. `thinking`).
    #[serde(other)]
    Other,
}

/// `null` string fields read as empty.
fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Image payload: inline base64 data or a remote url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 {
        #[serde(default, deserialize_with = "null_as_empty")]
        media_type: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        data: String,
    },
    Url {
        #[serde(default, deserialize_with = "null_as_empty")]
        url: String,
    },
    #[serde(other)]
    Unsupported,
}

/// Tool declaration in Messages form.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for the tool input; opaque to the converter.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

// ============================================================================
// Messages API Response Models
// ============================================================================

/// Output content block in a reply (also used as the seed of a streamed block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// Stop reasons emitted to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// Token accounting in Messages form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
}

/// Complete (non-streaming) Messages API reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String, // "message"
    pub role: String, // "assistant"
    pub model: String,
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: MessagesUsage,
}

impl MessagesResponse {
    /// Empty assistant message used as the `message_start` payload.
    pub fn start(id: String, model: String) -> Self {
        Self {
            id,
            kind: "message".to_string(),
            role: "assistant".to_string(),
            model,
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: MessagesUsage::default(),
        }
    }
}

// ============================================================================
// Messages API Streaming Event Models
// ============================================================================

/// Incremental payload of a `content_block_delta` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

/// Payload of a `message_delta` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

/// Server-sent event in Messages streaming form.
///
/// Serialized as the `data:` payload; [`StreamEvent::name`] supplies the
/// matching `event:` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessagesResponse,
    },
    ContentBlockStart {
        index: u32,
        content_block: ResponseBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        usage: MessagesUsage,
    },
    MessageStop,
}

impl StreamEvent {
    /// SSE event name; always equal to the `type` tag of the payload.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
        }
    }
}
