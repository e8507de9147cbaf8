use crate::models::chat::{
    self, ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage, ContentPart,
};
use crate::models::messages::{
    ContentBlock, ImageSource, MessageContent, MessagesRequest, MessagesResponse, MessagesUsage,
    ResponseBlock, StopReason, Tool,
};
use base64::Engine as _;
use serde_json::{json, Map, Value};

/// Failure to interpret inbound content.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("invalid message content for role {role:?}: {reason}")]
    InvalidContent { role: String, reason: String },
}

/// Convert a Messages API request into a Chat Completions request.
///
/// Mapping highlights:
/// - system: prepended as a `system` message when non-blank.
/// - user blocks: each `tool_result` becomes its own `tool` message, emitted before
///   the user's text/image parts.
/// - assistant blocks: text joined by newline, `tool_use` blocks become `tool_calls`.
/// - max_tokens: zero or absent becomes 1024.
/// - tools and tool_choice: reshaped into the function-calling vocabulary.
pub fn to_chat_request(
    src: &MessagesRequest,
) -> Result<ChatCompletionRequest, ConversionError> {
    let mut messages = Vec::with_capacity(src.messages.len() + 1);

    let system = extract_system_text(src.system.as_ref());
    let system = system.trim();
    if !system.is_empty() {
        messages.push(ChatMessage::text("system", system));
    }

    for m in &src.messages {
        let role = m.role.trim();
        if role.is_empty() {
            continue;
        }

        match MessageContent::decode(&m.content, role)? {
            MessageContent::Text(text) => messages.push(ChatMessage::text(role, text)),
            MessageContent::Blocks(blocks) => match role {
                "user" => map_user_blocks(&blocks, &mut messages),
                "assistant" => messages.push(map_assistant_blocks(&blocks)),
                _ => messages.push(ChatMessage::text(role, join_text_blocks(&blocks))),
            },
        }
    }

    let tools = if src.tools.is_empty() {
        None
    } else {
        Some(src.tools.iter().map(map_tool).collect())
    };

    Ok(ChatCompletionRequest {
        model: src.model.clone(),
        messages,
        max_tokens: src.effective_max_tokens(),
        temperature: src.temperature,
        stream: src.stream,
        tools,
        tool_choice: src.tool_choice.as_ref().map(map_tool_choice),
    })
}

/// System prompt as text: a string, or the joined `text` blocks of an array.
fn extract_system_text(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::String(s)) => s.clone(),
        Some(v @ Value::Array(_)) => match MessageContent::decode(v, "system") {
            Ok(MessageContent::Blocks(blocks)) => join_text_blocks(&blocks),
            _ => String::new(),
        },
        _ => String::new(),
    }
}

fn join_text_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } if !text.is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn map_user_blocks(blocks: &[ContentBlock], out: &mut Vec<ChatMessage>) {
    for b in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
        } = b
        {
            if tool_use_id.trim().is_empty() {
                continue;
            }
            out.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(tool_result_text(content.as_ref()))),
                tool_call_id: Some(tool_use_id.clone()),
                tool_calls: None,
            });
        }
    }

    let mut parts = Vec::new();
    for b in blocks {
        match b {
            ContentBlock::Text { text } if !text.is_empty() => {
                parts.push(ContentPart::Text { text: text.clone() })
            }
            ContentBlock::Image {
                source: Some(source),
            } => {
                if let Some(url) = image_url(source) {
                    parts.push(ContentPart::ImageUrl {
                        image_url: chat::ImageUrl { url },
                    });
                }
            }
            _ => {}
        }
    }

    let content = match parts.len() {
        0 => ChatContent::Text(String::new()),
        1 => match parts.pop() {
            // A single text part collapses to plain string content.
            Some(ContentPart::Text { text }) => ChatContent::Text(text),
            Some(part) => ChatContent::Parts(vec![part]),
            None => ChatContent::Text(String::new()),
        },
        _ => ChatContent::Parts(parts),
    };
    out.push(ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        tool_call_id: None,
        tool_calls: None,
    });
}

/// Tool result content as a string: a JSON string is unwrapped, anything else
/// keeps its JSON text.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Build an `image_url` for a source; `None` drops the image.
fn image_url(source: &ImageSource) -> Option<String> {
    match source {
        ImageSource::Base64 { media_type, data } => {
            if media_type.is_empty() || data.is_empty() {
                return None;
            }
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .ok()
                .map(|_| format!("data:{media_type};base64,{data}"))
        }
        ImageSource::Url { url } if !url.is_empty() => Some(url.clone()),
        _ => None,
    }
}

fn map_assistant_blocks(blocks: &[ContentBlock]) -> ChatMessage {
    let text = join_text_blocks(blocks);

    let tool_calls: Vec<chat::ToolCall> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input }
                if !id.trim().is_empty() && !name.trim().is_empty() =>
            {
                Some(chat::ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: chat::FunctionCall {
                        name: name.clone(),
                        arguments: input
                            .as_ref()
                            .map(Value::to_string)
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                })
            }
            _ => None,
        })
        .collect();

    ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(ChatContent::Text(text)),
        tool_call_id: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    }
}

fn map_tool(t: &Tool) -> chat::ToolDefinition {
    chat::ToolDefinition::Function {
        function: chat::FunctionDef {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone().filter(|v| !v.is_null()),
        },
    }
}

/// Map a Messages `tool_choice` onto the Chat vocabulary.
fn map_tool_choice(v: &Value) -> Value {
    let obj = match v {
        Value::Object(o) => o,
        _ => return v.clone(),
    };
    match obj.get("type").and_then(Value::as_str) {
        Some(kind @ ("auto" | "none" | "required")) => Value::String(kind.to_string()),
        Some("tool") => match obj.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => json!({
                "type": "function",
                "function": { "name": name }
            }),
            _ => Value::String("auto".to_string()),
        },
        _ => v.clone(),
    }
}

/// Convert a Chat Completions response into a Messages API reply.
///
/// Only the first choice is considered. Tool call arguments are materialized
/// into structured input; unparseable arguments are wrapped as `{"text": raw}`.
pub fn to_messages_response(src: &ChatCompletionResponse) -> MessagesResponse {
    let mut content = Vec::new();
    let mut finish_reason = "";

    if let Some(choice) = src.choices.first() {
        finish_reason = choice.finish_reason.as_deref().unwrap_or_default();
        if let Some(text) = choice.message.content.as_deref().filter(|t| !t.is_empty()) {
            content.push(ResponseBlock::Text {
                text: text.to_string(),
            });
        }
        for tc in choice.message.tool_calls.iter().flatten() {
            content.push(ResponseBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: arguments_to_input(&tc.function.arguments),
            });
        }
    }

    let usage = src
        .usage
        .as_ref()
        .map(|u| {
            let cache_read = u
                .prompt_tokens_details
                .as_ref()
                .map(|d| d.cached_tokens)
                .unwrap_or(0);
            MessagesUsage {
                input_tokens: u.prompt_tokens.saturating_sub(cache_read),
                output_tokens: u.completion_tokens,
                cache_read_input_tokens: cache_read,
            }
        })
        .unwrap_or_default();

    MessagesResponse {
        id: src.id.clone(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: src.model.clone(),
        content,
        stop_reason: Some(map_finish_reason(finish_reason)),
        stop_sequence: None,
        usage,
    }
}

fn arguments_to_input(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => Value::Object(Map::new()),
        Value::String(s) if s.trim().is_empty() => Value::Object(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => json!({ "text": s }),
        },
        other => json!({ "text": other.to_string() }),
    }
}

/// Map an upstream finish reason onto a Messages stop reason.
///
/// `content_filter` maps to `stop_sequence`; clients depend on that value.
pub fn map_finish_reason(finish: &str) -> StopReason {
    match finish {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" => StopReason::ToolUse,
        "content_filter" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}
