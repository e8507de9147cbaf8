//! Data models for the Messages and Chat Completions APIs.
//!
//! This module groups two submodules:
//! - `messages`: the inbound Messages API request, reply and streaming event models.
//! - `chat`: the outbound Chat Completions request, response and chunk models.
//!
//! The mapping logic between the two lives in `crate::conversion` (request and
//! synchronous response) and `crate::streaming` (incremental events).

pub mod chat;
pub mod messages;

pub use chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage,
    ContentPart, ToolDefinition,
};
pub use messages::{
    ContentBlock, Message, MessageContent, MessagesRequest, MessagesResponse, ResponseBlock,
    StopReason, StreamEvent,
};
