#![forbid(unsafe_code)]
#![doc = r#"
Messages2Chat

Accept Messages API requests, translate them into Chat Completions requests and proxy them to a single configured upstream, translating replies and event streams back.

Crate highlights
- Library: pure conversion via `to_chat_request(&MessagesRequest)` and `to_messages_response(&ChatCompletionResponse)`.
- Streaming: `streaming::StreamReframer` turns upstream chunks into Messages stream events; `streaming::pump` drives it into any `EventSink`.
- HTTP server (in `server`): `POST /v1/messages` and a liveness route on `/`.

Modules
- `models`: Data structures for the Messages and Chat Completions APIs.
- `conversion`: Request mapping Messages → Chat and reply mapping Chat → Messages.
- `streaming`: Incremental SSE re-framing.
- `server`: Axum router/handlers (the binary uses this).
- `upstream`: Outbound HTTP client.
- `auth`, `config`, `error`, `diagnostics`, `util`: inbound gate, settings, error replies, logging helpers, tracing setup.
"#]

pub mod auth;
pub mod config;
pub mod conversion;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod server;
pub mod streaming;
pub mod upstream;
pub mod util;

// Re-export the primary conversion functions for ergonomic library use.
pub use crate::conversion::{to_chat_request, to_messages_response};

// Re-export model namespaces for convenience (downstream users can do `use messages2chat::chat`).
pub use crate::models::{chat, messages};
