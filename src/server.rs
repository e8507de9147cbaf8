use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{any, post},
    Json, Router,
};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::InboundAuth;
use crate::config::ServerConfig;
use crate::conversion::{to_chat_request, to_messages_response};
use crate::diagnostics;
use crate::error::ProxyError;
use crate::models::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::models::messages::{MessagesRequest, StreamEvent};
use crate::streaming::{self, StreamError, StreamReframer};
use crate::upstream::{self, UpstreamClient};

/// Events buffered between the re-framing task and the SSE body.
const EVENT_BUFFER: usize = 64;

/// Inbound bodies carry inline base64 images.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state used by the HTTP server and handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub auth: InboundAuth,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: ServerConfig, http: reqwest::Client) -> Self {
        Self {
            auth: InboundAuth::new(config.server_api_key.clone()),
            upstream: UpstreamClient::new(http, &config),
            config,
        }
    }
}

/// Build the Axum router with `/` (liveness) and `/v1/messages`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(root))
        .route("/v1/messages", post(messages))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "messages2chat",
        "health": "ok",
    }))
}

/// Translate one Messages API call into a chat-completions call and back.
async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req_id = format!("req_{}", Uuid::new_v4().simple());
    let span = tracing::info_span!("messages", req_id = %req_id);
    async move {
        match handle(state, headers, body).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}

async fn handle(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    if !state.auth.verify(&headers) {
        return Err(ProxyError::Unauthorized);
    }

    let inbound: MessagesRequest =
        serde_json::from_slice(&body).map_err(ProxyError::InvalidJson)?;
    if inbound.model.trim().is_empty() {
        return Err(ProxyError::MissingModel);
    }

    let outbound = to_chat_request(&inbound)?;
    diagnostics::log_forwarded_request(&state.config, &inbound, &outbound);

    if inbound.stream {
        proxy_stream(state, outbound).await
    } else {
        proxy_json(&state, &outbound).await
    }
}

async fn proxy_json(
    state: &AppState,
    outbound: &ChatCompletionRequest,
) -> Result<Response, ProxyError> {
    let (status, body) = state.upstream.send(outbound).await?;
    if !status.is_success() {
        diagnostics::log_upstream_body(&state.config, &body);
        return Ok(passthrough(status, body));
    }

    let parsed: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| {
        diagnostics::log_upstream_body(&state.config, &body);
        ProxyError::InvalidUpstreamJson(e)
    })?;
    Ok(Json(to_messages_response(&parsed)).into_response())
}

async fn proxy_stream(
    state: Arc<AppState>,
    outbound: ChatCompletionRequest,
) -> Result<Response, ProxyError> {
    let resp = state.upstream.send_streaming(&outbound).await?;
    let status = resp.status();
    if !status.is_success() {
        let raw = match resp.bytes().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, status = status.as_u16(), "failed reading upstream error body");
                Bytes::new()
            }
        };
        diagnostics::log_upstream_body(&state.config, &raw);
        return Ok(passthrough(status, raw));
    }

    let reframer = StreamReframer::new(outbound.model, state.config.log_stream_preview_max);
    let reader = upstream::body_reader(resp);
    let (mut tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);

    tokio::spawn(
        async move {
            match streaming::pump(reframer, reader, &mut tx).await {
                Ok(stats) => diagnostics::log_stream_summary(&stats),
                Err(StreamError::SinkClosed) => {
                    tracing::info!("client disconnected, upstream stream dropped")
                }
                Err(e) => tracing::warn!(error = %e, "stream aborted"),
            }
        }
        .in_current_span(),
    );

    let events = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default().event(event.name()).json_data(&event);
        Some((sse, rx))
    });

    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(events),
    )
        .into_response())
}

/// Upstream non-2xx reply, relayed verbatim.
fn passthrough(status: StatusCode, body: Bytes) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}
