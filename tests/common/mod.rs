#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use messages2chat::config::ServerConfig;
use messages2chat::server::{build_router, AppState};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

pub const UPSTREAM_PATH: &str = "/v1/chat/completions";
pub const PROVIDER_KEY: &str = "provider-key";

/// What the mock upstream answers with.
#[derive(Clone)]
pub enum UpstreamReply {
    Json { status: StatusCode, body: Value },
    Raw { status: StatusCode, body: String },
    /// Each entry becomes one `data:` line.
    Sse(Vec<String>),
    /// Sends a partial body, then fails mid-transfer.
    BrokenBody { status: StatusCode },
    /// Like `Sse`, then the body never ends; `released` fires once it is dropped.
    SseHeld {
        lines: Vec<String>,
        released: Arc<Notify>,
    },
}

/// Signals when the held body is dropped (client went away).
struct ReleaseOnDrop(Arc<Notify>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

fn sse_text(lines: Vec<String>) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str("data: ");
        text.push_str(&line);
        text.push_str("\n\n");
    }
    text
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .expect("sse response")
}

/// Request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    reply: UpstreamReply,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

/// In-process chat-completions endpoint on an ephemeral port.
pub struct MockUpstream {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start(reply: UpstreamReply) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            reply,
            requests: requests.clone(),
        };
        let router = Router::new()
            .route(UPSTREAM_PATH, post(upstream_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router.into_make_service());
        tokio::spawn(async move {
            tokio::select! {
                res = server => {
                    if let Err(err) = res {
                        eprintln!("Mock upstream server error: {err:?}");
                    }
                }
                _ = rx => {}
            }
        });

        MockUpstream {
            url: format!("http://{addr}{UPSTREAM_PATH}"),
            requests,
            shutdown: Some(tx),
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn last_request(&self) -> CapturedRequest {
        self.requests()
            .pop()
            .expect("mock upstream received no request")
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn upstream_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(CapturedRequest {
            authorization: header_str(header::AUTHORIZATION),
            accept: header_str(header::ACCEPT),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });

    match state.reply {
        UpstreamReply::Json { status, body } => (status, axum::Json(body)).into_response(),
        UpstreamReply::Raw { status, body } => (status, body).into_response(),
        UpstreamReply::Sse(lines) => sse_response(Body::from(sse_text(lines))),
        UpstreamReply::BrokenBody { status } => {
            let body = futures_util::stream::iter([
                Ok(axum::body::Bytes::from_static(b"{\"error\":")),
                Err(std::io::Error::other("upstream hung up")),
            ]);
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from_stream(body))
                .expect("broken response")
        }
        UpstreamReply::SseHeld { lines, released } => {
            let guard = ReleaseOnDrop(released);
            let body = futures_util::stream::iter([axum::body::Bytes::from(sse_text(lines))])
                .chain(futures_util::stream::pending())
                .map(move |chunk| {
                    let _held = &guard;
                    Ok::<_, Infallible>(chunk)
                });
            sse_response(Body::from_stream(body))
        }
    }
}

/// The real router bound to an ephemeral local port.
pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    join: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    pub async fn start(upstream_url: &str, server_api_key: &str) -> Self {
        let config = ServerConfig {
            addr: "127.0.0.1:0".into(),
            upstream_url: upstream_url.to_string(),
            provider_api_key: PROVIDER_KEY.into(),
            server_api_key: server_api_key.into(),
            timeout: Duration::from_secs(5),
            log_body_max: 1024,
            log_stream_preview_max: 64,
        };
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("upstream http client");
        let app = build_router(Arc::new(AppState::new(config, http)));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("test server local addr");
        let join = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                eprintln!("Test server error: {err:?}");
            }
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed building reqwest client");

        TestServer {
            base_url: format!("http://{addr}"),
            addr,
            join,
            client,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    /// POST a JSON body to `/v1/messages`, optionally with extra headers.
    pub async fn post_messages(
        &self,
        body: &Value,
        headers: &[(&str, &str)],
    ) -> reqwest::Result<reqwest::Response> {
        let mut rb = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(body);
        for (k, v) in headers {
            rb = rb.header(*k, *v);
        }
        rb.send().await
    }

    pub async fn post_raw(&self, body: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// One parsed SSE frame.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

/// Split a complete SSE body into frames.
pub fn parse_sse(text: &str) -> Vec<SseFrame> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut event = String::new();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim());
                }
            }
            SseFrame {
                event,
                data: serde_json::from_str(&data).expect("sse data is json"),
            }
        })
        .collect()
}
