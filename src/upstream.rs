//! HTTP client side of the proxy: one POST per inbound request.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http::{header, StatusCode};
use tokio_util::io::StreamReader;

use crate::config::ServerConfig;
use crate::models::chat::ChatCompletionRequest;

/// Upstream SSE body as a buffered byte reader.
pub type UpstreamBody =
    StreamReader<Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>, Bytes>;

/// Client for the configured chat-completions endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, config: &ServerConfig) -> Self {
        Self {
            http,
            url: config.upstream_url.clone(),
            api_key: config.provider_api_key.clone(),
            timeout: config.timeout,
        }
    }

    fn post(&self, body: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        self.http
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
            .json(body)
    }

    /// Buffered round trip bounded by the configured timeout.
    ///
    /// Any status is returned together with the full body; only transport
    /// failures (connect, timeout, body read) are errors.
    pub async fn send(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<(StatusCode, Bytes), reqwest::Error> {
        let resp = self.post(body).timeout(self.timeout).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        tracing::info!(status = status.as_u16(), "upstream responded");
        Ok((status, bytes))
    }

    /// Open a streaming request (`stream: true`, no timeout).
    ///
    /// The caller inspects the status before consuming the body.
    pub async fn send_streaming(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut body = body.clone();
        body.stream = true;
        let resp = self
            .post(&body)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        tracing::info!(status = resp.status().as_u16(), "upstream responded (stream)");
        Ok(resp)
    }
}

/// Adapt a streaming response body into a line-readable source.
pub fn body_reader(resp: reqwest::Response) -> UpstreamBody {
    let stream: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> =
        Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
    StreamReader::new(stream)
}
