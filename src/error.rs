use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::conversion::ConversionError;
use crate::util::error_response;

/// Failures of a `/v1/messages` call that end with a proxy-generated reply.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("request has no model")]
    MissingModel,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Connect, timeout or body-read failure talking to the upstream.
    #[error("upstream request failed: {0}")]
    UpstreamTransport(#[from] reqwest::Error),

    #[error("upstream reply is not a chat completion: {0}")]
    InvalidUpstreamJson(#[source] serde_json::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidJson(_) | Self::MissingModel | Self::Conversion(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UpstreamTransport(_) | Self::InvalidUpstreamJson(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable error code reported in the body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingModel => "missing_model",
            Self::Conversion(_) => "request_conversion_failed",
            Self::UpstreamTransport(_) => "upstream_request_failed",
            Self::InvalidUpstreamJson(_) => "invalid_upstream_json",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), "request rejected");
        }
        error_response(status, self.code())
    }
}
