use axum::response::{IntoResponse, Response};
use http::StatusCode;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv and structured tracing based on RUST_LOG.
/// - Supports explicit env file paths via ENV_FILE or DOTENV_PATH
/// - Falls back to default .env discovery
/// - Logs the source used
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    // Initialize tracing (respects RUST_LOG potentially provided by the env file)
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Build an HTTP client honoring proxy environment variables.
///
/// No client-wide timeout is set: streaming calls must be able to run
/// indefinitely, buffered calls set their own per-request timeout.
///
/// Environment:
/// - MESSAGES2CHAT_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - MESSAGES2CHAT_PROXY_URL = <url>         -> proxy for all schemes
/// - HTTP_PROXY / http_proxy                 -> HTTP proxy
/// - HTTPS_PROXY / https_proxy               -> HTTPS proxy
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    let no_proxy = std::env::var("MESSAGES2CHAT_NO_PROXY")
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| v == "1" || v == "true" || v == "yes" || v == "on")
        .unwrap_or(false);

    if no_proxy {
        builder = builder.no_proxy();
    } else {
        if let Ok(url) = std::env::var("MESSAGES2CHAT_PROXY_URL") {
            let u = url.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::all(u) {
                    builder = builder.proxy(p);
                }
            }
        }
        if let Ok(http_p) = std::env::var("HTTP_PROXY").or_else(|_| std::env::var("http_proxy")) {
            let u = http_p.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::http(u) {
                    builder = builder.proxy(p);
                }
            }
        }
        if let Ok(https_p) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("https_proxy"))
        {
            let u = https_p.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::https(u) {
                    builder = builder.proxy(p);
                }
            }
        }
    }

    builder = builder.user_agent(format!("messages2chat/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Build a proxy-generated JSON error with the given HTTP status and code.
pub fn error_response(status: StatusCode, code: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "code": code,
            "message": code,
        }
    });
    (status, axum::Json(body)).into_response()
}
