use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOG_BODY_MAX: usize = 4096;
const DEFAULT_LOG_STREAM_PREVIEW_MAX: usize = 256;

/// Upstream defaults loaded from a JSON file (`CONFIG_PATH`, default `config.json`).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FileConfig {
    #[serde(default, alias = "nvidia_url")]
    pub upstream_url: Option<String>,
    #[serde(default, alias = "nvidia_key")]
    pub provider_api_key: Option<String>,
}

impl FileConfig {
    /// Load upstream defaults from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;

        let config: FileConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config JSON")?;

        Ok(config)
    }
}

/// Fully resolved process settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:3001`.
    pub addr: String,
    /// Full chat-completions endpoint requests are forwarded to.
    pub upstream_url: String,
    /// Bearer credential sent upstream.
    pub provider_api_key: String,
    /// Inbound secret; empty disables inbound authentication.
    pub server_api_key: String,
    /// End-to-end timeout for non-streaming upstream calls.
    pub timeout: Duration,
    /// Character limit for logged bodies; 0 disables body logging.
    pub log_body_max: usize,
    /// Character limit for the streamed-text preview in stream summaries.
    pub log_stream_preview_max: usize,
}

impl ServerConfig {
    /// Resolve settings from the process environment and optional config file.
    ///
    /// Environment:
    /// - CONFIG_PATH                    -> JSON file with `upstream_url` / `provider_api_key`
    /// - ADDR (or BIND_ADDR)            -> listen address (default 0.0.0.0:3001)
    /// - UPSTREAM_URL                   -> overrides the file's `upstream_url`
    /// - PROVIDER_API_KEY               -> overrides the file's `provider_api_key`
    /// - SERVER_API_KEY                 -> inbound secret (unset = auth disabled)
    /// - UPSTREAM_TIMEOUT_SECONDS       -> non-streaming timeout, > 0 (default 300)
    /// - LOG_BODY_MAX_CHARS             -> body log limit, >= 0 (default 4096)
    /// - LOG_STREAM_TEXT_PREVIEW_CHARS  -> stream preview limit, >= 0 (default 256)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let file = match var("CONFIG_PATH") {
            Some(path) => FileConfig::load_from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                FileConfig::load_from_file(DEFAULT_CONFIG_PATH)?
            }
            None => FileConfig::default(),
        };

        let addr = var("ADDR")
            .or_else(|| var("BIND_ADDR"))
            .map(|a| match a.strip_prefix(':') {
                Some(port) => format!("0.0.0.0:{port}"),
                None => a,
            })
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let upstream_url = var("UPSTREAM_URL")
            .or_else(|| file.upstream_url.map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing upstream_url in config file (or UPSTREAM_URL)"))?;
        let provider_api_key = var("PROVIDER_API_KEY")
            .or_else(|| file.provider_api_key.map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!("missing provider_api_key in config file (or PROVIDER_API_KEY)")
            })?;
        let server_api_key = var("SERVER_API_KEY").unwrap_or_default();

        let timeout_secs = match var("UPSTREAM_TIMEOUT_SECONDS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => bail!("invalid UPSTREAM_TIMEOUT_SECONDS: {raw:?}"),
            },
            None => DEFAULT_TIMEOUT_SECS,
        };
        let log_body_max = parse_limit(var("LOG_BODY_MAX_CHARS"), "LOG_BODY_MAX_CHARS")?
            .unwrap_or(DEFAULT_LOG_BODY_MAX);
        let log_stream_preview_max = parse_limit(
            var("LOG_STREAM_TEXT_PREVIEW_CHARS"),
            "LOG_STREAM_TEXT_PREVIEW_CHARS",
        )?
        .unwrap_or(DEFAULT_LOG_STREAM_PREVIEW_MAX);

        Ok(Self {
            addr,
            upstream_url,
            provider_api_key,
            server_api_key,
            timeout: Duration::from_secs(timeout_secs),
            log_body_max,
            log_stream_preview_max,
        })
    }

    /// Whether inbound requests must present `server_api_key`.
    pub fn inbound_auth_enabled(&self) -> bool {
        !self.server_api_key.is_empty()
    }
}

fn parse_limit(raw: Option<String>, name: &str) -> Result<Option<usize>> {
    raw.map(|r| {
        r.parse::<usize>()
            .map_err(|_| anyhow!("invalid {name}: {r:?}"))
    })
    .transpose()
}
