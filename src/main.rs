use std::sync::Arc;

use messages2chat::config::ServerConfig;
use messages2chat::server::{build_router, AppState};
use messages2chat::util::{build_http_client_from_env, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;

    tracing::info!("Forwarding to {}", config.upstream_url);
    tracing::info!(
        "Upstream timeout {}s (non-streaming), body log limit {} chars",
        config.timeout.as_secs(),
        config.log_body_max
    );
    if config.inbound_auth_enabled() {
        tracing::info!("Inbound auth: enabled (Authorization: Bearer or x-api-key)");
    } else {
        tracing::warn!("Inbound auth: disabled (SERVER_API_KEY not set)");
    }

    let addr = config.addr.clone();
    let state = Arc::new(AppState::new(config, build_http_client_from_env()));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("messages2chat listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
