//! ChatRelay — WebSocket relay for streaming LLM chat.

use std::sync::Arc;

use chatrelay_core::RelayConfig;
use chatrelay_server::{build_router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    chatrelay_core::load_dotenv();
    let config = RelayConfig::from_env();

    // Gateways are built once here and shared read-only by every connection
    let state = Arc::new(AppState::new(config));
    for (id, available) in state.chains.availability() {
        if available {
            info!("Model '{}' available", id);
        } else {
            warn!("Model '{}' unavailable", id);
        }
    }

    let app = build_router(state.clone());

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("ChatRelay listening on {} (WebSocket at /ws/chat)", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
