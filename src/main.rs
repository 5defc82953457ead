//! mathgen-server · HTTP surface for the math problem engine
//!
//! - Axum JSON API (generation, grading, sessions, attempts)
//! - Optional OpenAI-assisted generation with template fallback
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   OPENAI_API_KEY     : enables AI-assisted generation if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_MODEL       : default "gpt-4o-mini"
//!   ENGINE_CONFIG_PATH : path to TOML config (ai, prompts, grading, difficulty overrides)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use mathgen::routes::build_router;
use mathgen::state::AppState;
use mathgen::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (generator set, stores, OpenAI client, prompts).
  let state = Arc::new(AppState::new());

  // Expire sessions, close timed-out attempts and evict old work in the background.
  let _sweeper = state.spawn_sweeper(Duration::from_secs(60));

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "mathgen", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "mathgen", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
