//! Schologic · Grading & Integrity Backend
//!
//! - Axum HTTP API for rubric scoring, integrity analytics, quizzes and practicum grades
//! - Optional AI-detection service and LLM rubric drafting (via environment variables)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GRADING_CONFIG_PATH : path to TOML config (thresholds, weights, prompts)
//!   DETECTION_API_URL   : enables submission analysis if present
//!   DETECTION_API_KEY   : bearer token for the detection service (optional)
//!   LLM_API_KEY         : enables rubric drafting if present
//!   LLM_BASE_URL        : default "https://api.publicai.co/v1"
//!   LLM_MODEL           : default "swiss-ai/apertus-70b-instruct"
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod detection;
mod openai;
mod rubric;
mod integrity;
mod practicum;
mod quiz;
mod store;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (store, config, collaborator clients).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "grading_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "grading_backend", error = %e, "Failed to listen for shutdown signal");
    return;
  }
  info!(target: "grading_backend", "Shutdown signal received");
}
