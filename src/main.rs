//! This file defines the statboard binary entry point.

use statboard::app;
use statboard::app_state::AppState;
use statboard::cli;
use statboard::metrics;
use statboard::server;
use statboard::tracing;

use std::sync::Arc;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    let state = Arc::new(AppState::new(&args));
    let service = app::service(state);
    server::serve(&args, service).await;
    tracing::shutdown_tracing();
}
