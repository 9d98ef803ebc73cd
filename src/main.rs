//! GOD Chatbot server
//!
//! Entry point for the Mahamantra question-answering service.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;

use god_chatbot::config::AppConfig;
use god_chatbot::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        name: "config.loaded",
        model = %config.model.model,
        location = %config.model.location,
        presentation = ?config.presentation.mode,
        "Configuration loaded"
    );

    server::start_server(Arc::new(config)).await
}
