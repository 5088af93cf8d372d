//! Application entry point for the `piliseed` backend service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Open the document store (PostgreSQL, or in-process for `DATABASE_URL=memory`)
//! - Create the database schema if it does not exist
//! - Build the model and thumbnail clients from the loaded configuration
//! - Mount all API routes via the `routes` gateway (EMBP pattern)
//! - Bind the Axum HTTP server and serve requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string or `memory`
//! - `GEMINI_API_KEY` – model API key; its absence fails the first model call
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list.
use std::{env, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use piliseed::{
    config,
    llm::GeminiClient,
    schema,
    store::{MemoryDocumentStore, PgDocumentStore, SharedStore},
    thumbnails::WikipediaThumbnails,
    AppState, Config,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;

    let model = GeminiClient::new(cfg.model.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build model client: {}", e))?;
    let thumbnails = WikipediaThumbnails::new(cfg.thumbnail_api_url.clone(), cfg.model.timeout)?;

    let state = AppState::new(store, Arc::new(model), Arc::new(thumbnails), cfg.start_month);

    // Build app from routes gateway (EMBP)
    let app: Router = piliseed::router(state);

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect to PostgreSQL and ensure the schema, or use the in-process store.
async fn open_store(cfg: &Config) -> Result<SharedStore> {
    // ---
    if cfg.uses_memory_store() {
        tracing::warn!("Using in-process document store; data is lost on restart");
        return Ok(Arc::new(MemoryDocumentStore::new()));
    }

    tracing::info!("Attempting to connect to database: {}", config::mask_db_url(&cfg.db_url));

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(Arc::new(PgDocumentStore::new(pool)))
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces it on, `0|false|no` off,
///   otherwise it follows TTY detection
/// - Span events (`AXUM_SPAN_EVENTS`): `"full"` emits ENTER, EXIT and CLOSE,
///   `"enter_exit"` ENTER and EXIT, anything else CLOSE only. Workflow stage
///   spans are the main consumer.
/// - Level: `RUST_LOG` when set, else `AXUM_LOG_LEVEL` (default `debug`)
///
/// Call once, before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
