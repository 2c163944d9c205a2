//! Fieldline Service - HTTP API over the downsampling engine.
//!
//! Run with: `cargo run -p fieldline-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use fieldline_service::{AppState, Config, StorageBackend, api};

/// Fieldline Service - chart series, ingest and export over HTTP.
#[derive(Parser, Debug)]
#[command(name = "fieldline-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, conflicts_with = "memory")]
    database: Option<PathBuf>,

    /// Keep readings in memory only.
    #[arg(long)]
    memory: bool,

    /// Import a dashboard fixture document before serving.
    #[arg(long, value_name = "FIXTURE")]
    import: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldline_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = db_path;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config.validate()?;

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::open(config)?;

    if let Some(fixture) = &args.import {
        let result = fieldline_store::import_file(&state.engine, fixture).await?;
        info!(
            "Imported {} channels and {} readings from {}",
            result.channels,
            result.readings,
            fixture.display()
        );
    }

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
