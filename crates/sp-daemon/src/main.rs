//! sp-daemon entry point.
//!
//! Sets up tracing, loads config, connects the store and the ledger, wires
//! middleware, and starts the HTTP server. Route handlers live in
//! `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::{HeaderValue, Method};
use sp_config::UnusedKeyPolicy;
use sp_daemon::{routes, state};
use sp_settlement::{bootstrap, EngineSettings, PgSessionStore, SettlementEngine};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Production injects env
    // vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = bootstrap::load_settings_from_env(UnusedKeyPolicy::Warn)?;

    let pool = sp_db::connect_from_env().await?;
    let db = sp_db::status(&pool).await?;
    if !db.has_sessions_table {
        bail!("database is not migrated; run `sp-cli db migrate` first");
    }

    let wiring = bootstrap::connect_ledger(&settings.config, &settings.secrets).await?;
    let engine = Arc::new(SettlementEngine::new(
        Arc::new(PgSessionStore::new(pool)),
        wiring.ledger,
        wiring.platform,
        EngineSettings::from_config(&settings.config),
    ));

    let shared = Arc::new(state::AppState::new(engine, settings.config_hash));
    state::spawn_intent_reconcile(Arc::clone(&shared), RECONCILE_INTERVAL);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("sp-daemon listening on http://{}", addr);

    let served = axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed");

    shared.engine.shutdown().await;
    served
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("SP_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
