//! Shared runtime state for sp-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The engine is
//! request-scoped: each handler runs one engine operation end to end.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sp_settlement::SettlementEngine;
use tracing::{error, warn};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub engine: Arc<SettlementEngine>,
    /// Hash of the merged config the daemon booted with.
    pub config_hash: String,
}

impl AppState {
    pub fn new(engine: Arc<SettlementEngine>, config_hash: impl Into<String>) -> Self {
        Self {
            build: BuildInfo {
                service: "sp-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
            config_hash: config_hash.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that reconciles open settlement intents every
/// `interval`. A failed pass is logged and retried on the next tick.
pub fn spawn_intent_reconcile(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.engine.reconcile_open_intents(chrono::Utc::now()).await {
                Ok(report) if report.abandoned > 0 || report.failed > 0 => {
                    warn!(
                        abandoned = report.abandoned,
                        failed = report.failed,
                        "reconcile tick closed intents without committing"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(category = e.category(), error = %e, "reconcile tick failed"),
            }
        }
    });
}
