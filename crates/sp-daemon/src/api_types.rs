//! Request and response types for sp-daemon HTTP endpoints.
//!
//! No business logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_db::IntentRow;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// Ledger client in use ("paper" | "rpc").
    pub ledger: String,
    pub config_hash: String,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx settlement response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable snake_case category, e.g. "precondition_failed".
    pub category: String,
    pub hint: String,
}

// ---------------------------------------------------------------------------
// /v1/shifts/:id/checkout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOutBody {
    pub end_time_utc: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// /v1/intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentsResponse {
    pub open: usize,
    pub intents: Vec<IntentRow>,
    /// Abandoned intents still blocking their shift.
    pub abandoned: Vec<IntentRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveBody {
    pub note: Option<String>,
}
