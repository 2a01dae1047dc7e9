//! Axum router and HTTP handlers for sp-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers translate HTTP to one engine call and back.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use sp_settlement::{SettlementError, ValidateRequest};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{CheckOutBody, ErrorResponse, HealthResponse, IntentsResponse, ResolveBody},
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/shifts/:id", get(shift_get))
        .route("/v1/shifts/:id/checkout", post(shift_checkout))
        .route("/v1/shifts/:id/validate", post(shift_validate))
        .route("/v1/shifts/:id/release", post(shift_release))
        .route("/v1/shifts/:id/refuse", post(shift_refuse))
        .route("/v1/intents", get(intents_list))
        .route("/v1/intents/reconcile", post(intents_reconcile))
        .route("/v1/intents/:id/resolve", post(intent_resolve))
        .route("/v1/stats", get(stats))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// A settlement failure rendered as `{error, category, hint}`.
pub struct ApiError(pub SettlementError);

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &SettlementError) -> StatusCode {
    match e {
        SettlementError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::PreconditionFailed(_) => StatusCode::CONFLICT,
        SettlementError::InsufficientFunds(_)
        | SettlementError::AccountNotActivated(_)
        | SettlementError::LedgerSubmissionRejected { .. }
        | SettlementError::OwnerMismatch { .. }
        | SettlementError::EscrowNotFound(_)
        | SettlementError::PermissionDenied(_)
        | SettlementError::EntryGone(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::LedgerUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                category: self.0.category().to_string(),
                hint: self.0.hint(),
            }),
        )
            .into_response()
    }
}

/// Empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(SettlementError::InvalidInput(format!("request body: {e}"))))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            ledger: st.engine.ledger().name().to_string(),
            config_hash: st.config_hash.clone(),
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/shifts
// ---------------------------------------------------------------------------

pub(crate) async fn shift_get(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let row = st.engine.get_shift(id).await?;
    Ok((StatusCode::OK, Json(row)).into_response())
}

pub(crate) async fn shift_checkout(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CheckOutBody = parse_body(&body)?;
    let out = st.engine.check_out_shift(id, req.end_time_utc).await?;
    info!(session_id = %id, "shifts/checkout");
    Ok((StatusCode::OK, Json(out)).into_response())
}

pub(crate) async fn shift_validate(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: ValidateRequest = parse_body(&body)?;
    let out = st.engine.validate_shift(id, &req).await?;
    info!(session_id = %id, escrow_tx = %out.escrow_tx, "shifts/validate");
    Ok((StatusCode::OK, Json(out)).into_response())
}

pub(crate) async fn shift_release(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let out = st.engine.release_shift_payment(id).await?;
    info!(session_id = %id, payment_tx = %out.payment_tx, "shifts/release");
    Ok((StatusCode::OK, Json(out)).into_response())
}

pub(crate) async fn shift_refuse(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let out = st.engine.refuse_shift(id).await?;
    info!(session_id = %id, "shifts/refuse");
    Ok((StatusCode::OK, Json(out)).into_response())
}

// ---------------------------------------------------------------------------
// /v1/intents
// ---------------------------------------------------------------------------

pub(crate) async fn intents_list(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let intents = st.engine.open_intents().await?;
    let abandoned = st.engine.abandoned_intents().await?;
    Ok((
        StatusCode::OK,
        Json(IntentsResponse {
            open: intents.len(),
            intents,
            abandoned,
        }),
    )
        .into_response())
}

pub(crate) async fn intents_reconcile(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let report = st.engine.reconcile_open_intents(chrono::Utc::now()).await?;
    info!(inspected = report.inspected, committed = report.committed, "intents/reconcile");
    Ok((StatusCode::OK, Json(report)).into_response())
}

pub(crate) async fn intent_resolve(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: ResolveBody = parse_body(&body)?;
    st.engine.resolve_abandoned_intent(id, req.note.as_deref()).await?;
    info!(intent_id = %id, "intents/resolve");
    Ok((StatusCode::OK, Json(serde_json::json!({ "intent_id": id, "status": "RESOLVED" }))).into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/stats
// ---------------------------------------------------------------------------

pub(crate) async fn stats(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let stats = st.engine.stats().await?;
    Ok((StatusCode::OK, Json(stats)).into_response())
}
