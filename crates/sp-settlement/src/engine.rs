//! Request-scoped settlement workflows.
//!
//! Each public method is one independent workflow. Ordering within a session
//! comes from two guards:
//!
//! 1. at most one blocking intent per session, started only while the session
//!    still has the status the workflow read (checked before any ledger call);
//! 2. the guarded status update (checked when committing).
//!
//! A ledger call is only ever made while this workflow holds the session's
//! open intent. Refusal goes through the idle update, so it cannot land
//! between an intent starting and its ledger call.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sp_config::SettlementConfig;
use sp_db::{
    IntentBegin, IntentRow, IntentStatus, NewIntent, SessionRow, SessionStatus, SessionUpdate,
    SettlementStats,
};
use sp_ledger::{settlement_amount, Credential, Drops, LedgerClient, LedgerError, TES_SUCCESS};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::certificate::{CertificateFacts, CertificateMinter};
use crate::error::SettlementError;
use crate::escrow::{EscrowCoordinator, EscrowFailure};
use crate::intent::{IntentPayload, IntentToken};
use crate::status::{required_status, transition, SessionAction};
use crate::store::SessionStore;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub activation_reserve: Drops,
    pub fee_buffer: Drops,
    pub escrow_release_delay: Duration,
    pub default_hourly_rate: f64,
    pub certificate_taxon: u32,
    pub intent_stale_after: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &SettlementConfig) -> Self {
        let s = &cfg.settlement;
        Self {
            activation_reserve: Drops::from_whole_xrp(s.activation_reserve_xrp),
            fee_buffer: Drops::from_whole_xrp(s.fee_buffer_xrp),
            escrow_release_delay: Duration::seconds(s.escrow_release_delay_secs),
            default_hourly_rate: s.default_hourly_rate,
            certificate_taxon: s.certificate_taxon,
            intent_stale_after: Duration::seconds(s.intent_stale_after_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SettlementConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Requests / outcomes
// ---------------------------------------------------------------------------

/// Caller adjustments applied at validation; each falls back to the stored
/// session value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub hourly_rate: Option<f64>,
    pub start_time_utc: Option<DateTime<Utc>>,
    pub end_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub hours: f64,
    /// XRP, 6 decimals; the same drops value as the escrow.
    pub amount_total: f64,
    pub amount_total_drops: i64,
    pub escrow_tx: String,
    pub certificate_id: Option<String>,
    pub release_after_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub payment_tx: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefuseOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub end_time_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub inspected: usize,
    pub committed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub untouched: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn LedgerClient>,
    platform: Credential,
    settings: EngineSettings,
    escrow: EscrowCoordinator,
    minter: CertificateMinter,
}

impl SettlementEngine {
    /// `platform` funds escrows, signs releases and issues certificates.
    pub fn new(
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn LedgerClient>,
        platform: Credential,
        settings: EngineSettings,
    ) -> Self {
        Self {
            escrow: EscrowCoordinator::new(ledger.clone(), settings.activation_reserve, settings.fee_buffer),
            minter: CertificateMinter::new(ledger.clone(), settings.certificate_taxon),
            store,
            ledger,
            platform,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn platform_address(&self) -> &str {
        self.platform.address()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Disconnect the ledger client. Settlement calls made afterwards fail
    /// with `LedgerUnreachable`.
    pub async fn shutdown(&self) {
        self.ledger.disconnect().await;
    }

    pub async fn get_shift(&self, session_id: Uuid) -> Result<SessionRow, SettlementError> {
        self.store
            .get_session(session_id)
            .await
            .map_err(SettlementError::storage)?
            .ok_or(SettlementError::NotFound(session_id))
    }

    pub async fn open_intents(&self) -> Result<Vec<IntentRow>, SettlementError> {
        self.store.open_intents().await.map_err(SettlementError::storage)
    }

    /// Intents abandoned by reconciliation that still block their session.
    pub async fn abandoned_intents(&self) -> Result<Vec<IntentRow>, SettlementError> {
        self.store.abandoned_intents().await.map_err(SettlementError::storage)
    }

    /// Release the block an abandoned intent holds on its session. Call only
    /// after checking the platform account on the ledger: if the abandoned
    /// submission did land, settle the session by hand first.
    pub async fn resolve_abandoned_intent(&self, intent_id: Uuid, note: Option<&str>) -> Result<(), SettlementError> {
        let n = self
            .store
            .resolve_intent(intent_id, note)
            .await
            .map_err(SettlementError::storage)?;
        if n == 0 {
            return Err(SettlementError::PreconditionFailed(format!(
                "intent {intent_id} is not abandoned"
            )));
        }
        info!(intent_id = %intent_id, note = note.unwrap_or(""), "abandoned intent resolved by operator");
        Ok(())
    }

    pub async fn stats(&self) -> Result<SettlementStats, SettlementError> {
        self.store.stats().await.map_err(SettlementError::storage)
    }

    // -----------------------------------------------------------------------
    // check-out / refuse (no ledger interaction)
    // -----------------------------------------------------------------------

    /// `ongoing -> proposed`, stamping the end time (default: now).
    pub async fn check_out_shift(
        &self,
        session_id: Uuid,
        end_time_utc: Option<DateTime<Utc>>,
    ) -> Result<CheckOutOutcome, SettlementError> {
        let session = self.get_shift(session_id).await?;
        let to = transition(session.status, SessionAction::CheckOut)?;

        let end = end_time_utc.unwrap_or_else(Utc::now);
        if end < session.start_time_utc {
            return Err(SettlementError::InvalidInput("end time is before start time".to_string()));
        }

        let update = SessionUpdate {
            end_time_utc: Some(end),
            ..SessionUpdate::default()
        };
        self.guarded_set(session_id, session.status, to, &update).await?;

        info!(session_id = %session_id, "shift checked out");
        Ok(CheckOutOutcome {
            session_id,
            status: to,
            end_time_utc: end,
        })
    }

    /// `proposed -> refused`. Refused while a settlement intent blocks the shift.
    pub async fn refuse_shift(&self, session_id: Uuid) -> Result<RefuseOutcome, SettlementError> {
        let session = self.get_shift(session_id).await?;
        let to = transition(session.status, SessionAction::Refuse)?;

        let n = self
            .store
            .set_status_when_idle(session_id, session.status, to, &SessionUpdate::default())
            .await
            .map_err(SettlementError::storage)?;
        if n == 0 {
            return Err(self.blocked(session_id, session.status).await);
        }

        info!(session_id = %session_id, "shift refused");
        Ok(RefuseOutcome {
            session_id,
            status: to,
        })
    }

    // -----------------------------------------------------------------------
    // validate
    // -----------------------------------------------------------------------

    /// `proposed -> validated`: lock the shift amount in escrow for the worker
    /// and mint a certificate.
    pub async fn validate_shift(
        &self,
        session_id: Uuid,
        req: &ValidateRequest,
    ) -> Result<ValidateOutcome, SettlementError> {
        let session = self.get_shift(session_id).await?;
        let to = transition(session.status, SessionAction::Validate)?;

        let hourly_rate = req
            .hourly_rate
            .or(session.hourly_rate)
            .unwrap_or(self.settings.default_hourly_rate);
        if !(hourly_rate.is_finite() && hourly_rate > 0.0) {
            return Err(SettlementError::InvalidInput("hourly rate must be positive".to_string()));
        }

        let now = Utc::now();
        let start = req.start_time_utc.unwrap_or(session.start_time_utc);
        let end = match req.end_time_utc.or(session.end_time_utc) {
            Some(end) => end,
            None => {
                warn!(session_id = %session_id, "no end time on request or session; using now");
                now
            }
        };
        if end < start {
            return Err(SettlementError::InvalidInput("end time is before start time".to_string()));
        }

        let hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
        let amount = settlement_amount(hours, hourly_rate)?;
        if amount == Drops::ZERO {
            return Err(SettlementError::InvalidInput("shift amount rounds to zero".to_string()));
        }

        let worker_address = session
            .worker_address
            .clone()
            .ok_or_else(|| SettlementError::InvalidInput("worker has no ledger address".to_string()))?;
        if session.employer_address.is_none() {
            return Err(SettlementError::InvalidInput("employer has no ledger address".to_string()));
        }

        let release_after = now + self.settings.escrow_release_delay;
        let payload = IntentPayload::Validate {
            start_time_utc: start,
            end_time_utc: end,
            hourly_rate,
            hours,
            amount_drops: amount.get(),
            destination: worker_address.clone(),
            release_after_utc: release_after,
        };
        let token = self.open_intent(session_id, session.status, &payload).await?;

        info!(
            session_id = %session_id,
            intent_id = %token.intent_id(),
            hours,
            drops = amount.get(),
            "validating shift"
        );

        let created = match self
            .escrow
            .create(&token, &self.platform, &worker_address, amount, release_after)
            .await
        {
            Ok(c) => c,
            Err(f) => return Err(self.fail_intent(&token, f).await),
        };
        self.record_tx(&token, &created.tx_hash).await?;

        let facts = CertificateFacts {
            shift_id: session_id,
            worker_id: session.worker_id,
            employer_id: session.employer_id,
            hours,
            amount,
            job_type: session
                .analysis
                .as_ref()
                .and_then(|a| a.job_type())
                .map(str::to_string),
        };
        let certificate_id = match self.minter.mint(&token, &self.platform, &facts).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    category = e.category(),
                    error = %e,
                    "certificate mint failed; continuing without certificate"
                );
                None
            }
        };

        let update = payload.session_update(&created.tx_hash, certificate_id.clone());
        self.commit(&token, session.status, to, &update).await?;

        Ok(ValidateOutcome {
            session_id,
            status: to,
            hours,
            amount_total: amount.as_xrp(),
            amount_total_drops: amount.get(),
            escrow_tx: created.tx_hash,
            certificate_id,
            release_after_utc: release_after,
        })
    }

    // -----------------------------------------------------------------------
    // release
    // -----------------------------------------------------------------------

    /// `validated -> paid`: finish the escrow created at validation.
    pub async fn release_shift_payment(&self, session_id: Uuid) -> Result<ReleaseOutcome, SettlementError> {
        let session = self.get_shift(session_id).await?;
        let to = transition(session.status, SessionAction::Release)?;

        let escrow_tx = session
            .escrow_tx
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SettlementError::PreconditionFailed("validated shift has no escrow reference".to_string())
            })?;

        let payload = IntentPayload::Release {
            escrow_tx: escrow_tx.clone(),
        };
        let token = self.open_intent(session_id, session.status, &payload).await?;

        info!(session_id = %session_id, intent_id = %token.intent_id(), escrow_tx = %escrow_tx, "releasing shift payment");

        let payment_tx = match self.escrow.finish(&token, &self.platform, &escrow_tx).await {
            Ok(h) => h,
            Err(f) => return Err(self.fail_intent(&token, f).await),
        };
        self.record_tx(&token, &payment_tx).await?;

        let update = payload.session_update(&payment_tx, None);
        self.commit(&token, session.status, to, &update).await?;

        Ok(ReleaseOutcome {
            session_id,
            status: to,
            payment_tx,
        })
    }

    // -----------------------------------------------------------------------
    // reconcile
    // -----------------------------------------------------------------------

    /// Resolve open intents left behind by crashes or unconfirmed submissions.
    pub async fn reconcile_open_intents(&self, now: DateTime<Utc>) -> Result<ReconcileReport, SettlementError> {
        let intents = self.open_intents().await?;
        let mut report = ReconcileReport::default();

        for intent in intents {
            report.inspected += 1;

            let payload: IntentPayload = match serde_json::from_value(intent.payload.clone()) {
                Ok(p) => p,
                Err(e) => {
                    error!(intent_id = %intent.intent_id, error = %e, "intent payload unreadable; leaving open");
                    report.untouched += 1;
                    continue;
                }
            };

            match (intent.status, intent.tx_hash.as_deref()) {
                (IntentStatus::Submitted, Some(hash)) => {
                    match self.reconcile_submitted(&intent, &payload, hash).await? {
                        IntentStatus::Committed => report.committed += 1,
                        IntentStatus::Failed => report.failed += 1,
                        _ => report.untouched += 1,
                    }
                }
                (IntentStatus::Pending, _) if now - intent.created_at_utc > self.settings.intent_stale_after => {
                    self.close(
                        intent.intent_id,
                        IntentStatus::Abandoned,
                        Some("no transaction recorded before stale deadline"),
                    )
                    .await?;
                    error!(
                        session_id = %intent.session_id,
                        intent_id = %intent.intent_id,
                        kind = intent.kind.as_str(),
                        "pending intent abandoned; shift stays blocked until the platform account is checked and the intent resolved"
                    );
                    report.abandoned += 1;
                }
                _ => report.untouched += 1,
            }
        }

        info!(
            inspected = report.inspected,
            committed = report.committed,
            failed = report.failed,
            abandoned = report.abandoned,
            untouched = report.untouched,
            "intent reconciliation finished"
        );
        Ok(report)
    }

    /// Returns the status the intent was closed with, or `Submitted` if it was
    /// left open.
    async fn reconcile_submitted(
        &self,
        intent: &IntentRow,
        payload: &IntentPayload,
        hash: &str,
    ) -> Result<IntentStatus, SettlementError> {
        let tx = match self.ledger.lookup_transaction(hash).await {
            Ok(tx) => tx,
            Err(LedgerError::TransactionNotFound(_)) => {
                warn!(intent_id = %intent.intent_id, tx_hash = hash, "submitted tx not yet on ledger");
                return Ok(IntentStatus::Submitted);
            }
            Err(e) => {
                warn!(intent_id = %intent.intent_id, tx_hash = hash, error = %e, "lookup failed; will retry");
                return Ok(IntentStatus::Submitted);
            }
        };
        if !tx.validated {
            return Ok(IntentStatus::Submitted);
        }

        let code = tx.result_code.unwrap_or_default();
        let expected = payload.ledger_tx_type();
        if tx.transaction_type != expected {
            // An activation payment whose confirmation was lost: the settlement
            // leg itself was never sent.
            let detail = format!(
                "{} {hash} settled with {code}; {expected} was never submitted",
                tx.transaction_type
            );
            self.close(intent.intent_id, IntentStatus::Failed, Some(detail.as_str())).await?;
            warn!(session_id = %intent.session_id, intent_id = %intent.intent_id, tx_hash = hash, "{detail}");
            return Ok(IntentStatus::Failed);
        }
        if code != TES_SUCCESS {
            self.close(intent.intent_id, IntentStatus::Failed, Some(code.as_str())).await?;
            info!(intent_id = %intent.intent_id, tx_hash = hash, code = %code, "intent failed on ledger");
            return Ok(IntentStatus::Failed);
        }

        let action = match payload {
            IntentPayload::Validate { .. } => SessionAction::Validate,
            IntentPayload::Release { .. } => SessionAction::Release,
        };
        let from = required_status(action);
        let to = transition(from, action)?;

        let n = self
            .store
            .set_status(intent.session_id, from, to, &payload.session_update(hash, None))
            .await
            .map_err(SettlementError::storage)?;

        let already = if n == 0 {
            let current = self.get_shift(intent.session_id).await?;
            let recorded = match payload {
                IntentPayload::Validate { .. } => current.escrow_tx.as_deref(),
                IntentPayload::Release { .. } => current.payment_tx.as_deref(),
            };
            current.status == to && recorded == Some(hash)
        } else {
            false
        };

        if n == 1 || already {
            self.close(intent.intent_id, IntentStatus::Committed, None).await?;
            info!(session_id = %intent.session_id, intent_id = %intent.intent_id, tx_hash = hash, "intent committed by reconciliation");
            Ok(IntentStatus::Committed)
        } else {
            let detail = format!("ledger tx {hash} succeeded but session is no longer {from}");
            self.close(intent.intent_id, IntentStatus::Failed, Some(detail.as_str())).await?;
            error!(session_id = %intent.session_id, intent_id = %intent.intent_id, tx_hash = hash, "{detail}");
            Ok(IntentStatus::Failed)
        }
    }

    // -----------------------------------------------------------------------
    // internals
    // -----------------------------------------------------------------------

    /// Start an intent, provided the session is still `from`.
    async fn open_intent(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        payload: &IntentPayload,
    ) -> Result<IntentToken, SettlementError> {
        let intent_id = Uuid::new_v4();
        let body = serde_json::to_value(payload)
            .map_err(|e| SettlementError::Storage(format!("intent payload encode failed: {e}")))?;
        let begun = self
            .store
            .begin_intent(
                &NewIntent {
                    intent_id,
                    session_id,
                    kind: payload.kind(),
                    payload: body,
                },
                from,
            )
            .await
            .map_err(SettlementError::storage)?;

        match begun {
            IntentBegin::Started => Ok(IntentToken::from_persisted_intent(intent_id, session_id)),
            IntentBegin::StatusMoved(None) => Err(SettlementError::NotFound(session_id)),
            IntentBegin::StatusMoved(Some(_)) | IntentBegin::Blocked => Err(self.blocked(session_id, from).await),
        }
    }

    /// Explain why a guarded write on an idle session did not apply.
    async fn blocked(&self, session_id: Uuid, from: SessionStatus) -> SettlementError {
        match self.store.blocking_intent_for_session(session_id).await {
            Ok(Some(intent)) if intent.status == IntentStatus::Abandoned => {
                SettlementError::PreconditionFailed(format!(
                    "intent {} was abandoned with its ledger outcome unknown; resolve it before settling this shift",
                    intent.intent_id
                ))
            }
            Ok(Some(_)) => SettlementError::PreconditionFailed(
                "another settlement operation is in progress for this shift".to_string(),
            ),
            Ok(None) => SettlementError::PreconditionFailed(format!("shift is no longer {from}")),
            Err(e) => SettlementError::storage(e),
        }
    }

    async fn record_tx(&self, token: &IntentToken, tx_hash: &str) -> Result<(), SettlementError> {
        if let Err(e) = self.store.record_intent_tx(token.intent_id(), tx_hash).await {
            error!(
                session_id = %token.session_id(),
                intent_id = %token.intent_id(),
                tx_hash,
                error = %e,
                "ledger accepted tx but intent could not be updated"
            );
            return Err(SettlementError::storage(e));
        }
        Ok(())
    }

    /// Close the intent after a failed ledger step and return the caller error.
    async fn fail_intent(&self, token: &IntentToken, failure: EscrowFailure) -> SettlementError {
        match failure {
            EscrowFailure::Definitive(e) => {
                let detail = e.to_string();
                if let Err(se) = self
                    .store
                    .close_intent(token.intent_id(), IntentStatus::Failed, Some(detail.as_str()))
                    .await
                {
                    error!(intent_id = %token.intent_id(), error = %se, "could not close failed intent");
                }
                warn!(
                    session_id = %token.session_id(),
                    category = e.category(),
                    error = %e,
                    "settlement step failed"
                );
                e
            }
            EscrowFailure::InDoubt { tx_hash, error: e } => {
                if let Some(hash) = tx_hash.as_deref() {
                    if let Err(se) = self.store.record_intent_tx(token.intent_id(), hash).await {
                        error!(intent_id = %token.intent_id(), error = %se, "could not record in-doubt tx");
                    }
                }
                error!(
                    session_id = %token.session_id(),
                    intent_id = %token.intent_id(),
                    tx_hash = tx_hash.as_deref().unwrap_or("-"),
                    "ledger outcome unknown; intent left open for reconciliation"
                );
                e
            }
        }
    }

    /// Guarded status update, then close the intent as COMMITTED.
    async fn commit(
        &self,
        token: &IntentToken,
        from: SessionStatus,
        to: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<(), SettlementError> {
        let n = self
            .store
            .set_status(token.session_id(), from, to, update)
            .await
            .map_err(SettlementError::storage)?;
        if n == 0 {
            error!(
                session_id = %token.session_id(),
                intent_id = %token.intent_id(),
                "ledger step succeeded but session is no longer {from}; intent left open"
            );
            return Err(SettlementError::PreconditionFailed(format!("shift is no longer {from}")));
        }

        if let Err(e) = self
            .store
            .close_intent(token.intent_id(), IntentStatus::Committed, None)
            .await
        {
            // The session already reflects the ledger; reconciliation closes this.
            error!(intent_id = %token.intent_id(), error = %e, "could not close committed intent");
        }
        info!(session_id = %token.session_id(), status = %to, "session status committed");
        Ok(())
    }

    async fn guarded_set(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<(), SettlementError> {
        let n = self
            .store
            .set_status(session_id, from, to, update)
            .await
            .map_err(SettlementError::storage)?;
        if n == 0 {
            return Err(SettlementError::PreconditionFailed(format!("shift is no longer {from}")));
        }
        Ok(())
    }

    async fn close(&self, intent_id: Uuid, status: IntentStatus, detail: Option<&str>) -> Result<(), SettlementError> {
        self.store
            .close_intent(intent_id, status, detail)
            .await
            .map_err(SettlementError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_follow_config_defaults() {
        let s = EngineSettings::default();
        assert_eq!(s.activation_reserve, Drops::from_whole_xrp(10));
        assert_eq!(s.fee_buffer, Drops::from_whole_xrp(5));
        assert_eq!(s.escrow_release_delay, Duration::days(7));
        assert_eq!(s.default_hourly_rate, 15.0);
        assert_eq!(s.intent_stale_after, Duration::minutes(15));
    }

    #[test]
    fn reconcile_report_serializes_counts() {
        let r = ReconcileReport {
            inspected: 3,
            committed: 1,
            failed: 1,
            abandoned: 1,
            untouched: 0,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["committed"], 1);
        assert_eq!(v["untouched"], 0);
    }
}
