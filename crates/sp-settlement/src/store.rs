//! Persistence seam for the engine.
//!
//! Every method that changes a session or intent is atomic. Implementations
//! must not read-then-write outside a lock: `begin_intent` and
//! `set_status_when_idle` serialize on the session.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use sp_db::{
    IntentBegin, IntentRow, IntentStatus, NewIntent, SessionRow, SessionStatus, SessionUpdate,
    SettlementStats,
};

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRow>>;

    /// Guarded status update; returns rows affected (0 when the current
    /// status is not `expected`).
    async fn set_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64>;

    /// [`set_status`](Self::set_status) that also returns 0 while the session
    /// has a blocking intent.
    async fn set_status_when_idle(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64>;

    /// Insert a PENDING intent, provided the session is still `expected` and
    /// has no blocking intent.
    async fn begin_intent(&self, intent: &NewIntent, expected: SessionStatus) -> Result<IntentBegin>;

    /// PENDING -> SUBMITTED; returns rows affected.
    async fn record_intent_tx(&self, intent_id: Uuid, tx_hash: &str) -> Result<u64>;

    /// Open -> terminal; returns rows affected.
    async fn close_intent(&self, intent_id: Uuid, status: IntentStatus, detail: Option<&str>) -> Result<u64>;

    /// ABANDONED -> RESOLVED; returns rows affected.
    async fn resolve_intent(&self, intent_id: Uuid, note: Option<&str>) -> Result<u64>;

    async fn open_intents(&self) -> Result<Vec<IntentRow>>;

    async fn abandoned_intents(&self) -> Result<Vec<IntentRow>>;

    async fn blocking_intent_for_session(&self, session_id: Uuid) -> Result<Option<IntentRow>>;

    async fn stats(&self) -> Result<SettlementStats>;
}

/// [`SessionStore`] over the Postgres schema in `sp-db`.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRow>> {
        sp_db::fetch_session(&self.pool, session_id).await
    }

    async fn set_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        sp_db::set_session_status(&self.pool, session_id, expected, new, update).await
    }

    async fn set_status_when_idle(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        sp_db::set_session_status_when_idle(&self.pool, session_id, expected, new, update).await
    }

    async fn begin_intent(&self, intent: &NewIntent, expected: SessionStatus) -> Result<IntentBegin> {
        sp_db::intent_begin(&self.pool, intent, expected).await
    }

    async fn record_intent_tx(&self, intent_id: Uuid, tx_hash: &str) -> Result<u64> {
        sp_db::intent_record_tx(&self.pool, intent_id, tx_hash).await
    }

    async fn close_intent(&self, intent_id: Uuid, status: IntentStatus, detail: Option<&str>) -> Result<u64> {
        sp_db::intent_close(&self.pool, intent_id, status, detail).await
    }

    async fn resolve_intent(&self, intent_id: Uuid, note: Option<&str>) -> Result<u64> {
        sp_db::intent_resolve(&self.pool, intent_id, note).await
    }

    async fn open_intents(&self) -> Result<Vec<IntentRow>> {
        sp_db::intents_list_open(&self.pool).await
    }

    async fn abandoned_intents(&self) -> Result<Vec<IntentRow>> {
        sp_db::intents_list_abandoned(&self.pool).await
    }

    async fn blocking_intent_for_session(&self, session_id: Uuid) -> Result<Option<IntentRow>> {
        sp_db::intent_blocking_for_session(&self.pool, session_id).await
    }

    async fn stats(&self) -> Result<SettlementStats> {
        sp_db::settlement_stats(&self.pool).await
    }
}
