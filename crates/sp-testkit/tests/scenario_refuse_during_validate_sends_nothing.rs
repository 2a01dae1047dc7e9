//! A refusal that commits after validate has read the shift, but before its
//! intent starts, must leave the ledger untouched.

use std::sync::Arc;

use anyhow::Result;
use sp_db::{
    IntentBegin, IntentRow, IntentStatus, NewIntent, SessionRow, SessionStatus, SessionUpdate,
    SettlementStats,
};
use sp_ledger::PaperLedger;
use sp_settlement::{EngineSettings, SessionStore, SettlementEngine, ValidateRequest};
use sp_testkit::{platform_credential, MemorySessionStore, ShiftBuilder, EMPLOYER_ADDRESS};
use uuid::Uuid;

/// Refuses the session from "another request" just before each intent starts.
struct RefuseFirst {
    inner: Arc<MemorySessionStore>,
}

#[async_trait::async_trait]
impl SessionStore for RefuseFirst {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRow>> {
        self.inner.get_session(session_id).await
    }

    async fn set_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        self.inner.set_status(session_id, expected, new, update).await
    }

    async fn set_status_when_idle(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        self.inner
            .set_status_when_idle(session_id, expected, new, update)
            .await
    }

    async fn begin_intent(&self, intent: &NewIntent, expected: SessionStatus) -> Result<IntentBegin> {
        let refused = self
            .inner
            .set_status_when_idle(
                intent.session_id,
                SessionStatus::Proposed,
                SessionStatus::Refused,
                &SessionUpdate::default(),
            )
            .await?;
        assert_eq!(refused, 1);
        self.inner.begin_intent(intent, expected).await
    }

    async fn record_intent_tx(&self, intent_id: Uuid, tx_hash: &str) -> Result<u64> {
        self.inner.record_intent_tx(intent_id, tx_hash).await
    }

    async fn close_intent(&self, intent_id: Uuid, status: IntentStatus, detail: Option<&str>) -> Result<u64> {
        self.inner.close_intent(intent_id, status, detail).await
    }

    async fn resolve_intent(&self, intent_id: Uuid, note: Option<&str>) -> Result<u64> {
        self.inner.resolve_intent(intent_id, note).await
    }

    async fn open_intents(&self) -> Result<Vec<IntentRow>> {
        self.inner.open_intents().await
    }

    async fn abandoned_intents(&self) -> Result<Vec<IntentRow>> {
        self.inner.abandoned_intents().await
    }

    async fn blocking_intent_for_session(&self, session_id: Uuid) -> Result<Option<IntentRow>> {
        self.inner.blocking_intent_for_session(session_id).await
    }

    async fn stats(&self) -> Result<SettlementStats> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn refusal_between_read_and_intent_blocks_the_escrow() -> Result<()> {
    let inner = Arc::new(MemorySessionStore::new());
    let paper = Arc::new(PaperLedger::new());
    paper.fund(&platform_credential(), 1_000);
    paper.activate(EMPLOYER_ADDRESS, 50);

    let worker = "rWORKERracexxxxxxxxxxxxxxxxxxxxxx";
    paper.activate(worker, 20);
    let row = ShiftBuilder::proposed().hours(8.0).worker(worker).build();
    let id = row.session_id;
    inner.insert_session(row).await;

    let engine = SettlementEngine::new(
        Arc::new(RefuseFirst { inner: inner.clone() }),
        paper.clone(),
        platform_credential(),
        EngineSettings::default(),
    );

    let err = engine
        .validate_shift(id, &ValidateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "precondition_failed");
    assert!(err.to_string().contains("no longer proposed"));

    assert_eq!(
        inner.session(id).await.expect("session").status,
        SessionStatus::Refused
    );
    assert_eq!(paper.escrow_count(), 0);
    assert_eq!(paper.submit_count("EscrowCreate"), 0);
    assert_eq!(paper.submit_count("Payment"), 0);
    assert!(inner.intents_for(id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn refuse_is_blocked_while_validate_holds_the_intent() -> Result<()> {
    let store = Arc::new(MemorySessionStore::new());
    let row = ShiftBuilder::proposed().build();
    let id = row.session_id;
    store.insert_session(row).await;

    let intent_id = Uuid::new_v4();
    store
        .begin_intent(
            &NewIntent {
                intent_id,
                session_id: id,
                kind: sp_db::IntentKind::EscrowCreate,
                payload: serde_json::json!({}),
            },
            SessionStatus::Proposed,
        )
        .await?;

    let paper = Arc::new(PaperLedger::new());
    let engine = SettlementEngine::new(store.clone(), paper, platform_credential(), EngineSettings::default());

    let err = engine.refuse_shift(id).await.unwrap_err();
    assert_eq!(err.category(), "precondition_failed");
    assert!(err.to_string().contains("in progress"));
    assert_eq!(
        store.session(id).await.expect("session").status,
        SessionStatus::Proposed
    );

    store.close_intent(intent_id, IntentStatus::Failed, None).await?;
    engine.refuse_shift(id).await?;
    Ok(())
}
