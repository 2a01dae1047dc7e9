use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use sp_db::{
    IntentBegin, IntentRow, IntentStatus, NewIntent, SessionRow, SessionStatus, SessionUpdate,
    SettlementStats,
};
use sp_settlement::SessionStore;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<Uuid, SessionRow>,
    intents: Vec<IntentRow>,
}

impl Inner {
    fn blocking_intent(&self, session_id: Uuid) -> Option<&IntentRow> {
        self.intents
            .iter()
            .find(|i| i.session_id == session_id && i.status.blocks_session())
    }
}

/// In-memory [`SessionStore`]. Every mutating call runs under one lock, which
/// stands in for the row lock and transaction of the SQL store.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
    fail_record_tx: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_session(&self, row: SessionRow) {
        self.inner.lock().await.sessions.insert(row.session_id, row);
    }

    pub async fn session(&self, session_id: Uuid) -> Option<SessionRow> {
        self.inner.lock().await.sessions.get(&session_id).cloned()
    }

    /// All intents ever opened for `session_id`, in creation order.
    pub async fn intents_for(&self, session_id: Uuid) -> Vec<IntentRow> {
        self.inner
            .lock()
            .await
            .intents
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Intents whose status matches, oldest first.
    async fn intents_where(&self, pred: impl Fn(IntentStatus) -> bool) -> Vec<IntentRow> {
        let inner = self.inner.lock().await;
        let mut out: Vec<IntentRow> = inner.intents.iter().filter(|i| pred(i.status)).cloned().collect();
        out.sort_by(|a, b| {
            a.created_at_utc
                .cmp(&b.created_at_utc)
                .then(a.intent_id.cmp(&b.intent_id))
        });
        out
    }

    /// The next `record_intent_tx` returns a storage error without writing.
    pub fn fail_next_record_tx(&self) {
        self.fail_record_tx.store(true, Ordering::SeqCst);
    }

    /// Move an intent's creation time into the past.
    pub async fn backdate_intent(&self, intent_id: Uuid, by: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.intents.iter_mut().find(|i| i.intent_id == intent_id) {
            Some(i) => {
                i.created_at_utc = i.created_at_utc - by;
                true
            }
            None => false,
        }
    }
}

fn apply(row: &mut SessionRow, new: SessionStatus, u: &SessionUpdate) {
    row.status = new;
    if let Some(v) = u.start_time_utc {
        row.start_time_utc = v;
    }
    if u.end_time_utc.is_some() {
        row.end_time_utc = u.end_time_utc;
    }
    if u.hourly_rate.is_some() {
        row.hourly_rate = u.hourly_rate;
    }
    if u.hours.is_some() {
        row.hours = u.hours;
    }
    if u.amount_total_drops.is_some() {
        row.amount_total_drops = u.amount_total_drops;
    }
    if u.escrow_tx.is_some() {
        row.escrow_tx = u.escrow_tx.clone();
    }
    if u.nft_id.is_some() {
        row.nft_id = u.nft_id.clone();
    }
    if u.payment_tx.is_some() {
        row.payment_tx = u.payment_tx.clone();
    }
    row.updated_at_utc = Utc::now();
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRow>> {
        Ok(self.session(session_id).await)
    }

    async fn set_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&session_id) {
            Some(row) if row.status == expected => {
                apply(row, new, update);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_status_when_idle(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        update: &SessionUpdate,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        if inner.blocking_intent(session_id).is_some() {
            return Ok(0);
        }
        match inner.sessions.get_mut(&session_id) {
            Some(row) if row.status == expected => {
                apply(row, new, update);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn begin_intent(&self, intent: &NewIntent, expected: SessionStatus) -> Result<IntentBegin> {
        let mut inner = self.inner.lock().await;
        let current = inner.sessions.get(&intent.session_id).map(|s| s.status);
        if current != Some(expected) {
            return Ok(IntentBegin::StatusMoved(current));
        }
        if inner.blocking_intent(intent.session_id).is_some() {
            return Ok(IntentBegin::Blocked);
        }
        let now = Utc::now();
        inner.intents.push(IntentRow {
            intent_id: intent.intent_id,
            session_id: intent.session_id,
            kind: intent.kind,
            status: IntentStatus::Pending,
            payload: intent.payload.clone(),
            tx_hash: None,
            detail: None,
            created_at_utc: now,
            updated_at_utc: now,
        });
        Ok(IntentBegin::Started)
    }

    async fn record_intent_tx(&self, intent_id: Uuid, tx_hash: &str) -> Result<u64> {
        if self.fail_record_tx.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("record_intent_tx: connection reset"));
        }
        let mut inner = self.inner.lock().await;
        match inner
            .intents
            .iter_mut()
            .find(|i| i.intent_id == intent_id && i.status == IntentStatus::Pending)
        {
            Some(i) => {
                i.status = IntentStatus::Submitted;
                i.tx_hash = Some(tx_hash.to_string());
                i.updated_at_utc = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn close_intent(&self, intent_id: Uuid, status: IntentStatus, detail: Option<&str>) -> Result<u64> {
        if !matches!(
            status,
            IntentStatus::Committed | IntentStatus::Failed | IntentStatus::Abandoned
        ) {
            return Err(anyhow!("close_intent: cannot close to {}", status.as_str()));
        }
        let mut inner = self.inner.lock().await;
        match inner
            .intents
            .iter_mut()
            .find(|i| i.intent_id == intent_id && i.status.is_open())
        {
            Some(i) => {
                i.status = status;
                if let Some(d) = detail {
                    i.detail = Some(d.to_string());
                }
                i.updated_at_utc = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn resolve_intent(&self, intent_id: Uuid, note: Option<&str>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        match inner
            .intents
            .iter_mut()
            .find(|i| i.intent_id == intent_id && i.status == IntentStatus::Abandoned)
        {
            Some(i) => {
                i.status = IntentStatus::Resolved;
                if let Some(n) = note {
                    i.detail = Some(n.to_string());
                }
                i.updated_at_utc = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn open_intents(&self) -> Result<Vec<IntentRow>> {
        Ok(self.intents_where(|s| s.is_open()).await)
    }

    async fn abandoned_intents(&self) -> Result<Vec<IntentRow>> {
        Ok(self.intents_where(|s| s == IntentStatus::Abandoned).await)
    }

    async fn blocking_intent_for_session(&self, session_id: Uuid) -> Result<Option<IntentRow>> {
        Ok(self.inner.lock().await.blocking_intent(session_id).cloned())
    }

    async fn stats(&self) -> Result<SettlementStats> {
        let inner = self.inner.lock().await;
        let mut stats = SettlementStats::default();
        for s in inner.sessions.values() {
            *stats.by_status.entry(s.status.as_str().to_string()).or_insert(0) += 1;
            match s.status {
                SessionStatus::Validated => {
                    stats.total_hours += s.hours.unwrap_or(0.0);
                    stats.escrowed_drops += s.amount_total_drops.unwrap_or(0);
                }
                SessionStatus::Paid => {
                    stats.total_hours += s.hours.unwrap_or(0.0);
                    stats.paid_drops += s.amount_total_drops.unwrap_or(0);
                }
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShiftBuilder;
    use sp_db::IntentKind;

    fn new_intent(session_id: Uuid) -> NewIntent {
        NewIntent {
            intent_id: Uuid::new_v4(),
            session_id,
            kind: IntentKind::EscrowCreate,
            payload: serde_json::json!({}),
        }
    }

    async fn store_with_proposed() -> (MemorySessionStore, Uuid) {
        let store = MemorySessionStore::new();
        let row = ShiftBuilder::proposed().build();
        let sid = row.session_id;
        store.insert_session(row).await;
        (store, sid)
    }

    #[tokio::test]
    async fn second_open_intent_is_refused_until_first_closes() {
        let (store, sid) = store_with_proposed().await;
        let first = new_intent(sid);
        let p = SessionStatus::Proposed;
        assert_eq!(store.begin_intent(&first, p).await.unwrap(), IntentBegin::Started);
        assert_eq!(store.begin_intent(&new_intent(sid), p).await.unwrap(), IntentBegin::Blocked);

        store
            .close_intent(first.intent_id, IntentStatus::Failed, Some("x"))
            .await
            .unwrap();
        assert_eq!(store.begin_intent(&new_intent(sid), p).await.unwrap(), IntentBegin::Started);
    }

    #[tokio::test]
    async fn begin_checks_session_status_under_the_lock() {
        let (store, sid) = store_with_proposed().await;
        assert_eq!(
            store.begin_intent(&new_intent(sid), SessionStatus::Validated).await.unwrap(),
            IntentBegin::StatusMoved(Some(SessionStatus::Proposed))
        );
        assert_eq!(
            store
                .begin_intent(&new_intent(Uuid::new_v4()), SessionStatus::Proposed)
                .await
                .unwrap(),
            IntentBegin::StatusMoved(None)
        );
    }

    async fn refuse(store: &MemorySessionStore, sid: Uuid) -> u64 {
        store
            .set_status_when_idle(
                sid,
                SessionStatus::Proposed,
                SessionStatus::Refused,
                &SessionUpdate::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn abandoned_intent_blocks_idle_update_until_resolved() {
        let (store, sid) = store_with_proposed().await;
        let first = new_intent(sid);
        store.begin_intent(&first, SessionStatus::Proposed).await.unwrap();
        store
            .close_intent(first.intent_id, IntentStatus::Abandoned, None)
            .await
            .unwrap();

        assert_eq!(refuse(&store, sid).await, 0);
        assert_eq!(store.abandoned_intents().await.unwrap().len(), 1);

        assert_eq!(store.resolve_intent(first.intent_id, Some("checked")).await.unwrap(), 1);
        assert_eq!(store.resolve_intent(first.intent_id, None).await.unwrap(), 0);
        assert!(store.blocking_intent_for_session(sid).await.unwrap().is_none());
        assert_eq!(refuse(&store, sid).await, 1);
    }

    #[tokio::test]
    async fn close_rejects_non_closing_status() {
        let store = MemorySessionStore::new();
        assert!(store
            .close_intent(Uuid::new_v4(), IntentStatus::Submitted, None)
            .await
            .is_err());
        assert!(store
            .close_intent(Uuid::new_v4(), IntentStatus::Resolved, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn record_tx_fault_fires_once() {
        let (store, sid) = store_with_proposed().await;
        let first = new_intent(sid);
        store.begin_intent(&first, SessionStatus::Proposed).await.unwrap();
        store.fail_next_record_tx();
        assert!(store.record_intent_tx(first.intent_id, "H").await.is_err());
        assert_eq!(store.record_intent_tx(first.intent_id, "H").await.unwrap(), 1);
    }
}
