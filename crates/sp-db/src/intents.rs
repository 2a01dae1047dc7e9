//! Settlement intents: a row written before every ledger submission.
//!
//! Lifecycle:
//! ```text
//! PENDING --record_tx--> SUBMITTED --close--> COMMITTED | FAILED
//!    \--close--> FAILED | ABANDONED --resolve--> RESOLVED
//! ```
//! The partial unique index `uq_intent_open_per_session` admits at most one
//! PENDING/SUBMITTED/ABANDONED row per session. An abandoned intent may have
//! reached the ledger, so the session stays blocked until an operator resolves it.
//!
//! Starting an intent and moving a session without one both lock the
//! `work_sessions` row first, so the two never interleave.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{is_unique_constraint_violation, update_session_status, SessionStatus, SessionUpdate};

const BLOCKING_STATUSES: &str = "('PENDING', 'SUBMITTED', 'ABANDONED')";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    EscrowCreate,
    EscrowFinish,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::EscrowCreate => "escrow_create",
            IntentKind::EscrowFinish => "escrow_finish",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "escrow_create" => Ok(IntentKind::EscrowCreate),
            "escrow_finish" => Ok(IntentKind::EscrowFinish),
            other => Err(anyhow!("invalid intent kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Pending,
    Submitted,
    Committed,
    Failed,
    Abandoned,
    Resolved,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Submitted => "SUBMITTED",
            IntentStatus::Committed => "COMMITTED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Abandoned => "ABANDONED",
            IntentStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(IntentStatus::Pending),
            "SUBMITTED" => Ok(IntentStatus::Submitted),
            "COMMITTED" => Ok(IntentStatus::Committed),
            "FAILED" => Ok(IntentStatus::Failed),
            "ABANDONED" => Ok(IntentStatus::Abandoned),
            "RESOLVED" => Ok(IntentStatus::Resolved),
            other => Err(anyhow!("invalid intent status: {}", other)),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, IntentStatus::Pending | IntentStatus::Submitted)
    }

    /// Open, or abandoned and not yet resolved.
    pub fn blocks_session(&self) -> bool {
        self.is_open() || *self == IntentStatus::Abandoned
    }
}

/// Outcome of [`intent_begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentBegin {
    Started,
    /// The session already has a blocking intent.
    Blocked,
    /// The session is not in the expected status; `None` if it does not exist.
    StatusMoved(Option<SessionStatus>),
}

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub intent_id: Uuid,
    pub session_id: Uuid,
    pub kind: IntentKind,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRow {
    pub intent_id: Uuid,
    pub session_id: Uuid,
    pub kind: IntentKind,
    pub status: IntentStatus,
    pub payload: Value,
    pub tx_hash: Option<String>,
    pub detail: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

fn intent_from_row(row: &sqlx::postgres::PgRow) -> Result<IntentRow> {
    Ok(IntentRow {
        intent_id: row.try_get("intent_id")?,
        session_id: row.try_get("session_id")?,
        kind: IntentKind::parse(&row.try_get::<String, _>("kind")?)?,
        status: IntentStatus::parse(&row.try_get::<String, _>("status")?)?,
        payload: row.try_get("payload")?,
        tx_hash: row.try_get("tx_hash")?,
        detail: row.try_get("detail")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

/// Insert a PENDING intent while the session is still `expected`.
///
/// The session row is locked for the duration, so a concurrent
/// [`set_session_status_when_idle`] either sees this intent or runs first
/// and leaves us with [`IntentBegin::StatusMoved`].
pub async fn intent_begin(
    pool: &PgPool,
    intent: &NewIntent,
    expected: SessionStatus,
) -> Result<IntentBegin> {
    let mut tx = pool.begin().await.context("intent_begin: begin failed")?;

    let current: Option<String> =
        sqlx::query_scalar("select status from work_sessions where session_id = $1 for update")
            .bind(intent.session_id)
            .fetch_optional(&mut *tx)
            .await
            .context("intent_begin: lock session failed")?;
    let current = current.as_deref().map(SessionStatus::parse).transpose()?;
    if current != Some(expected) {
        tx.rollback().await.context("intent_begin: rollback failed")?;
        return Ok(IntentBegin::StatusMoved(current));
    }

    let res = sqlx::query(
        r#"
        insert into settlement_intents (intent_id, session_id, kind, status, payload)
        values ($1, $2, $3, 'PENDING', $4)
        "#,
    )
    .bind(intent.intent_id)
    .bind(intent.session_id)
    .bind(intent.kind.as_str())
    .bind(&intent.payload)
    .execute(&mut *tx)
    .await;

    match res {
        Ok(_) => {
            tx.commit().await.context("intent_begin: commit failed")?;
            Ok(IntentBegin::Started)
        }
        // The failed insert aborted the transaction; dropping it rolls back.
        Err(e) if is_unique_constraint_violation(&e, "uq_intent_open_per_session") => {
            Ok(IntentBegin::Blocked)
        }
        Err(e) => Err(anyhow::Error::new(e).context("intent_begin failed")),
    }
}

/// Guarded status update that only applies while the session has no blocking
/// intent. Returns rows affected (0 if the status moved or an intent blocks).
pub async fn set_session_status_when_idle(
    pool: &PgPool,
    session_id: Uuid,
    expected: SessionStatus,
    new: SessionStatus,
    update: &SessionUpdate,
) -> Result<u64> {
    let mut tx = pool
        .begin()
        .await
        .context("set_session_status_when_idle: begin failed")?;

    sqlx::query("select 1 from work_sessions where session_id = $1 for update")
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .context("set_session_status_when_idle: lock session failed")?;

    let blocked: bool = sqlx::query_scalar(&format!(
        "select exists (select 1 from settlement_intents where session_id = $1 and status in {})",
        BLOCKING_STATUSES
    ))
    .bind(session_id)
    .fetch_one(&mut *tx)
    .await
    .context("set_session_status_when_idle: intent check failed")?;
    if blocked {
        tx.rollback()
            .await
            .context("set_session_status_when_idle: rollback failed")?;
        return Ok(0);
    }

    let n = update_session_status(&mut *tx, session_id, expected, new, update).await?;
    tx.commit()
        .await
        .context("set_session_status_when_idle: commit failed")?;
    Ok(n)
}

/// PENDING -> SUBMITTED with the ledger transaction hash.
pub async fn intent_record_tx(pool: &PgPool, intent_id: Uuid, tx_hash: &str) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update settlement_intents
        set status = 'SUBMITTED',
            tx_hash = $2,
            updated_at_utc = now()
        where intent_id = $1
          and status = 'PENDING'
        "#,
    )
    .bind(intent_id)
    .bind(tx_hash)
    .execute(pool)
    .await
    .context("intent_record_tx failed")?;
    Ok(res.rows_affected())
}

/// Open intent -> FAILED | COMMITTED | ABANDONED. Closing an already-closed
/// intent is a no-op returning 0.
pub async fn intent_close(
    pool: &PgPool,
    intent_id: Uuid,
    status: IntentStatus,
    detail: Option<&str>,
) -> Result<u64> {
    if !matches!(
        status,
        IntentStatus::Committed | IntentStatus::Failed | IntentStatus::Abandoned
    ) {
        return Err(anyhow!("intent_close: cannot close to {}", status.as_str()));
    }
    let res = sqlx::query(
        r#"
        update settlement_intents
        set status = $2,
            detail = coalesce($3, detail),
            updated_at_utc = now()
        where intent_id = $1
          and status in ('PENDING', 'SUBMITTED')
        "#,
    )
    .bind(intent_id)
    .bind(status.as_str())
    .bind(detail)
    .execute(pool)
    .await
    .context("intent_close failed")?;
    Ok(res.rows_affected())
}

/// All open intents, oldest first.
pub async fn intents_list_open(pool: &PgPool) -> Result<Vec<IntentRow>> {
    let rows = sqlx::query(
        r#"
        select intent_id, session_id, kind, status, payload, tx_hash, detail,
               created_at_utc, updated_at_utc
        from settlement_intents
        where status in ('PENDING', 'SUBMITTED')
        order by created_at_utc asc, intent_id asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("intents_list_open failed")?;

    rows.iter().map(intent_from_row).collect()
}

/// Abandoned intents awaiting an operator, oldest first.
pub async fn intents_list_abandoned(pool: &PgPool) -> Result<Vec<IntentRow>> {
    let rows = sqlx::query(
        r#"
        select intent_id, session_id, kind, status, payload, tx_hash, detail,
               created_at_utc, updated_at_utc
        from settlement_intents
        where status = 'ABANDONED'
        order by created_at_utc asc, intent_id asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("intents_list_abandoned failed")?;

    rows.iter().map(intent_from_row).collect()
}

/// The intent currently blocking the session, if any.
pub async fn intent_blocking_for_session(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<IntentRow>> {
    let row = sqlx::query(&format!(
        r#"
        select intent_id, session_id, kind, status, payload, tx_hash, detail,
               created_at_utc, updated_at_utc
        from settlement_intents
        where session_id = $1
          and status in {}
        "#,
        BLOCKING_STATUSES
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .context("intent_blocking_for_session failed")?;

    row.as_ref().map(intent_from_row).transpose()
}

/// ABANDONED -> RESOLVED once an operator has checked the ledger by hand.
pub async fn intent_resolve(pool: &PgPool, intent_id: Uuid, note: Option<&str>) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update settlement_intents
        set status = 'RESOLVED',
            detail = coalesce($2, detail),
            updated_at_utc = now()
        where intent_id = $1
          and status = 'ABANDONED'
        "#,
    )
    .bind(intent_id)
    .bind(note)
    .execute(pool)
    .await
    .context("intent_resolve failed")?;
    Ok(res.rows_affected())
}
