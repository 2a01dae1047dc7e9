use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

mod intents;

pub use intents::{
    intent_begin, intent_blocking_for_session, intent_close, intent_record_tx, intent_resolve,
    intents_list_abandoned, intents_list_open, set_session_status_when_idle, IntentBegin,
    IntentKind, IntentRow, IntentStatus, NewIntent,
};

pub const ENV_DB_URL: &str = "SP_DATABASE_URL";

/// Connect to Postgres using SP_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='work_sessions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_sessions_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_sessions_table: bool,
}

/// Detect a Postgres unique constraint violation by constraint/index name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ongoing,
    Proposed,
    Validated,
    Paid,
    Refused,
    Disputed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Ongoing,
        SessionStatus::Proposed,
        SessionStatus::Validated,
        SessionStatus::Paid,
        SessionStatus::Refused,
        SessionStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Proposed => "proposed",
            SessionStatus::Validated => "validated",
            SessionStatus::Paid => "paid",
            SessionStatus::Refused => "refused",
            SessionStatus::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ongoing" => Ok(SessionStatus::Ongoing),
            "proposed" => Ok(SessionStatus::Proposed),
            "validated" => Ok(SessionStatus::Validated),
            "paid" => Ok(SessionStatus::Paid),
            "refused" => Ok(SessionStatus::Refused),
            "disputed" => Ok(SessionStatus::Disputed),
            other => Err(anyhow!("invalid session status: {}", other)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: Uuid,
    pub display_name: String,
    /// worker | employer
    pub role: String,
    pub xrpl_address: Option<String>,
}

pub async fn insert_user(pool: &PgPool, u: &NewUser) -> Result<()> {
    sqlx::query(
        r#"
        insert into users (user_id, display_name, role, xrpl_address)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(u.user_id)
    .bind(&u.display_name)
    .bind(&u.role)
    .bind(&u.xrpl_address)
    .execute(pool)
    .await
    .context("insert_user failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Work sessions
// ---------------------------------------------------------------------------

/// Analysis blob attached to a session by the transcript-analysis step.
///
/// The engine never branches on `body`; only [`ShiftAnnotation::job_type`] is
/// read, for certificate metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftAnnotation {
    pub version: i32,
    pub body: Value,
}

impl ShiftAnnotation {
    pub fn job_type(&self) -> Option<&str> {
        self.body
            .get("job_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: Uuid,
    pub worker_id: Uuid,
    pub employer_id: Uuid,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub hourly_rate: Option<f64>,
    pub status: SessionStatus,
    pub analysis: Option<ShiftAnnotation>,
}

pub async fn insert_session(pool: &PgPool, s: &NewSession) -> Result<()> {
    sqlx::query(
        r#"
        insert into work_sessions (
          session_id, worker_id, employer_id, start_time_utc, end_time_utc,
          hourly_rate, status, analysis_version, analysis_json
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9
        )
        "#,
    )
    .bind(s.session_id)
    .bind(s.worker_id)
    .bind(s.employer_id)
    .bind(s.start_time_utc)
    .bind(s.end_time_utc)
    .bind(s.hourly_rate)
    .bind(s.status.as_str())
    .bind(s.analysis.as_ref().map(|a| a.version))
    .bind(s.analysis.as_ref().map(|a| a.body.clone()))
    .execute(pool)
    .await
    .context("insert_session failed")?;
    Ok(())
}

/// A work session joined with both parties' ledger addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub worker_id: Uuid,
    pub employer_id: Uuid,
    pub worker_address: Option<String>,
    pub employer_address: Option<String>,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub hourly_rate: Option<f64>,
    pub hours: Option<f64>,
    pub amount_total_drops: Option<i64>,
    pub status: SessionStatus,
    pub escrow_tx: Option<String>,
    pub nft_id: Option<String>,
    pub payment_tx: Option<String>,
    pub analysis: Option<ShiftAnnotation>,
    pub updated_at_utc: DateTime<Utc>,
}

pub async fn fetch_session(pool: &PgPool, session_id: Uuid) -> Result<Option<SessionRow>> {
    let row = sqlx::query(
        r#"
        select
          s.session_id,
          s.worker_id,
          s.employer_id,
          w.xrpl_address as worker_address,
          e.xrpl_address as employer_address,
          s.start_time_utc,
          s.end_time_utc,
          s.hourly_rate,
          s.hours,
          s.amount_total_drops,
          s.status,
          s.escrow_tx,
          s.nft_id,
          s.payment_tx,
          s.analysis_version,
          s.analysis_json,
          s.updated_at_utc
        from work_sessions s
        join users w on w.user_id = s.worker_id
        join users e on e.user_id = s.employer_id
        where s.session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .context("fetch_session failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let analysis_version: Option<i32> = row.try_get("analysis_version")?;
    let analysis_json: Option<Value> = row.try_get("analysis_json")?;
    let analysis = match (analysis_version, analysis_json) {
        (Some(version), Some(body)) => Some(ShiftAnnotation { version, body }),
        _ => None,
    };

    Ok(Some(SessionRow {
        session_id: row.try_get("session_id")?,
        worker_id: row.try_get("worker_id")?,
        employer_id: row.try_get("employer_id")?,
        worker_address: row.try_get("worker_address")?,
        employer_address: row.try_get("employer_address")?,
        start_time_utc: row.try_get("start_time_utc")?,
        end_time_utc: row.try_get("end_time_utc")?,
        hourly_rate: row.try_get("hourly_rate")?,
        hours: row.try_get("hours")?,
        amount_total_drops: row.try_get("amount_total_drops")?,
        status: SessionStatus::parse(&row.try_get::<String, _>("status")?)?,
        escrow_tx: row.try_get("escrow_tx")?,
        nft_id: row.try_get("nft_id")?,
        payment_tx: row.try_get("payment_tx")?,
        analysis,
        updated_at_utc: row.try_get("updated_at_utc")?,
    }))
}

/// Fields written together with a status change. `None` leaves the column
/// as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub start_time_utc: Option<DateTime<Utc>>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub hourly_rate: Option<f64>,
    pub hours: Option<f64>,
    pub amount_total_drops: Option<i64>,
    pub escrow_tx: Option<String>,
    pub nft_id: Option<String>,
    pub payment_tx: Option<String>,
}

/// Guarded status update: applies only while the current status equals
/// `expected`. Returns rows affected (0 or 1).
pub async fn set_session_status(
    pool: &PgPool,
    session_id: Uuid,
    expected: SessionStatus,
    new: SessionStatus,
    update: &SessionUpdate,
) -> Result<u64> {
    update_session_status(pool, session_id, expected, new, update).await
}

pub(crate) async fn update_session_status<'e, E>(
    ex: E,
    session_id: Uuid,
    expected: SessionStatus,
    new: SessionStatus,
    update: &SessionUpdate,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let res = sqlx::query(
        r#"
        update work_sessions
        set status             = $3,
            start_time_utc     = coalesce($4, start_time_utc),
            end_time_utc       = coalesce($5, end_time_utc),
            hourly_rate        = coalesce($6, hourly_rate),
            hours              = coalesce($7, hours),
            amount_total_drops = coalesce($8, amount_total_drops),
            escrow_tx          = coalesce($9, escrow_tx),
            nft_id             = coalesce($10, nft_id),
            payment_tx         = coalesce($11, payment_tx),
            updated_at_utc     = now()
        where session_id = $1
          and status = $2
        "#,
    )
    .bind(session_id)
    .bind(expected.as_str())
    .bind(new.as_str())
    .bind(update.start_time_utc)
    .bind(update.end_time_utc)
    .bind(update.hourly_rate)
    .bind(update.hours)
    .bind(update.amount_total_drops)
    .bind(&update.escrow_tx)
    .bind(&update.nft_id)
    .bind(&update.payment_tx)
    .execute(ex)
    .await
    .with_context(|| {
        format!(
            "set_session_status {} -> {} failed",
            expected.as_str(),
            new.as_str()
        )
    })?;

    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementStats {
    /// Hours across validated and paid sessions.
    pub total_hours: f64,
    /// Drops currently locked in escrow (validated sessions).
    pub escrowed_drops: i64,
    /// Drops released to workers (paid sessions).
    pub paid_drops: i64,
    /// Session count per status; statuses with no sessions are omitted.
    pub by_status: BTreeMap<String, i64>,
}

pub async fn settlement_stats(pool: &PgPool) -> Result<SettlementStats> {
    let (total_hours, escrowed_drops, paid_drops): (f64, i64, i64) = sqlx::query_as(
        r#"
        select
          coalesce(sum(hours) filter (where status in ('validated', 'paid')), 0)::double precision,
          coalesce(sum(amount_total_drops) filter (where status = 'validated'), 0)::bigint,
          coalesce(sum(amount_total_drops) filter (where status = 'paid'), 0)::bigint
        from work_sessions
        "#,
    )
    .fetch_one(pool)
    .await
    .context("settlement_stats totals query failed")?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        select status, count(*)::bigint
        from work_sessions
        group by status
        "#,
    )
    .fetch_all(pool)
    .await
    .context("settlement_stats count query failed")?;

    Ok(SettlementStats {
        total_hours,
        escrowed_drops,
        paid_drops,
        by_status: rows.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_through_str() {
        for s in SessionStatus::ALL {
            assert_eq!(SessionStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(SessionStatus::parse("PAID").is_err());
    }

    #[test]
    fn annotation_job_type_ignores_blank() {
        let a = ShiftAnnotation {
            version: 1,
            body: json!({"job_type": "  ", "summary": "x"}),
        };
        assert_eq!(a.job_type(), None);
        let b = ShiftAnnotation {
            version: 1,
            body: json!({"job_type": "Plumbing"}),
        };
        assert_eq!(b.job_type(), Some("Plumbing"));
    }
}
