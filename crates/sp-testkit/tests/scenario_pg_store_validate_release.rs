use std::sync::Arc;

use chrono::{Duration, Utc};
use sp_db::{IntentStatus, NewSession, NewUser, SessionStatus};
use sp_ledger::PaperLedger;
use sp_settlement::{EngineSettings, PgSessionStore, SessionStore, SettlementEngine, ValidateRequest};
use sp_testkit::platform_credential;
use uuid::Uuid;

#[tokio::test]
async fn postgres_store_carries_a_shift_from_proposed_to_paid() -> anyhow::Result<()> {
    let url = match std::env::var(sp_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SP_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    sp_db::migrate(&pool).await?;

    let worker_id = Uuid::new_v4();
    let employer_id = Uuid::new_v4();
    let worker_address = format!("rPG{}", &Uuid::new_v4().simple().to_string()[..24]);
    for (user_id, role, address) in [
        (worker_id, "worker", worker_address.clone()),
        (employer_id, "employer", format!("rPG{}", &Uuid::new_v4().simple().to_string()[..24])),
    ] {
        sp_db::insert_user(
            &pool,
            &NewUser {
                user_id,
                display_name: format!("{role} {user_id}"),
                role: role.to_string(),
                xrpl_address: Some(address),
            },
        )
        .await?;
    }

    let session_id = Uuid::new_v4();
    let start = Utc::now() - Duration::hours(9);
    sp_db::insert_session(
        &pool,
        &NewSession {
            session_id,
            worker_id,
            employer_id,
            start_time_utc: start,
            end_time_utc: Some(start + Duration::hours(8)),
            hourly_rate: Some(15.0),
            status: SessionStatus::Proposed,
            analysis: None,
        },
    )
    .await?;

    let paper = Arc::new(PaperLedger::new());
    paper.fund(&platform_credential(), 1_000);
    let store = Arc::new(PgSessionStore::new(pool.clone()));
    let engine = SettlementEngine::new(store.clone(), paper.clone(), platform_credential(), EngineSettings::default());

    let validated = engine.validate_shift(session_id, &ValidateRequest::default()).await?;
    assert_eq!(validated.amount_total_drops, 120_000_000);

    let row = store.get_session(session_id).await?.expect("session");
    assert_eq!(row.status, SessionStatus::Validated);
    assert_eq!(row.escrow_tx.as_deref(), Some(validated.escrow_tx.as_str()));
    assert!(store.blocking_intent_for_session(session_id).await?.is_none());

    paper.advance_clock(Duration::days(8));
    let paid = engine.release_shift_payment(session_id).await?;

    let row = store.get_session(session_id).await?.expect("session");
    assert_eq!(row.status, SessionStatus::Paid);
    assert_eq!(row.payment_tx.as_deref(), Some(paid.payment_tx.as_str()));

    let closed: Vec<(String,)> =
        sqlx::query_as("select status from settlement_intents where session_id = $1 order by created_at_utc")
            .bind(session_id)
            .fetch_all(&pool)
            .await?;
    assert_eq!(closed.len(), 2);
    assert!(closed.iter().all(|(s,)| s == IntentStatus::Committed.as_str()));
    Ok(())
}
