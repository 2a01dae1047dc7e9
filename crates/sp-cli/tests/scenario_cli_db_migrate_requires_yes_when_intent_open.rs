use chrono::{Duration, Utc};
use predicates::prelude::*;
use sp_db::{IntentKind, IntentStatus, NewIntent, NewSession, NewUser, SessionStatus};
use uuid::Uuid;

/// `sp-cli db migrate` must refuse while a settlement intent is open unless --yes.
///
/// DB-backed test, skipped if SP_DATABASE_URL is not set.
#[allow(deprecated)]
#[tokio::test]
async fn cli_db_migrate_requires_yes_when_intent_open() -> anyhow::Result<()> {
    let url = match std::env::var(sp_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SP_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };
    sp_db::migrate(&pool).await?;

    let worker_id = Uuid::new_v4();
    let employer_id = Uuid::new_v4();
    for (user_id, role) in [(worker_id, "worker"), (employer_id, "employer")] {
        sp_db::insert_user(
            &pool,
            &NewUser {
                user_id,
                display_name: format!("cli {role}"),
                role: role.to_string(),
                xrpl_address: None,
            },
        )
        .await?;
    }

    let session_id = Uuid::new_v4();
    let start = Utc::now() - Duration::hours(4);
    sp_db::insert_session(
        &pool,
        &NewSession {
            session_id,
            worker_id,
            employer_id,
            start_time_utc: start,
            end_time_utc: Some(start + Duration::hours(3)),
            hourly_rate: Some(20.0),
            status: SessionStatus::Proposed,
            analysis: None,
        },
    )
    .await?;

    let intent_id = Uuid::new_v4();
    let begun = sp_db::intent_begin(
        &pool,
        &NewIntent {
            intent_id,
            session_id,
            kind: IntentKind::EscrowCreate,
            payload: serde_json::json!({}),
        },
        SessionStatus::Proposed,
    )
    .await?;
    assert_eq!(begun, sp_db::IntentBegin::Started);

    let mut cmd = assert_cmd::Command::cargo_bin("sp-cli")?;
    cmd.env(sp_db::ENV_DB_URL, &url).args(["db", "migrate"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("REFUSING MIGRATE"));

    let mut cmd2 = assert_cmd::Command::cargo_bin("sp-cli")?;
    cmd2.env(sp_db::ENV_DB_URL, &url)
        .args(["db", "migrate", "--yes"]);
    cmd2.assert()
        .success()
        .stdout(predicate::str::contains("migrations_applied=true"));

    // Leave no open intent behind for other tests.
    sp_db::intent_close(&pool, intent_id, IntentStatus::Failed, Some("test cleanup")).await?;

    Ok(())
}
