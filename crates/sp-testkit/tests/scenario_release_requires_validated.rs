use chrono::Duration;
use sp_db::SessionStatus;
use sp_settlement::ValidateRequest;
use sp_testkit::{Harness, ShiftBuilder};

#[tokio::test]
async fn release_on_proposed_makes_no_ledger_call() -> anyhow::Result<()> {
    let h = Harness::new(1_000);
    let id = h.add_session(ShiftBuilder::proposed()).await;

    let err = h.engine.release_shift_payment(id).await.unwrap_err();
    assert_eq!(err.category(), "precondition_failed");
    assert_eq!(h.paper.submit_count("EscrowFinish"), 0);
    assert_eq!(h.paper.submit_count("EscrowCreate"), 0);
    assert!(h.store.intents_for(id).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn validated_without_escrow_reference_is_precondition_failed() -> anyhow::Result<()> {
    let h = Harness::new(1_000);
    let id = h
        .add_session(ShiftBuilder::proposed().status(SessionStatus::Validated))
        .await;

    let err = h.engine.release_shift_payment(id).await.unwrap_err();
    assert_eq!(err.category(), "precondition_failed");
    assert_eq!(h.paper.submit_count("EscrowFinish"), 0);
    Ok(())
}

#[tokio::test]
async fn validate_then_release_after_delay_pays_worker() -> anyhow::Result<()> {
    let h = Harness::new(1_000);
    let worker = "rWORKERpaidxxxxxxxxxxxxxxxxxxxxxx";
    let id = h
        .add_session(ShiftBuilder::proposed().hours(8.0).worker(worker))
        .await;

    let validated = h.engine.validate_shift(id, &ValidateRequest::default()).await?;

    // Before the release time the ledger refuses the finish.
    let early = h.engine.release_shift_payment(id).await.unwrap_err();
    assert_eq!(early.category(), "permission_denied");
    assert_eq!(
        h.store.session(id).await.expect("session").status,
        SessionStatus::Validated
    );

    h.paper.advance_clock(Duration::days(8));
    let paid = h.engine.release_shift_payment(id).await?;
    assert_eq!(paid.status, SessionStatus::Paid);

    let row = h.store.session(id).await.expect("session");
    assert_eq!(row.status, SessionStatus::Paid);
    assert_eq!(row.payment_tx.as_deref(), Some(paid.payment_tx.as_str()));
    assert_eq!(row.escrow_tx.as_deref(), Some(validated.escrow_tx.as_str()));
    assert_eq!(h.paper.escrow_count(), 0);

    // 10 XRP activation reserve + 120 XRP released.
    assert_eq!(
        h.paper.balance_of(worker).map(|d| d.get()),
        Some(130_000_000)
    );

    let again = h.engine.release_shift_payment(id).await.unwrap_err();
    assert_eq!(again.category(), "precondition_failed");

    let stats = h.engine.stats().await?;
    assert_eq!(stats.paid_drops, 120_000_000);
    assert_eq!(stats.escrowed_drops, 0);
    assert_eq!(stats.by_status.get("paid"), Some(&1));
    Ok(())
}
