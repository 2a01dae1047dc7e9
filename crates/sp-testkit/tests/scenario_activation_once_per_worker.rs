use sp_settlement::ValidateRequest;
use sp_testkit::{Harness, ShiftBuilder};

#[tokio::test]
async fn new_worker_is_activated_once_across_sessions() -> anyhow::Result<()> {
    let h = Harness::new(1_000);
    let worker = "rWORKERnewxxxxxxxxxxxxxxxxxxxxxxx";
    assert!(h.paper.balance_of(worker).is_none());

    let first = h
        .add_session(ShiftBuilder::proposed().hours(2.0).worker(worker))
        .await;
    let second = h
        .add_session(ShiftBuilder::proposed().hours(3.0).worker(worker))
        .await;

    h.engine.validate_shift(first, &ValidateRequest::default()).await?;
    h.engine.validate_shift(second, &ValidateRequest::default()).await?;

    assert_eq!(h.paper.submit_count("Payment"), 1);
    assert_eq!(h.paper.submit_count("EscrowCreate"), 2);
    assert_eq!(h.paper.balance_of(worker).map(|d| d.get()), Some(10_000_000));
    Ok(())
}

#[tokio::test]
async fn insufficient_platform_balance_is_reported_before_any_submit() -> anyhow::Result<()> {
    // 120 escrow + 5 fee buffer + 10 reserve > 100
    let h = Harness::new(100);
    let id = h.add_session(ShiftBuilder::proposed().hours(8.0)).await;

    let err = h
        .engine
        .validate_shift(id, &ValidateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "insufficient_funds");
    assert!(err.hint().contains("faucet"));

    assert_eq!(h.paper.submit_count("Payment"), 0);
    assert_eq!(h.paper.submit_count("EscrowCreate"), 0);

    let intents = h.store.intents_for(id).await;
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].status, sp_db::IntentStatus::Failed);
    assert_eq!(
        h.store.session(id).await.expect("session").status,
        sp_db::SessionStatus::Proposed
    );
    Ok(())
}
