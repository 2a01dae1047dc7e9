//! An intent abandoned without a recorded hash may still have reached the
//! ledger; the shift stays blocked until an operator resolves it.

use chrono::{Duration, Utc};
use sp_db::{IntentStatus, SessionStatus};
use sp_settlement::ValidateRequest;
use sp_testkit::{Harness, ShiftBuilder};

#[tokio::test]
async fn abandoned_escrow_intent_is_not_retried_until_resolved() -> anyhow::Result<()> {
    let h = Harness::new(1_000);
    let worker = "rWORKERabandonxxxxxxxxxxxxxxxxxxx";
    h.paper.activate(worker, 20);
    let id = h
        .add_session(ShiftBuilder::proposed().hours(8.0).worker(worker))
        .await;

    // The escrow lands but its hash never reaches the intent row.
    h.store.fail_next_record_tx();
    let err = h
        .engine
        .validate_shift(id, &ValidateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "storage");
    assert_eq!(h.paper.escrow_count(), 1);

    let intents = h.store.intents_for(id).await;
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].status, IntentStatus::Pending);
    let intent_id = intents[0].intent_id;

    assert!(h.store.backdate_intent(intent_id, Duration::hours(1)).await);
    let report = h.engine.reconcile_open_intents(Utc::now()).await?;
    assert_eq!(report.abandoned, 1);
    assert!(h.engine.open_intents().await?.is_empty());
    let abandoned = h.engine.abandoned_intents().await?;
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].intent_id, intent_id);

    let retry = h
        .engine
        .validate_shift(id, &ValidateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(retry.category(), "precondition_failed");
    assert!(retry.to_string().contains(&intent_id.to_string()));
    assert_eq!(h.paper.submit_count("EscrowCreate"), 1);
    assert_eq!(h.paper.escrow_count(), 1);

    let refuse = h.engine.refuse_shift(id).await.unwrap_err();
    assert_eq!(refuse.category(), "precondition_failed");
    assert_eq!(
        h.store.session(id).await.expect("session").status,
        SessionStatus::Proposed
    );

    h.engine
        .resolve_abandoned_intent(intent_id, Some("escrow found on ledger; settled by hand"))
        .await?;
    let again = h
        .engine
        .resolve_abandoned_intent(intent_id, None)
        .await
        .unwrap_err();
    assert_eq!(again.category(), "precondition_failed");

    let intents = h.store.intents_for(id).await;
    assert_eq!(intents[0].status, IntentStatus::Resolved);
    assert!(h.engine.abandoned_intents().await?.is_empty());
    Ok(())
}
