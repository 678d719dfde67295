//! Integration tests for the pending-transaction reconciler.

use giftpool_core::{
    config::PoolConfig,
    constraint::RateConstraint,
    engine::PoolEngine,
    reconciler::SweepOutcome,
    store::{AccountStatus, NewAccount, NewAttempt, PlanRow, TxStatus},
};

const TIMEOUT: i64 = 600;
const GRACE: i64 = 3_600;

fn build() -> PoolEngine {
    let engine = PoolEngine::in_memory(PoolConfig::default()).expect("in_memory engine");
    engine.migrate().expect("migrate");

    // A plan and account for the tx rows to hang off.
    let plan = PlanRow {
        plan_id: "plan-1".to_string(),
        total_amount: 10_000,
        plan_days: 1,
        daily_amounts: vec![10_000],
        float_amount: 0,
        day_interval_secs: 0,
        exchange_interval_secs: 0,
        requires_room_binding: false,
        rate_constraint: RateConstraint::All,
    };
    engine.store.insert_plan(&plan, 0).unwrap();
    let mut acct = NewAccount::processing("acct-1", "US", 0);
    acct.bound_plan_id = Some("plan-1".to_string());
    acct.current_day = Some(1);
    acct.bound_at = Some(0);
    acct.status = AccountStatus::Processing;
    engine.store.insert_account(&acct, 0).unwrap();
    engine
}

fn pending(engine: &PoolEngine, tx_id: &str, code: &str, batch: Option<&str>, created_at: i64) {
    engine
        .store
        .insert_attempt(
            &NewAttempt {
                tx_id: tx_id.to_string(),
                account_id: "acct-1".to_string(),
                plan_day: 1,
                code: code.to_string(),
                amount: 100,
                batch_id: batch.map(str::to_string),
            },
            created_at,
        )
        .unwrap();
}

fn status_of(engine: &PoolEngine, tx_id: &str) -> TxStatus {
    engine.store.get_tx(tx_id).unwrap().status
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario E: a batchless pending row past the timeout is failed
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn batchless_pending_fails_after_timeout() {
    let engine = build();
    let now = 10_000;
    pending(&engine, "tx-old", "CODE-1", None, now - TIMEOUT - 60);
    pending(&engine, "tx-young", "CODE-2", None, now - 60);

    let outcome = engine.run_reconciler(now).unwrap();
    assert_eq!(outcome, SweepOutcome::Completed { failed: 1 });

    assert_eq!(status_of(&engine, "tx-old"), TxStatus::Failed);
    assert_eq!(
        engine.store.get_tx("tx-old").unwrap().error_message.as_deref(),
        Some("timed out")
    );
    assert_eq!(status_of(&engine, "tx-young"), TxStatus::Pending);

    let events = engine.store.events_of_type("pending_failed").unwrap();
    assert_eq!(events.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplicate success on the same code settles immediately, regardless of age
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn duplicate_code_fails_even_when_young() {
    let engine = build();
    let now = 10_000;
    pending(&engine, "tx-winner", "CODE-DUP", None, now - 120);
    engine.store.mark_tx_success("tx-winner", now - 100).unwrap();
    pending(&engine, "tx-loser", "CODE-DUP", None, now - 30);

    engine.run_reconciler(now).unwrap();

    assert_eq!(status_of(&engine, "tx-loser"), TxStatus::Failed);
    assert_eq!(
        engine.store.get_tx("tx-loser").unwrap().error_message.as_deref(),
        Some("already redeemed elsewhere")
    );
    // The winner is untouched.
    assert_eq!(status_of(&engine, "tx-winner"), TxStatus::Success);
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch context: sibling success vs. a delayed batch
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn batch_with_successful_sibling_fails_at_standard_timeout() {
    let engine = build();
    let now = 10_000;
    pending(&engine, "tx-sibling", "CODE-S", Some("batch-1"), now - TIMEOUT - 120);
    engine.store.mark_tx_success("tx-sibling", now - 200).unwrap();
    pending(&engine, "tx-stuck", "CODE-T", Some("batch-1"), now - TIMEOUT - 60);

    engine.run_reconciler(now).unwrap();
    assert_eq!(status_of(&engine, "tx-stuck"), TxStatus::Failed);
}

#[test]
fn batch_with_no_success_waits_for_the_grace_period() {
    let engine = build();
    let now = 10_000;
    pending(&engine, "tx-a", "CODE-A", Some("batch-2"), now - TIMEOUT - 60);
    pending(&engine, "tx-b", "CODE-B", Some("batch-2"), now - TIMEOUT - 60);

    // Past the standard timeout but the whole batch may just be delayed.
    engine.run_reconciler(now).unwrap();
    assert_eq!(status_of(&engine, "tx-a"), TxStatus::Pending);
    assert_eq!(status_of(&engine, "tx-b"), TxStatus::Pending);

    // Past the grace period the batch is declared broken.
    let later = now - TIMEOUT - 60 + GRACE + 1;
    engine.run_reconciler(later).unwrap();
    assert_eq!(status_of(&engine, "tx-a"), TxStatus::Failed);
    assert_eq!(status_of(&engine, "tx-b"), TxStatus::Failed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweep-wide property: nothing old and unexcused survives a sweep
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn sweep_leaves_only_young_or_graced_rows_pending() {
    let engine = build();
    let now = 100_000;

    pending(&engine, "tx-1", "C1", None, now - TIMEOUT - 1); // -> failed
    pending(&engine, "tx-2", "C2", None, now - TIMEOUT + 30); // young
    pending(&engine, "tx-3", "C3", Some("b1"), now - TIMEOUT - 1); // graced
    pending(&engine, "tx-4", "C4", Some("b2"), now - GRACE - 1); // -> failed

    engine.run_reconciler(now).unwrap();

    for tx in engine.store.pending_rows().unwrap() {
        let age = now - tx.created_at;
        assert!(
            age < TIMEOUT || (tx.batch_id.is_some() && age < GRACE),
            "tx {} aged {age}s should not have survived",
            tx.tx_id
        );
    }
    assert_eq!(status_of(&engine, "tx-1"), TxStatus::Failed);
    assert_eq!(status_of(&engine, "tx-2"), TxStatus::Pending);
    assert_eq!(status_of(&engine, "tx-3"), TxStatus::Pending);
    assert_eq!(status_of(&engine, "tx-4"), TxStatus::Failed);
}

#[test]
fn back_to_back_sweeps_run_cleanly() {
    let engine = build();
    let now = 10_000;
    pending(&engine, "tx-1", "C1", None, now - TIMEOUT - 1);

    assert_eq!(
        engine.run_reconciler(now).unwrap(),
        SweepOutcome::Completed { failed: 1 }
    );
    // The single-flight guard releases; an immediate follow-up sweep runs.
    assert_eq!(
        engine.run_reconciler(now).unwrap(),
        SweepOutcome::Completed { failed: 0 }
    );
}
