//! Pending-transaction reconciler.
//!
//! A redemption attempt writes its pending row before the external call;
//! if the caller dies mid-call the row stays pending and the account's
//! quota sums (which count successes only) can no longer be trusted to
//! tell the whole story. The sweep resolves such rows so downstream state
//! unblocks. It never retries the redemption itself.

use crate::{
    config::PoolConfig,
    error::PoolResult,
    event::PoolEvent,
    store::{PoolStore, TxLogRow},
    types::Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed { failed: usize },
    /// Another sweep was still in flight; this one stepped aside.
    Skipped,
}

pub struct Reconciler {
    store: PoolStore,
    config: PoolConfig,
    in_flight: AtomicBool,
}

impl Reconciler {
    pub fn new(store: PoolStore, config: PoolConfig) -> Self {
        Self {
            store,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Resolve stuck pending rows. Single-flight: a sweep overlapping an
    /// unfinished one returns `Skipped` instead of blocking.
    pub fn sweep(&self, now: Timestamp) -> PoolResult<(SweepOutcome, Vec<PoolEvent>)> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            log::debug!("pending sweep already in flight, skipping");
            return Ok((SweepOutcome::Skipped, Vec::new()));
        }
        let result = self.sweep_inner(now);
        self.in_flight.store(false, Ordering::Release);
        result
    }

    fn sweep_inner(&self, now: Timestamp) -> PoolResult<(SweepOutcome, Vec<PoolEvent>)> {
        let mut events = Vec::new();
        let mut failed = 0usize;

        for tx in self.store.pending_rows()? {
            if let Some(reason) = self.failure_reason(&tx, now)? {
                // Conditional: the owning caller may have resolved the row
                // between select and update.
                if self.store.mark_tx_failed(&tx.tx_id, reason, now)? {
                    failed += 1;
                    log::info!("pending attempt {} failed: {reason}", tx.tx_id);
                    events.push(PoolEvent::PendingFailed {
                        tx_id: tx.tx_id.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        Ok((SweepOutcome::Completed { failed }, events))
    }

    #[cfg(test)]
    fn hold_in_flight(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn failure_reason(&self, tx: &TxLogRow, now: Timestamp) -> PoolResult<Option<&'static str>> {
        // A success on the same code anywhere else settles it immediately,
        // regardless of age.
        if self.store.code_has_other_success(&tx.code, &tx.tx_id)? {
            return Ok(Some("already redeemed elsewhere"));
        }

        let age = now - tx.created_at;
        if age < self.config.pending_timeout_secs {
            return Ok(None);
        }

        match &tx.batch_id {
            None => Ok(Some("timed out")),
            Some(batch_id) => {
                if self.store.batch_has_success(batch_id)? {
                    // A sibling landed, so the channel is healthy and this
                    // row is genuinely stuck.
                    Ok(Some("timed out, batch sibling succeeded"))
                } else if age >= self.config.batch_grace_secs {
                    Ok(Some("timed out, batch grace elapsed"))
                } else {
                    // The whole batch may be delayed rather than broken.
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PoolStore;

    fn build() -> Reconciler {
        let store = PoolStore::in_memory().expect("in_memory store");
        store.migrate().expect("migrate");
        Reconciler::new(store, PoolConfig::default())
    }

    #[test]
    fn overlapping_sweep_steps_aside() {
        let reconciler = build();

        // Simulate a sweep still in flight on another thread.
        assert!(reconciler.hold_in_flight());
        let (outcome, events) = reconciler.sweep(1_000).unwrap();
        assert_eq!(outcome, SweepOutcome::Skipped);
        assert!(events.is_empty());

        // The guard is still held by the original sweep.
        assert!(!reconciler.hold_in_flight());
        reconciler.in_flight.store(false, Ordering::Release);

        // Once released, the next sweep runs normally.
        let (outcome, _) = reconciler.sweep(1_000).unwrap();
        assert_eq!(outcome, SweepOutcome::Completed { failed: 0 });
    }
}
