//! The per-account lifecycle state machine.
//!
//! States: waiting (idle, re-evaluated by the sweep), processing (eligible
//! for allocation), locking (reserved, transient), completed (terminal).
//! Every transition is a conditional single-row update in the store, and
//! every settle re-derives the per-day totals from the transaction log —
//! the log is the source of truth, so a missed update heals on the next
//! settle or sweep.

use crate::{
    config::PoolConfig,
    error::PoolResult,
    event::PoolEvent,
    store::{AccountStatus, PoolStore, TxStatus},
    types::{Amount, Timestamp, TxId},
};
use uuid::Uuid;

/// Result of the external redemption call, fed back by the caller. The
/// call itself (transport, retries) lives outside the core.
#[derive(Debug, Clone)]
pub enum RedemptionOutcome {
    Success { new_balance: Amount },
    Failed { error: String },
}

pub struct Lifecycle {
    store: PoolStore,
    config: PoolConfig,
}

impl Lifecycle {
    pub fn new(store: PoolStore, config: PoolConfig) -> Self {
        Self { store, config }
    }

    /// Open a redemption attempt against a reserved account. The pending
    /// row is written before the external call so a crash mid-call leaves
    /// evidence for the reconciler.
    pub fn begin_attempt(
        &self,
        account_id: &str,
        code: &str,
        amount: Amount,
        batch_id: Option<&str>,
        now: Timestamp,
    ) -> PoolResult<TxId> {
        let account = self.store.get_account(account_id)?;
        if account.status != AccountStatus::Locking {
            return Err(crate::error::PoolError::AccountNotReserved(
                account_id.to_string(),
            ));
        }
        let tx_id = Uuid::new_v4().to_string();
        self.store.insert_attempt(
            &crate::store::NewAttempt {
                tx_id: tx_id.clone(),
                account_id: account_id.to_string(),
                plan_day: account.current_day.unwrap_or(1),
                code: code.to_string(),
                amount,
                batch_id: batch_id.map(str::to_string),
            },
            now,
        )?;
        Ok(tx_id)
    }

    /// Feed the external redemption result back and resolve the locking
    /// reservation.
    pub fn complete_attempt(
        &self,
        tx_id: &str,
        outcome: RedemptionOutcome,
        now: Timestamp,
    ) -> PoolResult<Vec<PoolEvent>> {
        let tx = self.store.get_tx(tx_id)?;
        if tx.status != TxStatus::Pending {
            // Already resolved (e.g. by the reconciler). Idempotent no-op.
            log::warn!("attempt {tx_id} already resolved as {:?}", tx.status);
            return Ok(Vec::new());
        }
        let account = self.store.get_account(&tx.account_id)?;

        match outcome {
            RedemptionOutcome::Failed { error } => {
                self.store.mark_tx_failed(tx_id, &error, now)?;
                if !self.store.release_to_processing(&tx.account_id, now)? {
                    log::warn!(
                        "account {} was not locking when attempt {tx_id} failed",
                        tx.account_id
                    );
                }
                Ok(vec![PoolEvent::AttemptFailed {
                    tx_id: tx_id.to_string(),
                    account_id: tx.account_id.clone(),
                    error,
                }])
            }
            RedemptionOutcome::Success { new_balance } => {
                self.store.mark_tx_success(tx_id, now)?;

                let Some(plan_id) = account.bound_plan_id.clone() else {
                    // A locking account always carries a plan binding; the
                    // absence is a data anomaly. Unblock and move on.
                    log::warn!("locking account {} has no bound plan", tx.account_id);
                    self.store.release_to_processing(&tx.account_id, now)?;
                    return Ok(Vec::new());
                };
                let plan = self.store.get_plan(&plan_id)?;

                // Re-derive all per-day totals from the log, never from the
                // delta of this one transaction.
                let sums = self.store.success_day_sums(&tx.account_id)?;
                let day = account.current_day.unwrap_or(1);
                let mut events = Vec::new();

                if new_balance >= plan.total_amount {
                    if !self
                        .store
                        .complete_from_locking(&tx.account_id, new_balance, &sums, now)?
                    {
                        log::warn!("account {} left locking before settle", tx.account_id);
                        return Ok(events);
                    }
                    log::info!(
                        "account {} completed plan {plan_id} at balance {new_balance}",
                        tx.account_id
                    );
                    events.push(PoolEvent::PlanCompleted {
                        account_id: tx.account_id.clone(),
                        plan_id,
                        final_balance: new_balance,
                    });
                    events.push(PoolEvent::LogoutRequested {
                        account_id: tx.account_id.clone(),
                        reason: "plan completed".to_string(),
                    });
                    events.push(PoolEvent::CompletionNotified {
                        account_id: tx.account_id.clone(),
                        final_balance: new_balance,
                    });
                    return Ok(events);
                }

                let spent_today = sums.get(&day).copied().unwrap_or(0);
                let day_target = plan.daily_amounts.get((day - 1) as usize).copied();
                let quota_met = day < plan.plan_days && day_target.is_some_and(|t| spent_today >= t);

                if quota_met {
                    // Quota done for the day: park the account. Advance the
                    // day pointer now if the inter-day interval has already
                    // elapsed since the previous success; otherwise the
                    // waiting sweep advances it later.
                    let interval_ok = account
                        .last_success_at
                        .map_or(true, |t| now - t >= plan.day_interval_secs);
                    let new_day = if interval_ok { day + 1 } else { day };
                    if !self.store.settle_success(
                        &tx.account_id,
                        new_balance,
                        &sums,
                        AccountStatus::Waiting,
                        new_day,
                        now,
                    )? {
                        log::warn!("account {} left locking before settle", tx.account_id);
                        return Ok(events);
                    }
                    if new_day > day {
                        events.push(PoolEvent::DayAdvanced {
                            account_id: tx.account_id.clone(),
                            new_day,
                        });
                    }
                } else {
                    // Quota unmet (or final day, capped by total only):
                    // straight back into the allocation pool.
                    if !self.store.settle_success(
                        &tx.account_id,
                        new_balance,
                        &sums,
                        AccountStatus::Processing,
                        day,
                        now,
                    )? {
                        log::warn!("account {} left locking before settle", tx.account_id);
                    }
                }
                Ok(events)
            }
        }
    }

    /// waiting -> processing sweep. An account is promoted when it has no
    /// plan (and a positive balance), has a plan but no success yet, or its
    /// configured interval has elapsed with spend still to do.
    pub fn promote_waiting(&self, now: Timestamp) -> PoolResult<Vec<PoolEvent>> {
        let mut events = Vec::new();

        for acct in self.store.accounts_with_status(AccountStatus::Waiting)? {
            let reason = match &acct.bound_plan_id {
                None => {
                    if acct.balance > 0 {
                        Some("unbound account re-entering rotation")
                    } else {
                        None
                    }
                }
                Some(plan_id) => {
                    let plan = self.store.get_plan(plan_id)?;
                    if acct.balance >= plan.total_amount {
                        // Total already reached; the completion sweep owns it.
                        continue;
                    }
                    match acct.last_success_at {
                        None => Some("no successful redemption yet"),
                        Some(last) => {
                            let day = acct.current_day.unwrap_or(1);
                            if day >= plan.plan_days {
                                // Final day: only the exchange interval gates.
                                if now - last >= plan.exchange_interval_secs {
                                    Some("exchange interval elapsed on final day")
                                } else {
                                    None
                                }
                            } else {
                                let spent = self.store.sum_success_for_day(&acct.account_id, day)?;
                                let target = plan
                                    .daily_amounts
                                    .get((day - 1) as usize)
                                    .copied()
                                    .unwrap_or(Amount::MAX);
                                if spent >= target {
                                    // Day quota met: wait out the day interval,
                                    // then roll to the next day.
                                    if now - last >= plan.day_interval_secs {
                                        if self
                                            .store
                                            .advance_day(&acct.account_id, day, day + 1, now)?
                                        {
                                            events.push(PoolEvent::DayAdvanced {
                                                account_id: acct.account_id.clone(),
                                                new_day: day + 1,
                                            });
                                        }
                                        Some("next plan day started")
                                    } else {
                                        None
                                    }
                                } else if now - last >= plan.exchange_interval_secs {
                                    Some("exchange interval elapsed, daily quota unmet")
                                } else {
                                    None
                                }
                            }
                        }
                    }
                }
            };

            if let Some(reason) = reason {
                if self.store.promote_to_processing(&acct.account_id, now)? {
                    events.push(PoolEvent::LoginRequested {
                        account_id: acct.account_id.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        Ok(events)
    }

    /// Force locking rows abandoned past the grace period back to
    /// processing. A data anomaly (caller crash), corrected here, never
    /// raised as an error.
    pub fn recover_stale_locking(&self, now: Timestamp) -> PoolResult<Vec<PoolEvent>> {
        let cutoff = now - self.config.locking_grace_secs;
        let mut events = Vec::new();
        for account_id in self.store.stale_locking_ids(cutoff)? {
            if self.store.force_unlock(&account_id, cutoff, now)? {
                log::warn!("recovered stale locking account {account_id}");
                events.push(PoolEvent::LockingRecovered {
                    account_id: account_id.clone(),
                });
            }
        }
        Ok(events)
    }

    /// Complete accounts whose plan total has been reached (self-healing)
    /// and expire plans whose days ran out without reaching the total.
    /// Locking rows are skipped; their owning caller resolves them first.
    pub fn expire_and_complete(&self, now: Timestamp) -> PoolResult<Vec<PoolEvent>> {
        let mut events = Vec::new();

        for acct in self.store.bound_active_accounts()? {
            if acct.status == AccountStatus::Locking {
                continue;
            }
            let Some(plan_id) = acct.bound_plan_id.clone() else {
                continue;
            };
            let plan = self.store.get_plan(&plan_id)?;

            if acct.balance >= plan.total_amount {
                if self.store.complete_idle(&acct.account_id, now)? {
                    events.push(PoolEvent::PlanCompleted {
                        account_id: acct.account_id.clone(),
                        plan_id: plan_id.clone(),
                        final_balance: acct.balance,
                    });
                    events.push(PoolEvent::LogoutRequested {
                        account_id: acct.account_id.clone(),
                        reason: "plan completed".to_string(),
                    });
                    events.push(PoolEvent::CompletionNotified {
                        account_id: acct.account_id.clone(),
                        final_balance: acct.balance,
                    });
                }
                continue;
            }

            // Terminal timeout: the plan's day budget has run out. The plan
            // window is plan_days spans of the inter-day interval from the
            // moment the account was bound.
            if let Some(bound_at) = acct.bound_at {
                let window = plan.plan_days as i64 * plan.day_interval_secs;
                if window > 0 && now - bound_at >= window {
                    if self.store.complete_idle(&acct.account_id, now)? {
                        log::info!(
                            "account {} expired out of plan {plan_id} at balance {}",
                            acct.account_id,
                            acct.balance
                        );
                        events.push(PoolEvent::PlanExpired {
                            account_id: acct.account_id.clone(),
                            plan_id: plan_id.clone(),
                            balance: acct.balance,
                        });
                        events.push(PoolEvent::LogoutRequested {
                            account_id: acct.account_id.clone(),
                            reason: "plan days exhausted".to_string(),
                        });
                    }
                }
            }
        }

        Ok(events)
    }
}
