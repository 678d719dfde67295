//! Account allocation — the qualification pipeline, the priority ranker,
//! and the conditional allocation lock.
//!
//! The pipeline and ranker are read-only and run fully in parallel across
//! callers; correctness comes entirely from the store's conditional
//! processing -> locking update, which re-validates the precondition at
//! write time instead of trusting the ranked snapshot.

use crate::{
    config::PoolConfig,
    error::PoolResult,
    event::PoolEvent,
    store::{AccountRow, Candidate, PoolStore},
    types::{Amount, Timestamp},
};
use rand::Rng;
use std::cmp::Reverse;
use std::collections::HashSet;

/// An incoming redemption request.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub amount: Amount,
    pub country_code: String,
    pub room_id: Option<String>,
    pub plan_id: String,
}

/// Exhaustion is a business result, not an error.
#[derive(Debug)]
pub enum AllocationOutcome {
    Allocated(AccountRow),
    NoEligibleAccount,
}

pub struct Allocator {
    store: PoolStore,
    config: PoolConfig,
}

impl Allocator {
    pub fn new(store: PoolStore, config: PoolConfig) -> Self {
        Self { store, config }
    }

    /// Select and reserve exactly one eligible account, or report that none
    /// exists after the bounded retry budget.
    pub fn allocate(
        &self,
        req: &AllocationRequest,
        now: Timestamp,
    ) -> PoolResult<(AllocationOutcome, Vec<PoolEvent>)> {
        let mut tried: HashSet<String> = HashSet::new();
        let passes = self.config.allocation_retries + 1;

        for pass in 0..passes {
            if pass > 0 {
                self.backoff();
            }
            let mut candidates = self.qualify(req, &tried)?;
            rank(req, &mut candidates);

            for cand in &candidates {
                let room = if cand.plan.requires_room_binding {
                    req.room_id.as_deref()
                } else {
                    None
                };
                if self
                    .store
                    .try_lock_account(&cand.account.account_id, &req.plan_id, room, now)?
                {
                    let locked = self.store.get_account(&cand.account.account_id)?;
                    log::debug!(
                        "allocated account {} for plan {} amount {}",
                        locked.account_id,
                        req.plan_id,
                        req.amount
                    );
                    let events = vec![PoolEvent::AccountAllocated {
                        account_id: locked.account_id.clone(),
                        plan_id: req.plan_id.clone(),
                        amount: req.amount,
                    }];
                    return Ok((AllocationOutcome::Allocated(locked), events));
                }
                // Lost the race to a concurrent caller. Expected under
                // contention; exclude the id from later passes.
                log::debug!("contention on account {}", cand.account.account_id);
                tried.insert(cand.account.account_id.clone());
            }
        }

        log::info!(
            "no eligible account for plan {} amount {} after {} passes",
            req.plan_id,
            req.amount,
            passes
        );
        let events = vec![PoolEvent::AllocationExhausted {
            plan_id: req.plan_id.clone(),
            country_code: req.country_code.clone(),
            amount: req.amount,
            attempts: passes,
        }];
        Ok((AllocationOutcome::NoEligibleAccount, events))
    }

    /// The five qualification layers. Each consumes the previous layer's
    /// candidate set; an empty set falls straight through.
    pub fn qualify(
        &self,
        req: &AllocationRequest,
        excluded: &HashSet<String>,
    ) -> PoolResult<Vec<Candidate>> {
        // Layer 1 — base qualification, one indexed query. Expected to cut
        // the set by orders of magnitude before the layers below run.
        let mut candidates = self
            .store
            .qualify_base(&req.plan_id, &req.country_code, req.amount)?;
        candidates.retain(|c| !excluded.contains(&c.account.account_id));

        // Layer 2 — rate legality under the governing plan's constraint.
        candidates.retain(|c| c.plan.rate_constraint.is_amount_legal(req.amount));

        // Layer 3 — room affinity, only when the plan demands it.
        candidates.retain(|c| {
            if !c.plan.requires_room_binding {
                return true;
            }
            match (&c.account.bound_room_id, &req.room_id) {
                (None, _) => true,
                (Some(bound), Some(want)) => bound == want,
                (Some(_), None) => false,
            }
        });

        // Layer 4 — capacity: the leftover after this redemption must be
        // zero or itself legal, or it would be stranded forever.
        candidates.retain(|c| {
            let remainder = c.plan.total_amount - c.account.balance - req.amount;
            c.plan.rate_constraint.is_reservable(remainder)
        });

        if candidates.is_empty() {
            return Ok(candidates);
        }

        // Layer 5 — daily quota, one grouped sum over the surviving ids.
        let ids: Vec<&str> = candidates
            .iter()
            .map(|c| c.account.account_id.as_str())
            .collect();
        let sums = self.store.success_day_sums_for(&ids)?;
        candidates.retain(|c| {
            let day = c.account.current_day.unwrap_or(1);
            if day >= c.plan.plan_days {
                // Final plan day: capped by the total alone.
                return true;
            }
            let Some(target) = c.plan.daily_amounts.get((day - 1) as usize) else {
                log::warn!(
                    "plan {} has {} daily amounts but {} days; rejecting account {}",
                    c.plan.plan_id,
                    c.plan.daily_amounts.len(),
                    c.plan.plan_days,
                    c.account.account_id
                );
                return false;
            };
            let spent = sums
                .get(&(c.account.account_id.clone(), day))
                .copied()
                .unwrap_or(0);
            spent + req.amount <= *target + c.plan.float_amount
        });

        Ok(candidates)
    }

    fn backoff(&self) {
        let base = self.config.retry_backoff_ms;
        if base == 0 {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        std::thread::sleep(std::time::Duration::from_millis(base + jitter));
    }
}

/// Total preference order over the candidate set. A consistent order for
/// this request's snapshot only — the lock re-validates at write time.
fn rank(req: &AllocationRequest, candidates: &mut [Candidate]) {
    candidates.sort_by_key(|c| {
        let last = match c.account.last_success_at {
            None => (0u8, 0i64), // never used: most deserving
            Some(t) => (1, t),
        };
        (
            binding_priority(&c.account, req),
            Reverse(capacity_class(c, req.amount)),
            Reverse(c.account.balance),
            last,
            c.account.account_id.clone(),
        )
    });
}

/// 1 = same plan & room, 2 = same plan, 3 = same room only, 4 = unbound,
/// 5 = bound elsewhere. Keeps a plan's redemptions concentrated on the
/// accounts already working it.
fn binding_priority(account: &AccountRow, req: &AllocationRequest) -> u8 {
    let plan_same = account.bound_plan_id.as_deref() == Some(req.plan_id.as_str());
    let room_same = match (account.bound_room_id.as_deref(), req.room_id.as_deref()) {
        (Some(bound), Some(want)) => bound == want,
        _ => false,
    };
    if plan_same && room_same {
        1
    } else if plan_same {
        2
    } else if account.bound_plan_id.is_none() && room_same {
        3
    } else if account.bound_plan_id.is_none() && account.bound_room_id.is_none() {
        4
    } else {
        5
    }
}

/// 3 = exact fill, 2 = legal reservation, 1 = anything else. Fill accounts
/// to completion before opening new reservations.
fn capacity_class(cand: &Candidate, amount: Amount) -> u8 {
    let remainder = cand.plan.total_amount - cand.account.balance - amount;
    if remainder == 0 {
        3
    } else if cand.plan.rate_constraint.is_reservable(remainder) {
        2
    } else {
        1
    }
}
