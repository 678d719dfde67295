//! Pool events — the boundary between the core and its collaborators.
//!
//! RULE: the core never calls the session manager, the notifier, or any
//! other external collaborator directly. Components return events; the
//! engine appends them to the event log, where collaborators consume them
//! (fire-and-forget from the core's perspective).

use crate::types::{AccountId, Amount, PlanId, Timestamp, TxId};
use serde::{Deserialize, Serialize};

/// Every event emitted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    // ── Allocator ──────────────────────────────────
    AccountAllocated {
        account_id: AccountId,
        plan_id: PlanId,
        amount: Amount,
    },
    AllocationExhausted {
        plan_id: PlanId,
        country_code: String,
        amount: Amount,
        attempts: u32,
    },

    // ── Lifecycle ──────────────────────────────────
    AttemptFailed {
        tx_id: TxId,
        account_id: AccountId,
        error: String,
    },
    DayAdvanced {
        account_id: AccountId,
        new_day: u32,
    },
    PlanCompleted {
        account_id: AccountId,
        plan_id: PlanId,
        final_balance: Amount,
    },
    PlanExpired {
        account_id: AccountId,
        plan_id: PlanId,
        balance: Amount,
    },
    LockingRecovered {
        account_id: AccountId,
    },

    // ── Session / notification requests (outbound contracts) ──
    LoginRequested {
        account_id: AccountId,
        reason: String,
    },
    LogoutRequested {
        account_id: AccountId,
        reason: String,
    },
    CompletionNotified {
        account_id: AccountId,
        final_balance: Amount,
    },

    // ── Reconciler ─────────────────────────────────
    PendingFailed {
        tx_id: TxId,
        reason: String,
    },
}

/// An event-log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub component: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PoolEvent
    pub created_at: Timestamp,
}

/// Stable string name for an event variant, used for the event_type column.
pub fn event_type_name(event: &PoolEvent) -> &'static str {
    match event {
        PoolEvent::AccountAllocated { .. } => "account_allocated",
        PoolEvent::AllocationExhausted { .. } => "allocation_exhausted",
        PoolEvent::AttemptFailed { .. } => "attempt_failed",
        PoolEvent::DayAdvanced { .. } => "day_advanced",
        PoolEvent::PlanCompleted { .. } => "plan_completed",
        PoolEvent::PlanExpired { .. } => "plan_expired",
        PoolEvent::LockingRecovered { .. } => "locking_recovered",
        PoolEvent::LoginRequested { .. } => "login_requested",
        PoolEvent::LogoutRequested { .. } => "logout_requested",
        PoolEvent::CompletionNotified { .. } => "completion_notified",
        PoolEvent::PendingFailed { .. } => "pending_failed",
    }
}
