//! The pool engine — wires the store, allocator, lifecycle machine, and
//! reconciler together and persists every event they emit.
//!
//! RULES:
//!   - Components never call each other; they meet only through the store
//!     and the event log.
//!   - All outbound collaborator requests (login, logout, completion
//!     notification) are events in the log, fire-and-forget from here.
//!   - Every operation takes an explicit `now` so hosts and tests control
//!     time; production callers pass `clock::now_ts()`.

use crate::{
    allocator::{AllocationOutcome, AllocationRequest, Allocator},
    config::PoolConfig,
    error::PoolResult,
    event::{event_type_name, EventLogEntry, PoolEvent},
    lifecycle::{Lifecycle, RedemptionOutcome},
    reconciler::{Reconciler, SweepOutcome},
    store::PoolStore,
    types::{Amount, Timestamp, TxId},
};

pub struct PoolEngine {
    pub store: PoolStore,
    allocator: Allocator,
    lifecycle: Lifecycle,
    reconciler: Reconciler,
}

impl PoolEngine {
    /// Open (or create) an engine over the database at `path`. Each
    /// component gets its own connection to the same database.
    pub fn open(path: &str, config: PoolConfig) -> PoolResult<Self> {
        Self::from_store(PoolStore::open(path)?, config)
    }

    /// An engine over a private shared-cache in-memory database, so the
    /// component connections all see one database. Used in tests and the
    /// demo runner.
    pub fn in_memory(config: PoolConfig) -> PoolResult<Self> {
        let uri = format!(
            "file:giftpool_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        Self::from_store(PoolStore::open(&uri)?, config)
    }

    pub fn from_store(store: PoolStore, config: PoolConfig) -> PoolResult<Self> {
        let allocator = Allocator::new(store.reopen()?, config.clone());
        let lifecycle = Lifecycle::new(store.reopen()?, config.clone());
        let reconciler = Reconciler::new(store.reopen()?, config);
        Ok(Self {
            store,
            allocator,
            lifecycle,
            reconciler,
        })
    }

    /// Apply schema migrations.
    pub fn migrate(&self) -> PoolResult<()> {
        self.store.migrate()
    }

    // ── Inbound: AllocateAccount ───────────────────────────────────

    pub fn allocate(
        &self,
        req: &AllocationRequest,
        now: Timestamp,
    ) -> PoolResult<AllocationOutcome> {
        let (outcome, events) = self.allocator.allocate(req, now)?;
        self.record("allocator", &events, now)?;
        Ok(outcome)
    }

    // ── Redemption feedback loop ───────────────────────────────────

    /// Open a pending attempt against a reserved account, before the
    /// external redemption call is made. Returns the transaction id the
    /// caller must complete with.
    pub fn begin_attempt(
        &self,
        account_id: &str,
        code: &str,
        amount: Amount,
        batch_id: Option<&str>,
        now: Timestamp,
    ) -> PoolResult<TxId> {
        self.lifecycle
            .begin_attempt(account_id, code, amount, batch_id, now)
    }

    /// Feed the external redemption result back.
    pub fn complete_attempt(
        &self,
        tx_id: &str,
        outcome: RedemptionOutcome,
        now: Timestamp,
    ) -> PoolResult<Vec<PoolEvent>> {
        let events = self.lifecycle.complete_attempt(tx_id, outcome, now)?;
        self.record("lifecycle", &events, now)?;
        Ok(events)
    }

    // ── Scheduled sweeps (host supplies the timer) ─────────────────

    /// Lifecycle reconciliation: recover abandoned locking rows, complete
    /// or expire bound plans, then promote waiting accounts.
    pub fn run_maintenance(&self, now: Timestamp) -> PoolResult<Vec<PoolEvent>> {
        let mut events = self.lifecycle.recover_stale_locking(now)?;
        events.extend(self.lifecycle.expire_and_complete(now)?);
        events.extend(self.lifecycle.promote_waiting(now)?);
        self.record("lifecycle", &events, now)?;
        Ok(events)
    }

    /// Pending-transaction sweep.
    pub fn run_reconciler(&self, now: Timestamp) -> PoolResult<SweepOutcome> {
        let (outcome, events) = self.reconciler.sweep(now)?;
        self.record("reconciler", &events, now)?;
        Ok(outcome)
    }

    fn record(&self, component: &str, events: &[PoolEvent], now: Timestamp) -> PoolResult<()> {
        for event in events {
            self.store.append_event(&EventLogEntry {
                id: None,
                component: component.to_string(),
                event_type: event_type_name(event).to_string(),
                payload: serde_json::to_string(event)?,
                created_at: now,
            })?;
        }
        Ok(())
    }
}
