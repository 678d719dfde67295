//! SQLite persistence layer.
//!
//! RULE: only the store talks to the database. The allocator, lifecycle,
//! and reconciler call store methods — they never execute SQL directly.
//!
//! Every account mutation here is a single conditional UPDATE guarded by
//! the row's current status, so concurrent callers coordinate through the
//! database and never through application memory.

use crate::{
    constraint::RateConstraint,
    error::{PoolError, PoolResult},
    event::EventLogEntry,
    types::{Amount, Timestamp},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod account;
mod plan;
mod txlog;

pub use account::NewAccount;
pub use txlog::NewAttempt;

pub struct PoolStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file/URI
}

impl PoolStore {
    /// Open (or create) the pool database at `path`. URI filenames are
    /// accepted so callers can use SQLite shared-cache in-memory databases.
    pub fn open(path: &str) -> PoolResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it). Concurrent
        // allocator connections retry on busy instead of erroring.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an isolated in-memory database (used in tests).
    pub fn in_memory() -> PoolResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a new connection to the same database. For file (and shared
    /// cache URI) databases this is how each component gets its own handle;
    /// for plain in-memory databases the reopened store is isolated.
    pub fn reopen(&self) -> PoolResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PoolResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PoolResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (component, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                entry.component,
                entry.event_type,
                entry.payload,
                entry.created_at
            ],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> PoolResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, component, event_type, payload, created_at
             FROM event_log WHERE event_type = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    component: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ── Row types ──────────────────────────────────────────────────

/// Account lifecycle state. `Locking` is transient: it is held between a
/// successful allocation and the redemption outcome, never longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Waiting,
    Processing,
    Locking,
    Completed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Waiting => "waiting",
            AccountStatus::Processing => "processing",
            AccountStatus::Locking => "locking",
            AccountStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(AccountStatus::Waiting),
            "processing" => Some(AccountStatus::Processing),
            "locking" => Some(AccountStatus::Locking),
            "completed" => Some(AccountStatus::Completed),
            _ => None,
        }
    }
}

/// Session flag, orthogonal to `AccountStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Active,
    Invalid,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::Active => "active",
            LoginState::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LoginState::Active),
            "invalid" => Some(LoginState::Invalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "success" => Some(TxStatus::Success),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub account_id: String,
    pub handle: String,
    pub country_code: String,
    pub balance: Amount,
    pub status: AccountStatus,
    pub login_state: LoginState,
    pub bound_plan_id: Option<String>,
    pub bound_room_id: Option<String>,
    pub current_day: Option<u32>,
    pub completed_days: BTreeMap<u32, Amount>,
    pub bound_at: Option<Timestamp>,
    pub last_success_at: Option<Timestamp>,
    pub deleted: bool,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct PlanRow {
    pub plan_id: String,
    pub total_amount: Amount,
    pub plan_days: u32,
    pub daily_amounts: Vec<Amount>,
    pub float_amount: Amount,
    pub day_interval_secs: i64,
    pub exchange_interval_secs: i64,
    pub requires_room_binding: bool,
    pub rate_constraint: RateConstraint,
}

#[derive(Debug, Clone)]
pub struct TxLogRow {
    pub tx_id: String,
    pub account_id: String,
    pub plan_day: u32,
    pub code: String,
    pub amount: Amount,
    pub status: TxStatus,
    pub batch_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// A base-qualified account joined with its governing plan (the bound plan
/// when one exists, otherwise the requesting plan).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub account: AccountRow,
    pub plan: PlanRow,
}

// ── Row decoding helpers ───────────────────────────────────────

pub(crate) fn conv_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

pub(crate) fn not_found_account(err: rusqlite::Error, id: &str) -> PoolError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => PoolError::AccountNotFound(id.to_string()),
        other => PoolError::Database(other),
    }
}
