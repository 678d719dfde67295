use super::{
    conv_err, not_found_account, AccountRow, AccountStatus, Candidate, LoginState, PoolStore,
};
use crate::{
    error::PoolResult,
    types::{Amount, Timestamp},
};
use rusqlite::params;
use std::collections::BTreeMap;

const ACCOUNT_COLS: &str = "account_id, handle, country_code, balance, status, login_state, \
     bound_plan_id, bound_room_id, current_day, completed_days, bound_at, \
     last_success_at, deleted, updated_at";

/// Insert parameters for a new account. Provisioning itself is out of
/// scope; this exists for the runner, tests, and operator tooling.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_id: String,
    pub handle: String,
    pub country_code: String,
    pub balance: Amount,
    pub status: AccountStatus,
    pub login_state: LoginState,
    pub bound_plan_id: Option<String>,
    pub bound_room_id: Option<String>,
    pub current_day: Option<u32>,
    pub bound_at: Option<Timestamp>,
    pub last_success_at: Option<Timestamp>,
}

impl NewAccount {
    /// A fresh unbound account in the given country, ready for allocation.
    pub fn processing(account_id: &str, country_code: &str, balance: Amount) -> Self {
        Self {
            account_id: account_id.to_string(),
            handle: format!("handle-{account_id}"),
            country_code: country_code.to_string(),
            balance,
            status: AccountStatus::Processing,
            login_state: LoginState::Active,
            bound_plan_id: None,
            bound_room_id: None,
            current_day: None,
            bound_at: None,
            last_success_at: None,
        }
    }
}

pub(crate) fn account_from_row_at(
    row: &rusqlite::Row<'_>,
    off: usize,
) -> rusqlite::Result<AccountRow> {
    let status_raw: String = row.get(off + 4)?;
    let status = AccountStatus::parse(&status_raw)
        .ok_or_else(|| conv_err(off + 4, format!("bad account status '{status_raw}'")))?;
    let login_raw: String = row.get(off + 5)?;
    let login_state = LoginState::parse(&login_raw)
        .ok_or_else(|| conv_err(off + 5, format!("bad login state '{login_raw}'")))?;
    let completed_raw: String = row.get(off + 9)?;
    let completed_days: BTreeMap<u32, Amount> = serde_json::from_str(&completed_raw)
        .map_err(|e| conv_err(off + 9, e.to_string()))?;
    Ok(AccountRow {
        account_id: row.get(off)?,
        handle: row.get(off + 1)?,
        country_code: row.get(off + 2)?,
        balance: row.get(off + 3)?,
        status,
        login_state,
        bound_plan_id: row.get(off + 6)?,
        bound_room_id: row.get(off + 7)?,
        current_day: row.get::<_, Option<i64>>(off + 8)?.map(|d| d as u32),
        completed_days,
        bound_at: row.get(off + 10)?,
        last_success_at: row.get(off + 11)?,
        deleted: row.get::<_, i64>(off + 12)? != 0,
        updated_at: row.get(off + 13)?,
    })
}

impl PoolStore {
    // ── Account CRUD ───────────────────────────────────────────────

    pub fn insert_account(&self, acct: &NewAccount, now: Timestamp) -> PoolResult<()> {
        // Invariant: current_day is non-null iff bound_plan_id is non-null.
        debug_assert_eq!(acct.bound_plan_id.is_some(), acct.current_day.is_some());
        self.conn.execute(
            "INSERT INTO account (account_id, handle, country_code, balance, status, login_state,
                 bound_plan_id, bound_room_id, current_day, completed_days, bound_at,
                 last_success_at, deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '{}', ?10, ?11, 0, ?12)",
            params![
                acct.account_id,
                acct.handle,
                acct.country_code,
                acct.balance,
                acct.status.as_str(),
                acct.login_state.as_str(),
                acct.bound_plan_id,
                acct.bound_room_id,
                acct.current_day.map(|d| d as i64),
                acct.bound_at,
                acct.last_success_at,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> PoolResult<AccountRow> {
        let sql = format!("SELECT {ACCOUNT_COLS} FROM account WHERE account_id = ?1");
        self.conn
            .query_row(&sql, params![account_id], |row| account_from_row_at(row, 0))
            .map_err(|e| not_found_account(e, account_id))
    }

    pub fn accounts_with_status(&self, status: AccountStatus) -> PoolResult<Vec<AccountRow>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLS} FROM account
             WHERE status = ?1 AND deleted = 0 ORDER BY account_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], |row| account_from_row_at(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Accounts still bound to a plan and not yet completed, for the plan
    /// expiry sweep.
    pub fn bound_active_accounts(&self) -> PoolResult<Vec<AccountRow>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLS} FROM account
             WHERE bound_plan_id IS NOT NULL AND status != 'completed' AND deleted = 0
             ORDER BY account_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| account_from_row_at(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_login_state(
        &self,
        account_id: &str,
        state: LoginState,
        now: Timestamp,
    ) -> PoolResult<()> {
        self.conn.execute(
            "UPDATE account SET login_state = ?2, updated_at = ?3 WHERE account_id = ?1",
            params![account_id, state.as_str(), now],
        )?;
        Ok(())
    }

    /// Soft-delete: the account is retired, never physically reused.
    pub fn retire_account(&self, account_id: &str, now: Timestamp) -> PoolResult<()> {
        self.conn.execute(
            "UPDATE account SET deleted = 1, updated_at = ?2 WHERE account_id = ?1",
            params![account_id, now],
        )?;
        Ok(())
    }

    // ── Qualification (layer 1) ────────────────────────────────────

    /// Base qualification: processing, logged in, right country, and room
    /// for `amount` under the governing plan's total. The governing plan is
    /// the bound plan when one exists, otherwise the requesting plan.
    pub fn qualify_base(
        &self,
        plan_id: &str,
        country_code: &str,
        amount: Amount,
    ) -> PoolResult<Vec<Candidate>> {
        let sql = format!(
            "SELECT {acct}, {plan}
             FROM account a
             JOIN plan p ON p.plan_id = COALESCE(a.bound_plan_id, ?1)
             WHERE a.deleted = 0
               AND a.status = 'processing'
               AND a.login_state = 'active'
               AND a.country_code = ?2
               AND a.balance >= 0
               AND a.balance + ?3 <= p.total_amount
             ORDER BY a.account_id ASC",
            acct = prefixed_account_cols("a"),
            plan = super::plan::prefixed_plan_cols("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![plan_id, country_code, amount], |row| {
                Ok(Candidate {
                    account: account_from_row_at(row, 0)?,
                    plan: super::plan::plan_from_row_at(row, 14)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Allocation lock ────────────────────────────────────────────

    /// The single point of mutual exclusion: a conditional
    /// processing -> locking transition. Returns false when another caller
    /// won the race (zero rows affected).
    ///
    /// `room_id` must be None unless the governing plan requires room
    /// binding; an existing binding is never overwritten.
    pub fn try_lock_account(
        &self,
        account_id: &str,
        plan_id: &str,
        room_id: Option<&str>,
        now: Timestamp,
    ) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET
                 status        = 'locking',
                 bound_plan_id = COALESCE(bound_plan_id, ?2),
                 bound_room_id = COALESCE(bound_room_id, ?3),
                 current_day   = COALESCE(current_day, 1),
                 bound_at      = COALESCE(bound_at, ?4),
                 updated_at    = ?4
             WHERE account_id = ?1 AND status = 'processing' AND deleted = 0",
            params![account_id, plan_id, room_id, now],
        )?;
        Ok(n == 1)
    }

    // ── Lifecycle transitions (all conditional single updates) ─────

    /// locking -> processing, after a failed redemption or when the daily
    /// quota is still unmet.
    pub fn release_to_processing(&self, account_id: &str, now: Timestamp) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET status = 'processing', updated_at = ?2
             WHERE account_id = ?1 AND status = 'locking'",
            params![account_id, now],
        )?;
        Ok(n == 1)
    }

    /// Settle a successful redemption on a locking account: new balance,
    /// re-derived per-day totals, the follow-up status, and (possibly
    /// advanced) current day. `last_success_at` is stamped with `now`.
    pub fn settle_success(
        &self,
        account_id: &str,
        balance: Amount,
        completed_days: &BTreeMap<u32, Amount>,
        status: AccountStatus,
        current_day: u32,
        now: Timestamp,
    ) -> PoolResult<bool> {
        let days_json = serde_json::to_string(completed_days)?;
        let n = self.conn.execute(
            "UPDATE account SET
                 balance = ?2, completed_days = ?3, status = ?4,
                 current_day = ?5, last_success_at = ?6, updated_at = ?6
             WHERE account_id = ?1 AND status = 'locking'",
            params![
                account_id,
                balance,
                days_json,
                status.as_str(),
                current_day as i64,
                now
            ],
        )?;
        Ok(n == 1)
    }

    /// Terminal transition from locking: plan total reached. Unbinds the
    /// plan and clears the day pointer.
    pub fn complete_from_locking(
        &self,
        account_id: &str,
        balance: Amount,
        completed_days: &BTreeMap<u32, Amount>,
        now: Timestamp,
    ) -> PoolResult<bool> {
        let days_json = serde_json::to_string(completed_days)?;
        let n = self.conn.execute(
            "UPDATE account SET
                 balance = ?2, completed_days = ?3, status = 'completed',
                 bound_plan_id = NULL, current_day = NULL,
                 last_success_at = ?4, updated_at = ?4
             WHERE account_id = ?1 AND status = 'locking'",
            params![account_id, balance, days_json, now],
        )?;
        Ok(n == 1)
    }

    /// Terminal transition for an idle account: plan total reached via an
    /// earlier settle, or all plan days elapsed (timeout). Locking rows are
    /// left for their owning caller to resolve first.
    pub fn complete_idle(&self, account_id: &str, now: Timestamp) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET
                 status = 'completed', bound_plan_id = NULL, current_day = NULL,
                 updated_at = ?2
             WHERE account_id = ?1 AND status IN ('waiting', 'processing')",
            params![account_id, now],
        )?;
        Ok(n == 1)
    }

    /// waiting -> processing.
    pub fn promote_to_processing(&self, account_id: &str, now: Timestamp) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET status = 'processing', updated_at = ?2
             WHERE account_id = ?1 AND status = 'waiting'",
            params![account_id, now],
        )?;
        Ok(n == 1)
    }

    /// Advance the day pointer on a waiting account, guarded against a
    /// concurrent advance.
    pub fn advance_day(
        &self,
        account_id: &str,
        from_day: u32,
        to_day: u32,
        now: Timestamp,
    ) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET current_day = ?3, updated_at = ?4
             WHERE account_id = ?1 AND status = 'waiting' AND current_day = ?2",
            params![account_id, from_day as i64, to_day as i64, now],
        )?;
        Ok(n == 1)
    }

    // ── Stuck-state recovery ───────────────────────────────────────

    /// Ids of locking accounts whose last update is older than `cutoff`.
    pub fn stale_locking_ids(&self, cutoff: Timestamp) -> PoolResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id FROM account
             WHERE status = 'locking' AND updated_at <= ?1
             ORDER BY account_id ASC",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Force an abandoned locking row back to processing. The cutoff guard
    /// is re-checked so a row resolved between select and update is left
    /// alone.
    pub fn force_unlock(
        &self,
        account_id: &str,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE account SET status = 'processing', updated_at = ?3
             WHERE account_id = ?1 AND status = 'locking' AND updated_at <= ?2",
            params![account_id, cutoff, now],
        )?;
        Ok(n == 1)
    }
}

pub(crate) fn prefixed_account_cols(alias: &str) -> String {
    ACCOUNT_COLS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
