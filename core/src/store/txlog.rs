use super::{conv_err, PoolStore, TxLogRow, TxStatus};
use crate::{
    error::{PoolError, PoolResult},
    types::{Amount, Timestamp},
};
use rusqlite::params;
use std::collections::{BTreeMap, HashMap};

const TX_COLS: &str = "tx_id, account_id, plan_day, code, amount, status, batch_id, \
     error_message, created_at, resolved_at";

/// Insert parameters for a redemption attempt. The row is created pending,
/// before the external redemption call is made.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub tx_id: String,
    pub account_id: String,
    pub plan_day: u32,
    pub code: String,
    pub amount: Amount,
    pub batch_id: Option<String>,
}

fn tx_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TxLogRow> {
    let status_raw: String = row.get(5)?;
    let status = TxStatus::parse(&status_raw)
        .ok_or_else(|| conv_err(5, format!("bad tx status '{status_raw}'")))?;
    Ok(TxLogRow {
        tx_id: row.get(0)?,
        account_id: row.get(1)?,
        plan_day: row.get::<_, i64>(2)? as u32,
        code: row.get(3)?,
        amount: row.get(4)?,
        status,
        batch_id: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

impl PoolStore {
    pub fn insert_attempt(&self, attempt: &NewAttempt, now: Timestamp) -> PoolResult<()> {
        self.conn.execute(
            "INSERT INTO tx_log (tx_id, account_id, plan_day, code, amount, status, batch_id,
                 error_message, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, NULL, ?7, NULL)",
            params![
                attempt.tx_id,
                attempt.account_id,
                attempt.plan_day as i64,
                attempt.code,
                attempt.amount,
                attempt.batch_id,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_tx(&self, tx_id: &str) -> PoolResult<TxLogRow> {
        let sql = format!("SELECT {TX_COLS} FROM tx_log WHERE tx_id = ?1");
        self.conn
            .query_row(&sql, params![tx_id], tx_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PoolError::TransactionNotFound(tx_id.to_string())
                }
                other => PoolError::Database(other),
            })
    }

    /// pending -> success. Returns false if the row was already resolved.
    pub fn mark_tx_success(&self, tx_id: &str, now: Timestamp) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE tx_log SET status = 'success', resolved_at = ?2
             WHERE tx_id = ?1 AND status = 'pending'",
            params![tx_id, now],
        )?;
        Ok(n == 1)
    }

    /// pending -> failed. Returns false if the row was already resolved.
    pub fn mark_tx_failed(&self, tx_id: &str, error: &str, now: Timestamp) -> PoolResult<bool> {
        let n = self.conn.execute(
            "UPDATE tx_log SET status = 'failed', error_message = ?2, resolved_at = ?3
             WHERE tx_id = ?1 AND status = 'pending'",
            params![tx_id, error, now],
        )?;
        Ok(n == 1)
    }

    // ── Quota aggregation ──────────────────────────────────────────

    /// Per-day successful totals for one account, re-derived from the log.
    /// The source of truth for `completed_days`.
    pub fn success_day_sums(&self, account_id: &str) -> PoolResult<BTreeMap<u32, Amount>> {
        let mut stmt = self.conn.prepare(
            "SELECT plan_day, COALESCE(SUM(amount), 0) FROM tx_log
             WHERE account_id = ?1 AND status = 'success'
             GROUP BY plan_day",
        )?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok((row.get::<_, i64>(0)? as u32, row.get::<_, Amount>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn sum_success_for_day(&self, account_id: &str, day: u32) -> PoolResult<Amount> {
        let total: Amount = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM tx_log
             WHERE account_id = ?1 AND plan_day = ?2 AND status = 'success'",
            params![account_id, day as i64],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Grouped successful sums over a candidate id set, one query — the
    /// daily-quota layer runs on a small set and never scans per row.
    pub fn success_day_sums_for(
        &self,
        account_ids: &[&str],
    ) -> PoolResult<HashMap<(String, u32), Amount>> {
        if account_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; account_ids.len()].join(",");
        let sql = format!(
            "SELECT account_id, plan_day, COALESCE(SUM(amount), 0) FROM tx_log
             WHERE status = 'success' AND account_id IN ({placeholders})
             GROUP BY account_id, plan_day"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(account_ids.iter()), |row| {
                Ok((
                    (row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32),
                    row.get::<_, Amount>(2)?,
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    // ── Reconciler queries ─────────────────────────────────────────

    /// All pending rows, oldest first.
    pub fn pending_rows(&self) -> PoolResult<Vec<TxLogRow>> {
        let sql = format!(
            "SELECT {TX_COLS} FROM tx_log
             WHERE status = 'pending' ORDER BY created_at ASC, tx_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], tx_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Has the same code already been redeemed successfully by another row?
    pub fn code_has_other_success(&self, code: &str, exclude_tx: &str) -> PoolResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tx_log
             WHERE code = ?1 AND status = 'success' AND tx_id != ?2",
            params![code, exclude_tx],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Has any sibling in the batch resolved successfully?
    pub fn batch_has_success(&self, batch_id: &str) -> PoolResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tx_log WHERE batch_id = ?1 AND status = 'success'",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
