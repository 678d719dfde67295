use super::{conv_err, PlanRow, PoolStore};
use crate::{constraint::RateConstraint, error::PoolError, error::PoolResult, types::Timestamp};
use rusqlite::params;

const PLAN_COLS: &str = "plan_id, total_amount, plan_days, daily_amounts, float_amount, \
     day_interval_secs, exchange_interval_secs, requires_room_binding, \
     constraint_kind, constraint_base, constraint_min, constraint_values";

pub(crate) fn plan_from_row_at(row: &rusqlite::Row<'_>, off: usize) -> rusqlite::Result<PlanRow> {
    let daily_raw: String = row.get(off + 3)?;
    let daily_amounts: Vec<i64> =
        serde_json::from_str(&daily_raw).map_err(|e| conv_err(off + 3, e.to_string()))?;

    let kind: String = row.get(off + 8)?;
    let rate_constraint = match kind.as_str() {
        "all" => RateConstraint::All,
        "multiple" => RateConstraint::Multiple {
            // Missing base/min is a configuration anomaly; base 0 makes the
            // evaluator reject every amount rather than erroring.
            base: row.get::<_, Option<i64>>(off + 9)?.unwrap_or(0),
            min: row.get::<_, Option<i64>>(off + 10)?.unwrap_or(0),
        },
        "fixed" => {
            let values_raw: Option<String> = row.get(off + 11)?;
            let values = match values_raw {
                Some(raw) => {
                    serde_json::from_str(&raw).map_err(|e| conv_err(off + 11, e.to_string()))?
                }
                None => Vec::new(),
            };
            RateConstraint::Fixed { values }
        }
        other => return Err(conv_err(off + 8, format!("bad constraint kind '{other}'"))),
    };

    Ok(PlanRow {
        plan_id: row.get(off)?,
        total_amount: row.get(off + 1)?,
        plan_days: row.get::<_, i64>(off + 2)? as u32,
        daily_amounts,
        float_amount: row.get(off + 4)?,
        day_interval_secs: row.get(off + 5)?,
        exchange_interval_secs: row.get(off + 6)?,
        requires_room_binding: row.get::<_, i64>(off + 7)? != 0,
        rate_constraint,
    })
}

impl PoolStore {
    pub fn insert_plan(&self, plan: &PlanRow, now: Timestamp) -> PoolResult<()> {
        let daily_json = serde_json::to_string(&plan.daily_amounts)?;
        let (kind, base, min, values_json) = match &plan.rate_constraint {
            RateConstraint::All => ("all", None, None, None),
            RateConstraint::Multiple { base, min } => ("multiple", Some(*base), Some(*min), None),
            RateConstraint::Fixed { values } => {
                ("fixed", None, None, Some(serde_json::to_string(values)?))
            }
        };
        self.conn.execute(
            "INSERT INTO plan (plan_id, total_amount, plan_days, daily_amounts, float_amount,
                 day_interval_secs, exchange_interval_secs, requires_room_binding,
                 constraint_kind, constraint_base, constraint_min, constraint_values, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                plan.plan_id,
                plan.total_amount,
                plan.plan_days as i64,
                daily_json,
                plan.float_amount,
                plan.day_interval_secs,
                plan.exchange_interval_secs,
                plan.requires_room_binding as i64,
                kind,
                base,
                min,
                values_json,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, plan_id: &str) -> PoolResult<PlanRow> {
        let sql = format!("SELECT {PLAN_COLS} FROM plan WHERE plan_id = ?1");
        self.conn
            .query_row(&sql, params![plan_id], |row| plan_from_row_at(row, 0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PoolError::PlanNotFound(plan_id.to_string())
                }
                other => PoolError::Database(other),
            })
    }
}

pub(crate) fn prefixed_plan_cols(alias: &str) -> String {
    PLAN_COLS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
