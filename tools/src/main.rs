//! pool-runner: headless demo/ops runner for the gift-card account pool.
//!
//! Seeds a demo plan and account pool, pushes a stream of redemption
//! requests through the allocator, feeds simulated redemption outcomes
//! back, and runs the maintenance and reconciler sweeps.
//!
//! Usage:
//!   pool-runner --accounts 20 --requests 50 --amount 50 --db pool.db

use anyhow::Result;
use giftpool_core::{
    allocator::{AllocationOutcome, AllocationRequest},
    clock::now_ts,
    config::PoolConfig,
    constraint::RateConstraint,
    engine::PoolEngine,
    lifecycle::RedemptionOutcome,
    store::{NewAccount, PlanRow},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let accounts = parse_arg(&args, "--accounts", 10u32);
    let requests = parse_arg(&args, "--requests", 20u32);
    let amount = parse_arg(&args, "--amount", 50i64);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str());

    println!("giftpool — pool-runner");
    println!("  accounts: {accounts}");
    println!("  requests: {requests}");
    println!("  amount:   {amount}");
    println!("  db:       {}", db.unwrap_or(":memory:"));
    println!();

    let config = PoolConfig::default();
    let engine = match db {
        Some(path) => PoolEngine::open(path, config)?,
        None => PoolEngine::in_memory(config)?,
    };
    engine.migrate()?;

    let now = now_ts();
    let plan = PlanRow {
        plan_id: "plan-demo".to_string(),
        total_amount: 600,
        plan_days: 3,
        daily_amounts: vec![200, 200, 200],
        float_amount: 50,
        day_interval_secs: 0,
        exchange_interval_secs: 0,
        requires_room_binding: false,
        rate_constraint: RateConstraint::Multiple { base: 50, min: 50 },
    };
    engine.store.insert_plan(&plan, now)?;

    for i in 0..accounts {
        let acct = NewAccount::processing(&format!("acct-{i:04}"), "US", 0);
        engine.store.insert_account(&acct, now)?;
    }

    let mut allocated = 0u32;
    let mut exhausted = 0u32;
    let mut completed_plans = 0u32;

    for i in 0..requests {
        let now = now_ts();
        let req = AllocationRequest {
            amount,
            country_code: "US".to_string(),
            room_id: None,
            plan_id: plan.plan_id.clone(),
        };
        match engine.allocate(&req, now)? {
            AllocationOutcome::NoEligibleAccount => {
                exhausted += 1;
                log::info!("request {i}: no eligible account");
            }
            AllocationOutcome::Allocated(account) => {
                allocated += 1;
                let code = format!("GIFT-{}", uuid::Uuid::new_v4().simple());
                let tx_id = engine.begin_attempt(&account.account_id, &code, amount, None, now)?;
                // Simulated external redemption: always succeeds here.
                let events = engine.complete_attempt(
                    &tx_id,
                    RedemptionOutcome::Success {
                        new_balance: account.balance + amount,
                    },
                    now,
                )?;
                completed_plans += events
                    .iter()
                    .filter(|e| {
                        matches!(e, giftpool_core::event::PoolEvent::PlanCompleted { .. })
                    })
                    .count() as u32;
            }
        }
        engine.run_maintenance(now_ts())?;
    }

    let sweep = engine.run_reconciler(now_ts())?;

    println!("allocated:       {allocated}");
    println!("exhausted:       {exhausted}");
    println!("plans completed: {completed_plans}");
    println!("reconciler:      {sweep:?}");
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
