//! giftpool-core — account allocation engine for gift-card redemption.
//!
//! Given a redemption request (amount + country), the engine selects,
//! under contention from concurrent callers, exactly one account that can
//! legally absorb the amount under its multi-day spending plan, reserves
//! it with a single conditional row update, and drives it through a
//! bounded lifecycle (waiting / processing / locking / completed) with
//! daily and total quota tracking and background recovery sweeps.

pub mod allocator;
pub mod clock;
pub mod config;
pub mod constraint;
pub mod engine;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod reconciler;
pub mod store;
pub mod types;
