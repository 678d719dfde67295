//! Shared primitive types used across the entire crate.

/// A stable account identifier.
pub type AccountId = String;

/// A stable plan identifier.
pub type PlanId = String;

/// A transaction-log record identifier.
pub type TxId = String;

/// A currency amount in integer minor units. Money paths never use floats.
pub type Amount = i64;

/// A wall-clock timestamp in unix seconds, UTC.
pub type Timestamp = i64;
