use crate::error::PoolResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning knobs for the allocator and the maintenance sweeps.
///
/// Loaded from a JSON file in deployments; `Default` values match the
/// documented defaults and are what the tests run with unless they say
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Full qualification-pipeline re-runs after the first pass fails to
    /// lock any candidate.
    pub allocation_retries: u32,
    /// Base sleep between pipeline re-runs; a random jitter of up to half
    /// this value is added so colliding callers de-synchronize.
    pub retry_backoff_ms: u64,
    /// Age past which a pending transaction with no batch is declared failed.
    pub pending_timeout_secs: i64,
    /// Age past which a pending transaction is declared failed even when no
    /// sibling in its batch has succeeded.
    pub batch_grace_secs: i64,
    /// Age past which a `locking` account abandoned by its caller is forced
    /// back to `processing`.
    pub locking_grace_secs: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            allocation_retries: 3,
            retry_backoff_ms: 50,
            pending_timeout_secs: 600,
            batch_grace_secs: 3600,
            locking_grace_secs: 30,
        }
    }
}

impl PoolConfig {
    /// Load config from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PoolResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
