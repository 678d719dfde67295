//! Rate-constraint evaluation — pure amount-legality rules, no I/O.
//!
//! A plan's constraint decides which redemption amounts an account may
//! absorb, and whether leftover plan capacity after a redemption is still
//! usable by a future redemption. Malformed configuration (non-positive
//! base, empty fixed set) rejects every amount instead of erroring.

use crate::types::Amount;
use serde::{Deserialize, Serialize};

/// The amount-legality rule attached to a plan. Closed set, matched
/// exhaustively everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateConstraint {
    /// Any positive amount is legal.
    All,
    /// Amount must be a multiple of `base` and at least `min`.
    Multiple { base: Amount, min: Amount },
    /// Amount must be a member of the enumerated set.
    Fixed { values: Vec<Amount> },
}

impl RateConstraint {
    /// Does `amount` satisfy this constraint?
    pub fn is_amount_legal(&self, amount: Amount) -> bool {
        if amount <= 0 {
            return false;
        }
        match self {
            RateConstraint::All => true,
            RateConstraint::Multiple { base, min } => {
                // base <= 0 is a configuration anomaly: reject all.
                *base > 0 && amount >= *min && amount % *base == 0
            }
            RateConstraint::Fixed { values } => !values.is_empty() && values.contains(&amount),
        }
    }

    /// Is leftover plan capacity `remainder` still usable by a future
    /// redemption? Zero means an exact fill; otherwise the remainder itself
    /// must be a legal amount, or it would be stranded forever.
    pub fn is_reservable(&self, remainder: Amount) -> bool {
        remainder == 0 || (remainder > 0 && self.is_amount_legal(remainder))
    }
}
