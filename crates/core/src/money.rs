//! Money values.
//!
//! All amounts are integers in the smallest currency unit (cents). Fee rates
//! are basis points so fee arithmetic stays exact; `fee_on` rounds half up to
//! the nearest cent.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Monetary amount in smallest currency unit (cents).
pub type Amount = u64;

/// Basis points per whole (100%).
const BPS_SCALE: u32 = 10_000;

/// Platform fee rate, expressed in basis points (1 bps = 0.01%).
///
/// Valid range is `[0, 10_000)`, i.e. a rate in `[0, 1)` — the platform can
/// never take the whole price.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u32);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub fn from_basis_points(bps: u32) -> MarketResult<Self> {
        if bps >= BPS_SCALE {
            return Err(MarketError::validation(format!(
                "fee rate must be below 10000 bps, got {bps}"
            )));
        }
        Ok(Self(bps))
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// Fee owed on `price`, rounded half up to the nearest cent.
    pub fn fee_on(&self, price: Amount) -> Amount {
        let numer = price as u128 * self.0 as u128 + (BPS_SCALE as u128 / 2);
        (numer / BPS_SCALE as u128) as Amount
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self::ZERO
    }
}
