//! `credmart-settlement` — multi-party settlement.
//!
//! `allocate` is the pure money split for one trade (buyer pays the price,
//! seller receives the price net of fee, platform receives the fee).
//! `Settlement` is the record of one execution attempt; the engine drives
//! the actual wallet movements and reports the outcome back here.

pub mod allocation;
pub mod settlement;

pub use allocation::{allocate, Allocation, AllocationRole, Party};
pub use settlement::{
    Settlement, SettlementCommand, SettlementEvent, SettlementId, SettlementStatus,
};
