//! `credmart-wallet` — the Wallet Ledger.
//!
//! The only component allowed to mutate money. One `WalletAccount` aggregate
//! per user; reservations move funds from available to pending without
//! finalizing the transfer, and every logical charge is idempotent via a
//! caller-supplied key.

pub mod account;

pub use account::{
    TransactionStatus, WalletAccount, WalletBalance, WalletCommand, WalletEvent, WalletId,
    WalletTransaction, WalletTransactionKind,
};
