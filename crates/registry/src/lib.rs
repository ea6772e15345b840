//! `credmart-registry` — the Credit Title Registry.
//!
//! Owns the status state machine and core attributes of each tradable credit
//! instrument. All mutation goes through the `CreditTitle` aggregate; the
//! legal status edges live in a single transition table.

pub mod title;

pub use title::{
    CreditTitle, TitleCommand, TitleEvent, TitleId, TitleSnapshot, TitleStatus,
};
