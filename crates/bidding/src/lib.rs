//! `credmart-bidding` — the Bid & Auction Engine.
//!
//! One `BidBook` aggregate per credit title owns the full bid set and the
//! (at most one) open auction. Acceptance and the mass-rejection of every
//! other pending bid are a single event in a single append, which is what
//! makes "at most one accepted bid per title" hold under concurrency.

pub mod auction;
pub mod book;

pub use auction::{Auction, AuctionId, AuctionKind, AuctionStatus};
pub use book::{Bid, BidBook, BidCommand, BidEvent, BidId, BidKind, BidStatus};
