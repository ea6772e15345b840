use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credmart_core::{AggregateId, Amount};

/// Auction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuctionId(pub AggregateId);

impl AuctionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AuctionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionKind {
    /// Ascending: each bid must strictly beat the best pending price.
    Traditional,
    /// Descending: the price decays from start to floor; the first bid at or
    /// above the current price wins immediately.
    Dutch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Closed,
    Cancelled,
}

/// An auction attached to a bid book. At most one non-closed, non-cancelled
/// auction exists per title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub kind: AuctionKind,
    pub start_price: Amount,
    /// Dutch only; `floor_price ≤ start_price`.
    pub floor_price: Option<Amount>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: AuctionStatus,
}

impl Auction {
    pub fn is_open(&self) -> bool {
        !matches!(self.status, AuctionStatus::Closed | AuctionStatus::Cancelled)
    }

    /// Open and inside its time window at `now`.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.start_at && now < self.end_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.end_at
    }

    /// Current asking price at `now`.
    ///
    /// Traditional auctions hold the start price (bidding moves the floor via
    /// the pending bid set, not via this function). Dutch auctions decay
    /// linearly from `start_price` to `floor_price` over the auction window,
    /// clamped at both ends.
    pub fn current_price(&self, now: DateTime<Utc>) -> Amount {
        match self.kind {
            AuctionKind::Traditional => self.start_price,
            AuctionKind::Dutch => {
                let floor = self.floor_price.unwrap_or(self.start_price);
                if now <= self.start_at {
                    return self.start_price;
                }
                if now >= self.end_at {
                    return floor;
                }
                let window = (self.end_at - self.start_at).num_milliseconds().max(1) as u128;
                let elapsed = (now - self.start_at).num_milliseconds().max(0) as u128;
                let span = (self.start_price - floor) as u128;
                self.start_price - ((span * elapsed) / window) as Amount
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dutch(start: Amount, floor: Amount, minutes: i64) -> (Auction, DateTime<Utc>) {
        let t0 = Utc::now();
        let auction = Auction {
            id: AuctionId::new(AggregateId::new()),
            kind: AuctionKind::Dutch,
            start_price: start,
            floor_price: Some(floor),
            start_at: t0,
            end_at: t0 + Duration::minutes(minutes),
            status: AuctionStatus::Active,
        };
        (auction, t0)
    }

    #[test]
    fn dutch_price_decays_linearly_to_the_floor() {
        let (auction, t0) = dutch(1_000, 200, 10);

        assert_eq!(auction.current_price(t0), 1_000);
        assert_eq!(auction.current_price(t0 + Duration::minutes(5)), 600);
        assert_eq!(auction.current_price(t0 + Duration::minutes(10)), 200);
        // Clamped past the end.
        assert_eq!(auction.current_price(t0 + Duration::minutes(30)), 200);
    }

    #[test]
    fn dutch_price_never_leaves_the_floor_start_band() {
        let (auction, t0) = dutch(1_000, 200, 10);
        for m in 0..=12 {
            let p = auction.current_price(t0 + Duration::minutes(m));
            assert!((200..=1_000).contains(&p));
        }
    }

    #[test]
    fn due_and_running_windows() {
        let (auction, t0) = dutch(1_000, 200, 10);
        assert!(auction.is_running(t0 + Duration::minutes(1)));
        assert!(!auction.is_due(t0 + Duration::minutes(9)));
        assert!(auction.is_due(t0 + Duration::minutes(10)));

        let mut closed = auction;
        closed.status = AuctionStatus::Closed;
        assert!(!closed.is_running(t0 + Duration::minutes(1)));
        assert!(!closed.is_due(t0 + Duration::minutes(11)));
    }
}
