use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credmart_core::{Aggregate, AggregateId, AggregateRoot, Amount, MarketError, MarketResult, UserId};
use credmart_events::Event;
use credmart_registry::{TitleId, TitleSnapshot, TitleStatus};

use crate::auction::{Auction, AuctionId, AuctionKind, AuctionStatus};

/// Bid identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidId(pub AggregateId);

impl BidId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BidId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidKind {
    Direct,
    Auction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

/// A buyer's priced offer against a listed title. Never deleted; withdrawal
/// and rejection are terminal statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub buyer_id: UserId,
    pub price: Amount,
    pub kind: BidKind,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: BidBook — all bids and the open auction for one title.
///
/// Keyed by the title id, so "read all pending bids, accept one, reject the
/// rest" is one decision over one stream, committed with one optimistic
/// append. A second concurrent acceptance either loses the version race
/// (`StaleVersion`) or observes the accepted bid and fails with
/// `AlreadyNegotiating`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidBook {
    title_id: TitleId,
    bids: Vec<Bid>,
    auction: Option<Auction>,
    accepted: Option<BidId>,
    version: u64,
}

impl BidBook {
    /// Empty book for rehydration.
    pub fn empty(title_id: TitleId) -> Self {
        Self {
            title_id,
            bids: Vec::new(),
            auction: None,
            accepted: None,
            version: 0,
        }
    }

    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn bid(&self, id: BidId) -> Option<&Bid> {
        self.bids.iter().find(|b| b.id == id)
    }

    pub fn auction(&self) -> Option<&Auction> {
        self.auction.as_ref()
    }

    pub fn open_auction(&self) -> Option<&Auction> {
        self.auction.as_ref().filter(|a| a.is_open())
    }

    pub fn accepted_bid(&self) -> Option<&Bid> {
        self.accepted.and_then(|id| self.bid(id))
    }

    pub fn pending_bids(&self) -> impl Iterator<Item = &Bid> {
        self.bids.iter().filter(|b| b.status == BidStatus::Pending)
    }

    pub fn best_pending_price(&self) -> Option<Amount> {
        self.pending_bids().map(|b| b.price).max()
    }
}

impl AggregateRoot for BidBook {
    type Id = TitleId;

    fn id(&self) -> &Self::Id {
        &self.title_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceBid. Carries a `TitleSnapshot` read just before dispatch;
/// the optimistic append on the book stream arbitrates races.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceBid {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub buyer_id: UserId,
    pub price: Amount,
    pub kind: BidKind,
    pub title: TitleSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptBid (owner-only; atomically rejects every other pending bid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptBid {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub requested_by: UserId,
    pub title: TitleSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectBid (owner-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectBid {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub requested_by: UserId,
    pub title: TitleSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawBid (buyer-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawBid {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenAuction (owner-only; at most one open auction per title).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAuction {
    pub title_id: TitleId,
    pub auction_id: AuctionId,
    pub kind: AuctionKind,
    pub start_price: Amount,
    pub floor_price: Option<Amount>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub requested_by: UserId,
    pub title: TitleSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelAuction (owner-only, before any acceptance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAuction {
    pub title_id: TitleId,
    pub requested_by: UserId,
    pub title: TitleSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseIfDue — idempotent, safe to call from any scheduler at any
/// time; emits nothing unless the auction window has actually passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseIfDue {
    pub title_id: TitleId,
    pub now: DateTime<Utc>,
}

/// Command: ClearAcceptance (engine-driven, on a cancelled negotiation).
/// Rejects the accepted bid so the book can trade again; a no-op when
/// nothing is accepted, so the engine may replay it freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearAcceptance {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidCommand {
    PlaceBid(PlaceBid),
    AcceptBid(AcceptBid),
    RejectBid(RejectBid),
    WithdrawBid(WithdrawBid),
    OpenAuction(OpenAuction),
    CancelAuction(CancelAuction),
    CloseIfDue(CloseIfDue),
    ClearAcceptance(ClearAcceptance),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidPlaced {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub buyer_id: UserId,
    pub price: Amount,
    pub kind: BidKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidAccepted {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub buyer_id: UserId,
    pub price: Amount,
    /// Every other pending bid, rejected in the same atomic operation.
    pub rejected_bids: Vec<BidId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRejected {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidWithdrawn {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionOpened {
    pub title_id: TitleId,
    pub auction_id: AuctionId,
    pub kind: AuctionKind,
    pub start_price: Amount,
    pub floor_price: Option<Amount>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionClosed {
    pub title_id: TitleId,
    pub auction_id: AuctionId,
    pub winner: Option<BidId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionCancelled {
    pub title_id: TitleId,
    pub auction_id: AuctionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCleared {
    pub title_id: TitleId,
    pub bid_id: BidId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidEvent {
    BidPlaced(BidPlaced),
    BidAccepted(BidAccepted),
    BidRejected(BidRejected),
    BidWithdrawn(BidWithdrawn),
    AuctionOpened(AuctionOpened),
    AuctionClosed(AuctionClosed),
    AuctionCancelled(AuctionCancelled),
    AcceptanceCleared(AcceptanceCleared),
}

impl Event for BidEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BidEvent::BidPlaced(_) => "bidding.bid.placed",
            BidEvent::BidAccepted(_) => "bidding.bid.accepted",
            BidEvent::BidRejected(_) => "bidding.bid.rejected",
            BidEvent::BidWithdrawn(_) => "bidding.bid.withdrawn",
            BidEvent::AuctionOpened(_) => "bidding.auction.opened",
            BidEvent::AuctionClosed(_) => "bidding.auction.closed",
            BidEvent::AuctionCancelled(_) => "bidding.auction.cancelled",
            BidEvent::AcceptanceCleared(_) => "bidding.acceptance.cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BidEvent::BidPlaced(e) => e.occurred_at,
            BidEvent::BidAccepted(e) => e.occurred_at,
            BidEvent::BidRejected(e) => e.occurred_at,
            BidEvent::BidWithdrawn(e) => e.occurred_at,
            BidEvent::AuctionOpened(e) => e.occurred_at,
            BidEvent::AuctionClosed(e) => e.occurred_at,
            BidEvent::AuctionCancelled(e) => e.occurred_at,
            BidEvent::AcceptanceCleared(e) => e.occurred_at,
        }
    }
}

impl Aggregate for BidBook {
    type Command = BidCommand;
    type Event = BidEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BidEvent::BidPlaced(e) => {
                self.bids.push(Bid {
                    id: e.bid_id,
                    buyer_id: e.buyer_id,
                    price: e.price,
                    kind: e.kind,
                    status: BidStatus::Pending,
                    created_at: e.occurred_at,
                });
            }
            BidEvent::BidAccepted(e) => {
                for bid in &mut self.bids {
                    if bid.id == e.bid_id {
                        bid.status = BidStatus::Accepted;
                    } else if e.rejected_bids.contains(&bid.id) {
                        bid.status = BidStatus::Rejected;
                    }
                }
                self.accepted = Some(e.bid_id);
            }
            BidEvent::BidRejected(e) => {
                self.set_status(e.bid_id, BidStatus::Rejected);
            }
            BidEvent::BidWithdrawn(e) => {
                self.set_status(e.bid_id, BidStatus::Withdrawn);
            }
            BidEvent::AuctionOpened(e) => {
                let status = if e.occurred_at < e.start_at {
                    AuctionStatus::Scheduled
                } else {
                    AuctionStatus::Active
                };
                self.auction = Some(Auction {
                    id: e.auction_id,
                    kind: e.kind,
                    start_price: e.start_price,
                    floor_price: e.floor_price,
                    start_at: e.start_at,
                    end_at: e.end_at,
                    status,
                });
            }
            BidEvent::AuctionClosed(_) => {
                if let Some(a) = &mut self.auction {
                    a.status = AuctionStatus::Closed;
                }
            }
            BidEvent::AuctionCancelled(_) => {
                if let Some(a) = &mut self.auction {
                    a.status = AuctionStatus::Cancelled;
                }
            }
            BidEvent::AcceptanceCleared(e) => {
                self.set_status(e.bid_id, BidStatus::Rejected);
                self.accepted = None;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>> {
        match command {
            BidCommand::PlaceBid(cmd) => self.handle_place(cmd),
            BidCommand::AcceptBid(cmd) => self.handle_accept(cmd),
            BidCommand::RejectBid(cmd) => self.handle_reject(cmd),
            BidCommand::WithdrawBid(cmd) => self.handle_withdraw(cmd),
            BidCommand::OpenAuction(cmd) => self.handle_open_auction(cmd),
            BidCommand::CancelAuction(cmd) => self.handle_cancel_auction(cmd),
            BidCommand::CloseIfDue(cmd) => self.handle_close_if_due(cmd),
            BidCommand::ClearAcceptance(cmd) => self.handle_clear(cmd),
        }
    }
}

impl BidBook {
    fn ensure_title(&self, title_id: TitleId) -> MarketResult<()> {
        if self.title_id != title_id {
            return Err(MarketError::internal("bid book title_id mismatch"));
        }
        Ok(())
    }

    fn set_status(&mut self, bid_id: BidId, status: BidStatus) {
        if let Some(bid) = self.bids.iter_mut().find(|b| b.id == bid_id) {
            bid.status = status;
        }
    }

    fn pending_bid(&self, bid_id: BidId) -> MarketResult<&Bid> {
        let bid = self.bid(bid_id).ok_or(MarketError::NotFound)?;
        if bid.status != BidStatus::Pending {
            return Err(MarketError::validation(format!(
                "bid {bid_id} is not pending"
            )));
        }
        Ok(bid)
    }

    fn handle_place(&self, cmd: &PlaceBid) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;

        if cmd.price == 0 {
            return Err(MarketError::validation("bid price must be positive"));
        }
        if cmd.buyer_id == cmd.title.owner_id {
            return Err(MarketError::SelfBid);
        }
        if self.accepted.is_some() {
            return Err(MarketError::AlreadyNegotiating);
        }

        // Direct bids only against an open listing; auction bids may also
        // arrive while the title shows InNegotiation (late auction traffic).
        let listed = match cmd.kind {
            BidKind::Direct => cmd.title.status == TitleStatus::ListedForSale,
            BidKind::Auction => cmd.title.status.accepts_bids(),
        };
        if !listed {
            return Err(MarketError::TitleNotListed);
        }

        let placed = BidEvent::BidPlaced(BidPlaced {
            title_id: cmd.title_id,
            bid_id: cmd.bid_id,
            buyer_id: cmd.buyer_id,
            price: cmd.price,
            kind: cmd.kind,
            occurred_at: cmd.occurred_at,
        });

        if cmd.kind == BidKind::Direct {
            return Ok(vec![placed]);
        }

        let auction = self
            .open_auction()
            .filter(|a| a.is_running(cmd.occurred_at))
            .ok_or_else(|| MarketError::validation("no running auction for this title"))?;

        match auction.kind {
            AuctionKind::Traditional => {
                // Must strictly beat the best pending price; the opening bid
                // must at least meet the start price.
                let bar = self.best_pending_price();
                let ok = match bar {
                    Some(best) => cmd.price > best,
                    None => cmd.price >= auction.start_price,
                };
                if !ok {
                    return Err(MarketError::price_too_low(format!(
                        "bid {} does not beat {}",
                        cmd.price,
                        bar.unwrap_or(auction.start_price)
                    )));
                }
                Ok(vec![placed])
            }
            AuctionKind::Dutch => {
                let asking = auction.current_price(cmd.occurred_at);
                if cmd.price < asking {
                    return Err(MarketError::price_too_low(format!(
                        "bid {} below current dutch price {asking}",
                        cmd.price
                    )));
                }
                // First qualifying bid wins immediately: place, accept, and
                // close the auction in one atomic batch.
                let rejected: Vec<BidId> = self
                    .pending_bids()
                    .map(|b| b.id)
                    .filter(|id| *id != cmd.bid_id)
                    .collect();
                Ok(vec![
                    placed,
                    BidEvent::BidAccepted(BidAccepted {
                        title_id: cmd.title_id,
                        bid_id: cmd.bid_id,
                        buyer_id: cmd.buyer_id,
                        price: cmd.price,
                        rejected_bids: rejected,
                        occurred_at: cmd.occurred_at,
                    }),
                    BidEvent::AuctionClosed(AuctionClosed {
                        title_id: cmd.title_id,
                        auction_id: auction.id,
                        winner: Some(cmd.bid_id),
                        occurred_at: cmd.occurred_at,
                    }),
                ])
            }
        }
    }

    fn handle_accept(&self, cmd: &AcceptBid) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;

        if cmd.requested_by != cmd.title.owner_id {
            return Err(MarketError::Unauthorized);
        }
        match self.accepted {
            // Re-accepting the accepted bid records nothing new; the engine
            // uses the empty commit to resume a stalled settlement.
            Some(id) if id == cmd.bid_id => return Ok(vec![]),
            Some(_) => return Err(MarketError::AlreadyNegotiating),
            None => {}
        }
        if cmd.title.status != TitleStatus::ListedForSale {
            return Err(MarketError::TitleNotListed);
        }

        let bid = self.pending_bid(cmd.bid_id)?;
        let rejected: Vec<BidId> = self
            .pending_bids()
            .map(|b| b.id)
            .filter(|id| *id != cmd.bid_id)
            .collect();

        let mut events = vec![BidEvent::BidAccepted(BidAccepted {
            title_id: cmd.title_id,
            bid_id: cmd.bid_id,
            buyer_id: bid.buyer_id,
            price: bid.price,
            rejected_bids: rejected,
            occurred_at: cmd.occurred_at,
        })];

        // Accepting ends any open auction on the spot.
        if let Some(auction) = self.open_auction() {
            events.push(BidEvent::AuctionClosed(AuctionClosed {
                title_id: cmd.title_id,
                auction_id: auction.id,
                winner: Some(cmd.bid_id),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_reject(&self, cmd: &RejectBid) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;
        if cmd.requested_by != cmd.title.owner_id {
            return Err(MarketError::Unauthorized);
        }
        self.pending_bid(cmd.bid_id)?;
        Ok(vec![BidEvent::BidRejected(BidRejected {
            title_id: cmd.title_id,
            bid_id: cmd.bid_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawBid) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;
        let bid = self.pending_bid(cmd.bid_id)?;
        if bid.buyer_id != cmd.requested_by {
            return Err(MarketError::Unauthorized);
        }
        Ok(vec![BidEvent::BidWithdrawn(BidWithdrawn {
            title_id: cmd.title_id,
            bid_id: cmd.bid_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_open_auction(&self, cmd: &OpenAuction) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;
        if cmd.requested_by != cmd.title.owner_id {
            return Err(MarketError::Unauthorized);
        }
        if cmd.title.status != TitleStatus::ListedForSale {
            return Err(MarketError::TitleNotListed);
        }
        if self.open_auction().is_some() {
            return Err(MarketError::validation(
                "title already has an open auction",
            ));
        }
        if cmd.start_price == 0 {
            return Err(MarketError::validation("start price must be positive"));
        }
        if cmd.end_at <= cmd.start_at {
            return Err(MarketError::validation("auction must end after it starts"));
        }
        match (cmd.kind, cmd.floor_price) {
            (AuctionKind::Dutch, Some(floor)) if floor <= cmd.start_price => {}
            (AuctionKind::Dutch, _) => {
                return Err(MarketError::validation(
                    "dutch auction requires a floor price at or below the start price",
                ));
            }
            (AuctionKind::Traditional, None) => {}
            (AuctionKind::Traditional, Some(_)) => {
                return Err(MarketError::validation(
                    "traditional auction takes no floor price",
                ));
            }
        }

        Ok(vec![BidEvent::AuctionOpened(AuctionOpened {
            title_id: cmd.title_id,
            auction_id: cmd.auction_id,
            kind: cmd.kind,
            start_price: cmd.start_price,
            floor_price: cmd.floor_price,
            start_at: cmd.start_at,
            end_at: cmd.end_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel_auction(&self, cmd: &CancelAuction) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;
        if cmd.requested_by != cmd.title.owner_id {
            return Err(MarketError::Unauthorized);
        }
        if self.accepted.is_some() {
            return Err(MarketError::AlreadyNegotiating);
        }
        let auction = self
            .open_auction()
            .ok_or_else(|| MarketError::validation("no open auction to cancel"))?;
        Ok(vec![BidEvent::AuctionCancelled(AuctionCancelled {
            title_id: cmd.title_id,
            auction_id: auction.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearAcceptance) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;
        let Some(bid_id) = self.accepted else {
            return Ok(vec![]);
        };
        Ok(vec![BidEvent::AcceptanceCleared(AcceptanceCleared {
            title_id: cmd.title_id,
            bid_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close_if_due(&self, cmd: &CloseIfDue) -> MarketResult<Vec<BidEvent>> {
        self.ensure_title(cmd.title_id)?;

        // Idempotent: nothing due, nothing emitted.
        let Some(auction) = self.open_auction() else {
            return Ok(vec![]);
        };
        if !auction.is_due(cmd.now) || self.accepted.is_some() {
            return Ok(vec![]);
        }

        // A traditional auction awards the best pending bid at close. A dutch
        // auction reaching its end never had a qualifying bid (one would have
        // closed it on the spot), so it closes empty.
        let winner = match auction.kind {
            AuctionKind::Traditional => self
                .pending_bids()
                .filter(|b| b.kind == BidKind::Auction)
                .max_by_key(|b| (b.price, std::cmp::Reverse(b.created_at)))
                .cloned(),
            AuctionKind::Dutch => None,
        };

        let mut events = Vec::new();
        if let Some(win) = &winner {
            let rejected: Vec<BidId> = self
                .pending_bids()
                .map(|b| b.id)
                .filter(|id| *id != win.id)
                .collect();
            events.push(BidEvent::BidAccepted(BidAccepted {
                title_id: cmd.title_id,
                bid_id: win.id,
                buyer_id: win.buyer_id,
                price: win.price,
                rejected_bids: rejected,
                occurred_at: cmd.now,
            }));
        }
        events.push(BidEvent::AuctionClosed(AuctionClosed {
            title_id: cmd.title_id,
            auction_id: auction.id,
            winner: winner.map(|b| b.id),
            occurred_at: cmd.now,
        }));

        Ok(events)
    }
}
