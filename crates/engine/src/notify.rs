//! Outbound notifications.
//!
//! Published on the bus only after the underlying events are committed, so a
//! consumer never observes a notification for state that did not happen.
//! Delivery is at-least-once; consumers deduplicate on the ids they carry.

use serde::{Deserialize, Serialize};

use credmart_bidding::BidId;
use credmart_core::{Amount, UserId};
use credmart_registry::{TitleId, TitleStatus};
use credmart_settlement::SettlementId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketNotification {
    TitleStatusChanged {
        title_id: TitleId,
        status: TitleStatus,
    },
    BidPlaced {
        title_id: TitleId,
        bid_id: BidId,
        buyer_id: UserId,
        price: Amount,
    },
    BidAccepted {
        title_id: TitleId,
        bid_id: BidId,
        buyer_id: UserId,
        price: Amount,
    },
    AuctionClosed {
        title_id: TitleId,
        winner: Option<BidId>,
    },
    SettlementCompleted {
        settlement_id: SettlementId,
        title_id: TitleId,
        buyer_id: UserId,
        seller_id: UserId,
        price: Amount,
    },
    SettlementFailed {
        settlement_id: SettlementId,
        title_id: TitleId,
        reason: String,
    },
}
