//! Marketplace facade.
//!
//! The one entry point callers use. Each operation loads what it needs,
//! dispatches commands to the owning aggregates, and on acceptance drives the
//! whole negotiation-to-settlement pipeline. Cross-aggregate sequences are
//! not transactional; every step is individually idempotent, so a crashed
//! pipeline re-runs from the top without double effects.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use credmart_bidding::book::{
    AcceptBid, BidAccepted, CancelAuction, ClearAcceptance, CloseIfDue, OpenAuction, PlaceBid,
    RejectBid, WithdrawBid,
};
use credmart_bidding::{AuctionId, AuctionKind, BidBook, BidCommand, BidEvent, BidId, BidKind};
use credmart_core::{
    AggregateId, Amount, MarketError, MarketResult, UserId,
};
use credmart_events::{EventBus, EventEnvelope};
use credmart_registry::title::{
    BeginSettlement, CancelNegotiation, CancelTitle, EnterNegotiation, ExpireTitle,
    FinalizeSettlement, ListTitle, MarkNegotiated, RegisterTitle, RejectTitle, RequestTokenization,
    ReviseCurrentValue, RevertSettlement, SubmitForValidation, TokenizeTitle, UnlistTitle,
    ValidateTitle,
};
use credmart_registry::{
    CreditTitle, TitleCommand, TitleEvent, TitleId, TitleSnapshot, TitleStatus,
};
use credmart_settlement::settlement::{MarkCompleted, MarkFailed, OpenSettlement};
use credmart_settlement::{Settlement, SettlementCommand, SettlementId, SettlementStatus};
use credmart_wallet::account::{Deposit, Withdraw};
use credmart_wallet::{WalletAccount, WalletBalance, WalletCommand, WalletId, WalletTransaction};

use crate::allocator::{self, SettlementOutcome, WALLET_AGGREGATE_TYPE};
use crate::config::{DutchClosePolicy, MarketplaceConfig};
use crate::dispatcher::CommandDispatcher;
use crate::notify::MarketNotification;
use crate::store::{EventStore, StoredEvent};

const TITLE_AGGREGATE_TYPE: &str = "registry.credit_title";
const BOOK_AGGREGATE_TYPE: &str = "bidding.bid_book";
const SETTLEMENT_AGGREGATE_TYPE: &str = "settlement.settlement";

/// Namespace for deriving the bid book stream id from a title id. The book
/// shares the title's identity but lives in its own stream.
const BOOK_STREAM_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_bd2a_9e4b_4c82_a1d3_58e0_72f9_c415);

fn title_stream(title_id: TitleId) -> AggregateId {
    title_id.0
}

fn book_stream(title_id: TitleId) -> AggregateId {
    AggregateId::from_uuid(Uuid::new_v5(
        &BOOK_STREAM_NAMESPACE,
        title_id.0.as_uuid().as_bytes(),
    ))
}

/// External token reference minted for a tokenized title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReference {
    pub value: String,
}

/// What the external tokenizer sees of a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleMetadata {
    pub title_id: TitleId,
    pub category: String,
    pub subtype: String,
    pub nominal_value: Amount,
    pub current_value: Amount,
}

/// Mints token references for titles entering `Tokenized`.
///
/// The registry stores whatever the provider returns, verbatim; it never
/// interprets the reference.
pub trait TokenReferenceProvider: Send + Sync {
    fn mint(&self, title: &TitleMetadata) -> MarketResult<TokenReference>;
}

/// The marketplace engine.
///
/// Generic over the event store, the committed-event bus and the
/// notification bus, so tests run fully in memory and production swaps in
/// durable backends without touching this code.
#[derive(Debug)]
pub struct Marketplace<S, B, N> {
    dispatcher: CommandDispatcher<S, B>,
    notifications: N,
    config: MarketplaceConfig,
}

impl<S, B, N> Marketplace<S, B, N>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    N: EventBus<MarketNotification>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, notifications: N, config: MarketplaceConfig) -> Self {
        Self {
            dispatcher,
            notifications,
            config,
        }
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    // ---- registry operations ----

    pub fn register_title(
        &self,
        owner_id: UserId,
        issuer_id: UserId,
        category: impl Into<String>,
        subtype: impl Into<String>,
        nominal_value: Amount,
    ) -> MarketResult<TitleId> {
        let title_id = TitleId::new(AggregateId::new());
        self.dispatch_title(
            title_id,
            TitleCommand::RegisterTitle(RegisterTitle {
                title_id,
                owner_id,
                issuer_id,
                category: category.into(),
                subtype: subtype.into(),
                nominal_value,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%title_id, %owner_id, "title registered");
        Ok(title_id)
    }

    pub fn submit_for_validation(&self, title_id: TitleId) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::SubmitForValidation(SubmitForValidation {
                title_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn validate_title(&self, title_id: TitleId) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::ValidateTitle(ValidateTitle {
                title_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn reject_title(&self, title_id: TitleId, reason: impl Into<String>) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::RejectTitle(RejectTitle {
                title_id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn request_tokenization(&self, title_id: TitleId) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::RequestTokenization(RequestTokenization {
                title_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Mint a token reference and move the title to `Tokenized`.
    pub fn tokenize_title(
        &self,
        title_id: TitleId,
        provider: &dyn TokenReferenceProvider,
    ) -> MarketResult<TokenReference> {
        let title = self.title(title_id)?;
        let token = provider.mint(&TitleMetadata {
            title_id,
            category: title.category().to_string(),
            subtype: title.subtype().to_string(),
            nominal_value: title.nominal_value(),
            current_value: title.current_value(),
        })?;
        self.dispatch_title(
            title_id,
            TitleCommand::TokenizeTitle(TokenizeTitle {
                title_id,
                token_reference: token.value.clone(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%title_id, "title tokenized");
        Ok(token)
    }

    pub fn list_title(
        &self,
        title_id: TitleId,
        requested_by: UserId,
        price: Amount,
        listed_until: Option<DateTime<Utc>>,
    ) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::ListTitle(ListTitle {
                title_id,
                requested_by,
                price,
                listed_until,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%title_id, price, "title listed");
        Ok(())
    }

    pub fn unlist_title(&self, title_id: TitleId, requested_by: UserId) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::UnlistTitle(UnlistTitle {
                title_id,
                requested_by,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn cancel_title(&self, title_id: TitleId, requested_by: UserId) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::CancelTitle(CancelTitle {
                title_id,
                requested_by,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// One sweep of the time-driven edges for a title: close its auction if
    /// the window has passed, then retire the listing if its deadline has.
    /// Idempotent; an external scheduler may call this repeatedly at any
    /// cadence without harm.
    pub fn expire_if_due(&self, title_id: TitleId, now: DateTime<Utc>) -> MarketResult<()> {
        self.close_auction_if_due(title_id, now)?;
        // A running auction governs its own window; the listing deadline
        // applies only once no auction is open on the title.
        if self.bid_book(title_id)?.open_auction().is_some() {
            return Ok(());
        }
        self.dispatch_title(
            title_id,
            TitleCommand::ExpireTitle(ExpireTitle {
                title_id,
                occurred_at: now,
            }),
        )?;
        Ok(())
    }

    pub fn revise_current_value(&self, title_id: TitleId, value: Amount) -> MarketResult<()> {
        self.dispatch_title(
            title_id,
            TitleCommand::ReviseCurrentValue(ReviseCurrentValue {
                title_id,
                value,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Current state of a title, rebuilt from its stream.
    pub fn title(&self, title_id: TitleId) -> MarketResult<CreditTitle> {
        let title: CreditTitle = self
            .dispatcher
            .load(title_stream(title_id), |_| CreditTitle::empty(title_id))?;
        if !title.exists() {
            return Err(MarketError::NotFound);
        }
        Ok(title)
    }

    fn title_snapshot(&self, title_id: TitleId) -> MarketResult<TitleSnapshot> {
        self.title(title_id)?.snapshot()
    }

    // ---- wallet operations ----

    pub fn deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        reference: Option<String>,
    ) -> MarketResult<()> {
        self.dispatch_wallet(
            user_id,
            WalletCommand::Deposit(Deposit {
                user_id,
                amount,
                reference,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn withdraw(&self, user_id: UserId, amount: Amount) -> MarketResult<()> {
        self.dispatch_wallet(
            user_id,
            WalletCommand::Withdraw(Withdraw {
                user_id,
                amount,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Balance view; a wallet that has never moved money reads as zero.
    pub fn wallet_balance(&self, user_id: UserId) -> MarketResult<WalletBalance> {
        Ok(self.wallet(user_id)?.balance_view())
    }

    pub fn wallet_history(&self, user_id: UserId) -> MarketResult<Vec<WalletTransaction>> {
        Ok(self.wallet(user_id)?.transactions().to_vec())
    }

    fn wallet(&self, user_id: UserId) -> MarketResult<WalletAccount> {
        self.dispatcher
            .load(allocator::wallet_stream(user_id), |_| {
                WalletAccount::empty(WalletId::new(user_id))
            })
    }

    // ---- bidding operations ----

    /// Place a bid. A dutch-auction bid at or above the current price is
    /// accepted on the spot, which triggers the full settlement pipeline
    /// before this returns.
    pub fn place_bid(
        &self,
        title_id: TitleId,
        buyer_id: UserId,
        price: Amount,
        kind: BidKind,
    ) -> MarketResult<BidId> {
        let bid_id = BidId::new(AggregateId::new());
        let committed = self.retrying(|| {
            let snapshot = self.title_snapshot(title_id)?;
            self.dispatcher.dispatch::<BidBook>(
                book_stream(title_id),
                BOOK_AGGREGATE_TYPE,
                BidCommand::PlaceBid(PlaceBid {
                    title_id,
                    bid_id,
                    buyer_id,
                    price,
                    kind,
                    title: snapshot,
                    occurred_at: Utc::now(),
                }),
                |_| BidBook::empty(title_id),
            )
        })?;
        tracing::info!(%title_id, %bid_id, price, "bid placed");
        self.notify(MarketNotification::BidPlaced {
            title_id,
            bid_id,
            buyer_id,
            price,
        });

        if let Some(accepted) = find_accepted(&committed)? {
            self.negotiate_and_settle(title_id, &accepted)?;
        }
        Ok(bid_id)
    }

    /// Accept one pending bid, rejecting all others atomically, then run the
    /// negotiation-to-settlement pipeline to the end.
    ///
    /// Accepting a bid the book already holds as accepted resumes a stalled
    /// pipeline instead of erroring: a settlement that failed (or crashed
    /// mid-run) is retried from wherever it stopped, and a trade that
    /// already settled returns its settlement id.
    pub fn accept_bid(
        &self,
        title_id: TitleId,
        bid_id: BidId,
        requested_by: UserId,
    ) -> MarketResult<SettlementId> {
        let committed = self.retrying(|| {
            let snapshot = self.title_snapshot(title_id)?;
            self.dispatcher.dispatch::<BidBook>(
                book_stream(title_id),
                BOOK_AGGREGATE_TYPE,
                BidCommand::AcceptBid(AcceptBid {
                    title_id,
                    bid_id,
                    requested_by,
                    title: snapshot,
                    occurred_at: Utc::now(),
                }),
                |_| BidBook::empty(title_id),
            )
        })?;

        let accepted = match find_accepted(&committed)? {
            Some(accepted) => accepted,
            None => {
                // Empty commit: the book already held this acceptance.
                // Rebuild the accepted trade from the book and resume.
                let book = self.bid_book(title_id)?;
                let bid = book
                    .accepted_bid()
                    .filter(|bid| bid.id == bid_id)
                    .ok_or_else(|| {
                        MarketError::internal("acceptance committed no BidAccepted event")
                    })?;
                let title = self.title(title_id)?;
                if title.status() == TitleStatus::Settled {
                    if let Some(settlement) = title.settlement() {
                        return Ok(SettlementId::new(settlement));
                    }
                }
                BidAccepted {
                    title_id,
                    bid_id: bid.id,
                    buyer_id: bid.buyer_id,
                    price: bid.price,
                    rejected_bids: Vec::new(),
                    occurred_at: Utc::now(),
                }
            }
        };
        self.negotiate_and_settle(title_id, &accepted)
    }

    pub fn reject_bid(
        &self,
        title_id: TitleId,
        bid_id: BidId,
        requested_by: UserId,
    ) -> MarketResult<()> {
        self.retrying(|| {
            let snapshot = self.title_snapshot(title_id)?;
            self.dispatcher.dispatch::<BidBook>(
                book_stream(title_id),
                BOOK_AGGREGATE_TYPE,
                BidCommand::RejectBid(RejectBid {
                    title_id,
                    bid_id,
                    requested_by,
                    title: snapshot,
                    occurred_at: Utc::now(),
                }),
                |_| BidBook::empty(title_id),
            )
        })?;
        Ok(())
    }

    pub fn withdraw_bid(
        &self,
        title_id: TitleId,
        bid_id: BidId,
        requested_by: UserId,
    ) -> MarketResult<()> {
        self.dispatcher.dispatch_with_retry::<BidBook>(
            book_stream(title_id),
            BOOK_AGGREGATE_TYPE,
            BidCommand::WithdrawBid(WithdrawBid {
                title_id,
                bid_id,
                requested_by,
                occurred_at: Utc::now(),
            }),
            |_| BidBook::empty(title_id),
            self.config.max_retries,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_auction(
        &self,
        title_id: TitleId,
        requested_by: UserId,
        kind: AuctionKind,
        start_price: Amount,
        floor_price: Option<Amount>,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> MarketResult<AuctionId> {
        let auction_id = AuctionId::new(AggregateId::new());
        self.retrying(|| {
            let snapshot = self.title_snapshot(title_id)?;
            self.dispatcher.dispatch::<BidBook>(
                book_stream(title_id),
                BOOK_AGGREGATE_TYPE,
                BidCommand::OpenAuction(OpenAuction {
                    title_id,
                    auction_id,
                    kind,
                    start_price,
                    floor_price,
                    start_at,
                    end_at,
                    requested_by,
                    title: snapshot,
                    occurred_at: Utc::now(),
                }),
                |_| BidBook::empty(title_id),
            )
        })?;
        tracing::info!(%title_id, %auction_id, ?kind, "auction opened");
        Ok(auction_id)
    }

    pub fn cancel_auction(&self, title_id: TitleId, requested_by: UserId) -> MarketResult<()> {
        self.retrying(|| {
            let snapshot = self.title_snapshot(title_id)?;
            self.dispatcher.dispatch::<BidBook>(
                book_stream(title_id),
                BOOK_AGGREGATE_TYPE,
                BidCommand::CancelAuction(CancelAuction {
                    title_id,
                    requested_by,
                    title: snapshot,
                    occurred_at: Utc::now(),
                }),
                |_| BidBook::empty(title_id),
            )
        })?;
        Ok(())
    }

    /// Close the title's auction if its window has passed. Idempotent; safe
    /// to call from any scheduler at any cadence. A traditional close with a
    /// winner runs the settlement pipeline before returning.
    pub fn close_auction_if_due(
        &self,
        title_id: TitleId,
        now: DateTime<Utc>,
    ) -> MarketResult<()> {
        let committed = self.dispatcher.dispatch_with_retry::<BidBook>(
            book_stream(title_id),
            BOOK_AGGREGATE_TYPE,
            BidCommand::CloseIfDue(CloseIfDue { title_id, now }),
            |_| BidBook::empty(title_id),
            self.config.max_retries,
        )?;
        if committed.is_empty() {
            return Ok(());
        }

        let accepted = find_accepted(&committed)?;
        let mut winner = None;
        for stored in &committed {
            if let BidEvent::AuctionClosed(closed) = decode_bid_event(stored)? {
                winner = closed.winner;
            }
        }
        self.notify(MarketNotification::AuctionClosed { title_id, winner });

        match accepted {
            Some(accepted) => {
                self.negotiate_and_settle(title_id, &accepted)?;
            }
            None => {
                // Dutch auction ran out with no qualifying bid.
                if self.config.dutch_close_policy == DutchClosePolicy::Delist {
                    let snapshot = self.title_snapshot(title_id)?;
                    self.unlist_title(title_id, snapshot.owner_id)?;
                }
            }
        }
        Ok(())
    }

    /// Current bid book for a title, rebuilt from its stream.
    pub fn bid_book(&self, title_id: TitleId) -> MarketResult<BidBook> {
        self.dispatcher
            .load(book_stream(title_id), |_| BidBook::empty(title_id))
    }

    // ---- settlement pipeline ----

    /// Drive an accepted bid through negotiation, settlement and the wallet
    /// ledger. Every step is idempotent under replay; a failure in the money
    /// movement rolls the title back to `InNegotiation` and surfaces
    /// `SettlementFailed`.
    fn negotiate_and_settle(
        &self,
        title_id: TitleId,
        accepted: &BidAccepted,
    ) -> MarketResult<SettlementId> {
        let seller_id = self.title_snapshot(title_id)?.owner_id;

        // 1) Registry: the title leaves the open listing.
        self.dispatch_title(
            title_id,
            TitleCommand::EnterNegotiation(EnterNegotiation {
                title_id,
                bid_id: accepted.bid_id.0,
                occurred_at: Utc::now(),
            }),
        )?;
        self.notify(MarketNotification::BidAccepted {
            title_id,
            bid_id: accepted.bid_id,
            buyer_id: accepted.buyer_id,
            price: accepted.price,
        });

        // 2) Open the settlement; this freezes the allocation split. A
        //    resumed run reuses the settlement already tied to the title so
        //    the money movement keeps its idempotency keys.
        let settlement_id = match self.title(title_id)?.settlement() {
            Some(id) => SettlementId::new(id),
            None => SettlementId::new(AggregateId::new()),
        };
        self.dispatch_settlement(
            settlement_id,
            SettlementCommand::OpenSettlement(OpenSettlement {
                settlement_id,
                title_id,
                bid_id: accepted.bid_id.0,
                buyer_id: accepted.buyer_id,
                seller_id,
                platform_account: self.config.platform_account,
                price: accepted.price,
                fee_rate: self.config.fee_rate,
                occurred_at: Utc::now(),
            }),
        )?;

        // 3) Registry: allocations exist, then ledger execution starts.
        self.dispatch_title(
            title_id,
            TitleCommand::MarkNegotiated(MarkNegotiated {
                title_id,
                settlement_id: settlement_id.0,
                occurred_at: Utc::now(),
            }),
        )?;
        self.dispatch_title(
            title_id,
            TitleCommand::BeginSettlement(BeginSettlement {
                title_id,
                settlement_id: settlement_id.0,
                occurred_at: Utc::now(),
            }),
        )?;

        // 4) Move the money. A settlement that already ran to completion
        //    skips straight to the close-out.
        let settlement = self.settlement(settlement_id)?;
        let outcome = if settlement.status() == SettlementStatus::Completed {
            SettlementOutcome::Completed
        } else {
            allocator::execute(
                &self.dispatcher,
                &settlement,
                self.config.max_retries,
                Utc::now(),
            )?
        };

        match outcome {
            SettlementOutcome::Completed => {
                // 5) Close out settlement and title.
                self.dispatch_settlement(
                    settlement_id,
                    SettlementCommand::MarkCompleted(MarkCompleted {
                        settlement_id,
                        occurred_at: Utc::now(),
                    }),
                )?;
                self.dispatch_title(
                    title_id,
                    TitleCommand::FinalizeSettlement(FinalizeSettlement {
                        title_id,
                        settlement_id: settlement_id.0,
                        occurred_at: Utc::now(),
                    }),
                )?;
                tracing::info!(%title_id, %settlement_id, price = accepted.price, "settlement completed");
                self.notify(MarketNotification::SettlementCompleted {
                    settlement_id,
                    title_id,
                    buyer_id: accepted.buyer_id,
                    seller_id,
                    price: accepted.price,
                });
                Ok(settlement_id)
            }
            SettlementOutcome::Failed { reason } => {
                // 5') Record the failure, roll the title back to negotiation.
                self.dispatch_settlement(
                    settlement_id,
                    SettlementCommand::MarkFailed(MarkFailed {
                        settlement_id,
                        reason: reason.clone(),
                        occurred_at: Utc::now(),
                    }),
                )?;
                self.dispatch_title(
                    title_id,
                    TitleCommand::RevertSettlement(RevertSettlement {
                        title_id,
                        occurred_at: Utc::now(),
                    }),
                )?;
                tracing::warn!(%title_id, %settlement_id, reason, "settlement failed");
                self.notify(MarketNotification::SettlementFailed {
                    settlement_id,
                    title_id,
                    reason: reason.clone(),
                });
                Err(MarketError::settlement_failed(reason))
            }
        }
    }

    /// Abandon a negotiation whose settlement never completed; the accepted
    /// bid is rejected and the title returns to the open listing, free to
    /// take fresh bids.
    pub fn cancel_negotiation(&self, title_id: TitleId) -> MarketResult<()> {
        let title = self.title(title_id)?;
        if title.status() != TitleStatus::InNegotiation {
            return Err(MarketError::illegal_transition(format!(
                "{} -> {} (requires {})",
                title.status(),
                TitleStatus::ListedForSale,
                TitleStatus::InNegotiation
            )));
        }
        // The book is cleared first; the clear replays as a no-op, so a
        // failure between the two appends is repaired by calling this again.
        self.dispatcher.dispatch_with_retry::<BidBook>(
            book_stream(title_id),
            BOOK_AGGREGATE_TYPE,
            BidCommand::ClearAcceptance(ClearAcceptance {
                title_id,
                occurred_at: Utc::now(),
            }),
            |_| BidBook::empty(title_id),
            self.config.max_retries,
        )?;
        self.dispatch_title(
            title_id,
            TitleCommand::CancelNegotiation(CancelNegotiation {
                title_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Current state of a settlement, rebuilt from its stream.
    pub fn settlement(&self, settlement_id: SettlementId) -> MarketResult<Settlement> {
        self.dispatcher
            .load(settlement_id.0, |_| Settlement::empty(settlement_id))
    }

    // ---- plumbing ----

    fn dispatch_title(
        &self,
        title_id: TitleId,
        command: TitleCommand,
    ) -> MarketResult<Vec<StoredEvent>> {
        let committed = self.dispatcher.dispatch_with_retry::<CreditTitle>(
            title_stream(title_id),
            TITLE_AGGREGATE_TYPE,
            command,
            |_| CreditTitle::empty(title_id),
            self.config.max_retries,
        )?;
        for stored in &committed {
            let event: TitleEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| MarketError::storage(format!("title event decode failed: {e}")))?;
            if let Some(status) = event.status_after() {
                self.notify(MarketNotification::TitleStatusChanged { title_id, status });
            }
        }
        Ok(committed)
    }

    fn dispatch_wallet(
        &self,
        user_id: UserId,
        command: WalletCommand,
    ) -> MarketResult<Vec<StoredEvent>> {
        self.dispatcher.dispatch_with_retry::<WalletAccount>(
            allocator::wallet_stream(user_id),
            WALLET_AGGREGATE_TYPE,
            command,
            |_| WalletAccount::empty(WalletId::new(user_id)),
            self.config.max_retries,
        )
    }

    fn dispatch_settlement(
        &self,
        settlement_id: SettlementId,
        command: SettlementCommand,
    ) -> MarketResult<Vec<StoredEvent>> {
        self.dispatcher.dispatch_with_retry::<Settlement>(
            settlement_id.0,
            SETTLEMENT_AGGREGATE_TYPE,
            command,
            |_| Settlement::empty(settlement_id),
            self.config.max_retries,
        )
    }

    /// Retry an operation that re-reads its inputs, for commands whose
    /// decision depends on a snapshot that may go stale mid-flight.
    fn retrying<T>(&self, mut op: impl FnMut() -> MarketResult<T>) -> MarketResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Notifications are best-effort and post-commit; a failed publish is
    /// logged, never surfaced.
    fn notify(&self, notification: MarketNotification) {
        if let Err(err) = self.notifications.publish(notification) {
            tracing::warn!("notification publish failed: {err:?}");
        }
    }
}

fn decode_bid_event(stored: &StoredEvent) -> MarketResult<BidEvent> {
    serde_json::from_value(stored.payload.clone())
        .map_err(|e| MarketError::storage(format!("bid event decode failed: {e}")))
}

fn find_accepted(committed: &[StoredEvent]) -> MarketResult<Option<BidAccepted>> {
    for stored in committed {
        if let BidEvent::BidAccepted(accepted) = decode_bid_event(stored)? {
            return Ok(Some(accepted));
        }
    }
    Ok(None)
}
