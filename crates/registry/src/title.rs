use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credmart_core::{Aggregate, AggregateId, AggregateRoot, Amount, MarketError, MarketResult, UserId};
use credmart_events::Event;

/// Credit title identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TitleId(pub AggregateId);

impl TitleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TitleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Credit title status lifecycle.
///
/// The happy path runs `Draft → PendingValidation → Validated →
/// PendingTokenization → Tokenized → ListedForSale → InNegotiation →
/// Negotiated → SettlementPending → Settled`. Side branches: `Rejected`
/// (failed validation), `Expired` (listing timed out), `Cancelled`
/// (owner-initiated, from any non-terminal state). Titles are never deleted;
/// cancellation is a terminal status, not removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStatus {
    Draft,
    PendingValidation,
    Validated,
    PendingTokenization,
    Tokenized,
    ListedForSale,
    InNegotiation,
    Negotiated,
    SettlementPending,
    Settled,
    Rejected,
    Expired,
    Cancelled,
}

impl TitleStatus {
    /// The single table of legal status edges. Every transition command
    /// checks against this; no call site re-implements the graph.
    pub fn transitions(self) -> &'static [TitleStatus] {
        use TitleStatus::*;
        match self {
            Draft => &[PendingValidation, Cancelled],
            PendingValidation => &[Validated, Rejected, Cancelled],
            Validated => &[PendingTokenization, Cancelled],
            PendingTokenization => &[Tokenized, Cancelled],
            Tokenized => &[ListedForSale, Cancelled],
            ListedForSale => &[InNegotiation, Tokenized, Expired, Cancelled],
            InNegotiation => &[Negotiated, ListedForSale, Expired, Cancelled],
            Negotiated => &[SettlementPending, Cancelled],
            SettlementPending => &[Settled, InNegotiation, Cancelled],
            Settled | Rejected | Expired | Cancelled => &[],
        }
    }

    pub fn allows(self, to: TitleStatus) -> bool {
        self.transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.transitions().is_empty()
    }

    /// Whether bids may target a title in this status.
    pub fn accepts_bids(self) -> bool {
        matches!(self, TitleStatus::ListedForSale | TitleStatus::InNegotiation)
    }
}

impl core::fmt::Display for TitleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            TitleStatus::Draft => "draft",
            TitleStatus::PendingValidation => "pending_validation",
            TitleStatus::Validated => "validated",
            TitleStatus::PendingTokenization => "pending_tokenization",
            TitleStatus::Tokenized => "tokenized",
            TitleStatus::ListedForSale => "listed_for_sale",
            TitleStatus::InNegotiation => "in_negotiation",
            TitleStatus::Negotiated => "negotiated",
            TitleStatus::SettlementPending => "settlement_pending",
            TitleStatus::Settled => "settled",
            TitleStatus::Rejected => "rejected",
            TitleStatus::Expired => "expired",
            TitleStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Read-only view of a title handed to collaborating engines (bid book,
/// settlement) so they never reach into registry internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSnapshot {
    pub title_id: TitleId,
    pub owner_id: UserId,
    pub status: TitleStatus,
    pub listing_price: Option<Amount>,
}

/// Aggregate root: CreditTitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditTitle {
    id: TitleId,
    owner_id: Option<UserId>,
    issuer_id: Option<UserId>,
    category: String,
    subtype: String,
    /// Face value; fixed once registered (no command may change it).
    nominal_value: Amount,
    /// Market estimate; only revised downward.
    current_value: Amount,
    /// Non-null iff status is `ListedForSale` or `InNegotiation`.
    listing_price: Option<Amount>,
    /// Price held aside while a settlement is in flight, so a revert can
    /// restore the listing-price invariant.
    retained_price: Option<Amount>,
    /// Optional listing deadline; `ExpireTitle` compares it against "now"
    /// and is a no-op until it passes. A listing without one never expires.
    listed_until: Option<DateTime<Utc>>,
    token_reference: Option<String>,
    status: TitleStatus,
    active_bid: Option<AggregateId>,
    settlement: Option<AggregateId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl CreditTitle {
    /// Empty aggregate for rehydration.
    pub fn empty(id: TitleId) -> Self {
        Self {
            id,
            owner_id: None,
            issuer_id: None,
            category: String::new(),
            subtype: String::new(),
            nominal_value: 0,
            current_value: 0,
            listing_price: None,
            retained_price: None,
            listed_until: None,
            token_reference: None,
            status: TitleStatus::Draft,
            active_bid: None,
            settlement: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TitleId {
        self.id
    }

    pub fn owner_id(&self) -> Option<UserId> {
        self.owner_id
    }

    pub fn issuer_id(&self) -> Option<UserId> {
        self.issuer_id
    }

    pub fn status(&self) -> TitleStatus {
        self.status
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn nominal_value(&self) -> Amount {
        self.nominal_value
    }

    pub fn current_value(&self) -> Amount {
        self.current_value
    }

    pub fn listing_price(&self) -> Option<Amount> {
        self.listing_price
    }

    pub fn listed_until(&self) -> Option<DateTime<Utc>> {
        self.listed_until
    }

    pub fn token_reference(&self) -> Option<&str> {
        self.token_reference.as_deref()
    }

    pub fn active_bid(&self) -> Option<AggregateId> {
        self.active_bid
    }

    pub fn settlement(&self) -> Option<AggregateId> {
        self.settlement
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn snapshot(&self) -> MarketResult<TitleSnapshot> {
        let owner_id = self.owner_id.ok_or(MarketError::NotFound)?;
        Ok(TitleSnapshot {
            title_id: self.id,
            owner_id,
            status: self.status,
            listing_price: self.listing_price,
        })
    }
}

impl AggregateRoot for CreditTitle {
    type Id = TitleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterTitle (creates the aggregate in `Draft`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTitle {
    pub title_id: TitleId,
    pub owner_id: UserId,
    pub issuer_id: UserId,
    pub category: String,
    pub subtype: String,
    pub nominal_value: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitForValidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitForValidation {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ValidateTitle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateTitle {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTitle (validation failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTitle {
    pub title_id: TitleId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestTokenization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTokenization {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TokenizeTitle (stores the external token reference verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizeTitle {
    pub title_id: TitleId,
    pub token_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ListTitle (owner-only; sets the listing price and, optionally,
/// a deadline after which `ExpireTitle` retires the listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTitle {
    pub title_id: TitleId,
    pub requested_by: UserId,
    pub price: Amount,
    pub listed_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnlistTitle (owner-only; clears the listing price).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlistTitle {
    pub title_id: TitleId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EnterNegotiation (engine-driven, on bid acceptance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterNegotiation {
    pub title_id: TitleId,
    pub bid_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelNegotiation (back to the open listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelNegotiation {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkNegotiated (settlement allocations computed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkNegotiated {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginSettlement (ledger execution starting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSettlement {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertSettlement (ledger step failed; roll back to negotiation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertSettlement {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeSettlement {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireTitle (time-driven, via `expire_if_due`). Idempotent: a
/// no-op unless the stored listing deadline has passed, so a scheduler may
/// issue it repeatedly without harm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireTitle {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTitle (owner-initiated, any non-terminal state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTitle {
    pub title_id: TitleId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseCurrentValue (market estimate decays, never grows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseCurrentValue {
    pub title_id: TitleId,
    pub value: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TitleCommand {
    RegisterTitle(RegisterTitle),
    SubmitForValidation(SubmitForValidation),
    ValidateTitle(ValidateTitle),
    RejectTitle(RejectTitle),
    RequestTokenization(RequestTokenization),
    TokenizeTitle(TokenizeTitle),
    ListTitle(ListTitle),
    UnlistTitle(UnlistTitle),
    EnterNegotiation(EnterNegotiation),
    CancelNegotiation(CancelNegotiation),
    MarkNegotiated(MarkNegotiated),
    BeginSettlement(BeginSettlement),
    RevertSettlement(RevertSettlement),
    FinalizeSettlement(FinalizeSettlement),
    ExpireTitle(ExpireTitle),
    CancelTitle(CancelTitle),
    ReviseCurrentValue(ReviseCurrentValue),
}

/// Events. Each carries the status the title moves to where relevant, so
/// `apply` stays a dumb projection of facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRegistered {
    pub title_id: TitleId,
    pub owner_id: UserId,
    pub issuer_id: UserId,
    pub category: String,
    pub subtype: String,
    pub nominal_value: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequested {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleValidated {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRejected {
    pub title_id: TitleId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationRequested {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleTokenized {
    pub title_id: TitleId,
    pub token_reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleListed {
    pub title_id: TitleId,
    pub price: Amount,
    pub listed_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleUnlisted {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationEntered {
    pub title_id: TitleId,
    pub bid_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationCancelled {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleNegotiated {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStarted {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReverted {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSettled {
    pub title_id: TitleId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleExpired {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleCancelled {
    pub title_id: TitleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentValueRevised {
    pub title_id: TitleId,
    pub value: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TitleEvent {
    TitleRegistered(TitleRegistered),
    ValidationRequested(ValidationRequested),
    TitleValidated(TitleValidated),
    TitleRejected(TitleRejected),
    TokenizationRequested(TokenizationRequested),
    TitleTokenized(TitleTokenized),
    TitleListed(TitleListed),
    TitleUnlisted(TitleUnlisted),
    NegotiationEntered(NegotiationEntered),
    NegotiationCancelled(NegotiationCancelled),
    TitleNegotiated(TitleNegotiated),
    SettlementStarted(SettlementStarted),
    SettlementReverted(SettlementReverted),
    TitleSettled(TitleSettled),
    TitleExpired(TitleExpired),
    TitleCancelled(TitleCancelled),
    CurrentValueRevised(CurrentValueRevised),
}

impl TitleEvent {
    /// Status the title holds after this event, when the event moves it.
    pub fn status_after(&self) -> Option<TitleStatus> {
        use TitleEvent::*;
        Some(match self {
            TitleRegistered(_) => TitleStatus::Draft,
            ValidationRequested(_) => TitleStatus::PendingValidation,
            TitleValidated(_) => TitleStatus::Validated,
            TitleRejected(_) => TitleStatus::Rejected,
            TokenizationRequested(_) => TitleStatus::PendingTokenization,
            TitleTokenized(_) => TitleStatus::Tokenized,
            TitleListed(_) => TitleStatus::ListedForSale,
            TitleUnlisted(_) => TitleStatus::Tokenized,
            NegotiationEntered(_) => TitleStatus::InNegotiation,
            NegotiationCancelled(_) => TitleStatus::ListedForSale,
            TitleNegotiated(_) => TitleStatus::Negotiated,
            SettlementStarted(_) => TitleStatus::SettlementPending,
            SettlementReverted(_) => TitleStatus::InNegotiation,
            TitleSettled(_) => TitleStatus::Settled,
            TitleExpired(_) => TitleStatus::Expired,
            TitleCancelled(_) => TitleStatus::Cancelled,
            CurrentValueRevised(_) => return None,
        })
    }
}

impl Event for TitleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TitleEvent::TitleRegistered(_) => "registry.title.registered",
            TitleEvent::ValidationRequested(_) => "registry.title.validation_requested",
            TitleEvent::TitleValidated(_) => "registry.title.validated",
            TitleEvent::TitleRejected(_) => "registry.title.rejected",
            TitleEvent::TokenizationRequested(_) => "registry.title.tokenization_requested",
            TitleEvent::TitleTokenized(_) => "registry.title.tokenized",
            TitleEvent::TitleListed(_) => "registry.title.listed",
            TitleEvent::TitleUnlisted(_) => "registry.title.unlisted",
            TitleEvent::NegotiationEntered(_) => "registry.title.negotiation_entered",
            TitleEvent::NegotiationCancelled(_) => "registry.title.negotiation_cancelled",
            TitleEvent::TitleNegotiated(_) => "registry.title.negotiated",
            TitleEvent::SettlementStarted(_) => "registry.title.settlement_started",
            TitleEvent::SettlementReverted(_) => "registry.title.settlement_reverted",
            TitleEvent::TitleSettled(_) => "registry.title.settled",
            TitleEvent::TitleExpired(_) => "registry.title.expired",
            TitleEvent::TitleCancelled(_) => "registry.title.cancelled",
            TitleEvent::CurrentValueRevised(_) => "registry.title.current_value_revised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        use TitleEvent::*;
        match self {
            TitleRegistered(e) => e.occurred_at,
            ValidationRequested(e) => e.occurred_at,
            TitleValidated(e) => e.occurred_at,
            TitleRejected(e) => e.occurred_at,
            TokenizationRequested(e) => e.occurred_at,
            TitleTokenized(e) => e.occurred_at,
            TitleListed(e) => e.occurred_at,
            TitleUnlisted(e) => e.occurred_at,
            NegotiationEntered(e) => e.occurred_at,
            NegotiationCancelled(e) => e.occurred_at,
            TitleNegotiated(e) => e.occurred_at,
            SettlementStarted(e) => e.occurred_at,
            SettlementReverted(e) => e.occurred_at,
            TitleSettled(e) => e.occurred_at,
            TitleExpired(e) => e.occurred_at,
            TitleCancelled(e) => e.occurred_at,
            CurrentValueRevised(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CreditTitle {
    type Command = TitleCommand;
    type Event = TitleEvent;

    fn apply(&mut self, event: &Self::Event) {
        let occurred = event.occurred_at();
        if self.created_at.is_none() {
            self.created_at = Some(occurred);
        }
        self.updated_at = Some(occurred);

        match event {
            TitleEvent::TitleRegistered(e) => {
                self.id = e.title_id;
                self.owner_id = Some(e.owner_id);
                self.issuer_id = Some(e.issuer_id);
                self.category = e.category.clone();
                self.subtype = e.subtype.clone();
                self.nominal_value = e.nominal_value;
                self.current_value = e.nominal_value;
                self.created = true;
            }
            TitleEvent::TitleTokenized(e) => {
                self.token_reference = Some(e.token_reference.clone());
            }
            TitleEvent::TitleListed(e) => {
                self.listing_price = Some(e.price);
                self.listed_until = e.listed_until;
            }
            TitleEvent::TitleUnlisted(_)
            | TitleEvent::TitleExpired(_)
            | TitleEvent::TitleCancelled(_) => {
                self.listing_price = None;
                self.retained_price = None;
                self.listed_until = None;
                self.active_bid = None;
            }
            TitleEvent::NegotiationEntered(e) => {
                self.active_bid = Some(e.bid_id);
            }
            TitleEvent::NegotiationCancelled(_) => {
                self.active_bid = None;
            }
            TitleEvent::TitleNegotiated(e) => {
                self.settlement = Some(e.settlement_id);
                // Leaving the listed states; park the price for a revert.
                self.retained_price = self.listing_price.take();
            }
            TitleEvent::SettlementReverted(_) => {
                self.listing_price = self.retained_price.take();
                // The failed settlement is dead; a retried acceptance opens
                // a fresh one.
                self.settlement = None;
            }
            TitleEvent::TitleSettled(e) => {
                self.settlement = Some(e.settlement_id);
                self.retained_price = None;
                self.listed_until = None;
            }
            TitleEvent::CurrentValueRevised(e) => {
                self.current_value = e.value;
            }
            TitleEvent::ValidationRequested(_)
            | TitleEvent::TitleValidated(_)
            | TitleEvent::TitleRejected(_)
            | TitleEvent::TokenizationRequested(_)
            | TitleEvent::SettlementStarted(_) => {}
        }

        if let Some(status) = event.status_after() {
            self.status = status;
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>> {
        match command {
            TitleCommand::RegisterTitle(cmd) => self.handle_register(cmd),
            TitleCommand::SubmitForValidation(cmd) => {
                self.transition(cmd.title_id, TitleStatus::PendingValidation)?;
                Ok(vec![TitleEvent::ValidationRequested(ValidationRequested {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::ValidateTitle(cmd) => {
                self.transition(cmd.title_id, TitleStatus::Validated)?;
                Ok(vec![TitleEvent::TitleValidated(TitleValidated {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::RejectTitle(cmd) => {
                self.transition(cmd.title_id, TitleStatus::Rejected)?;
                Ok(vec![TitleEvent::TitleRejected(TitleRejected {
                    title_id: cmd.title_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::RequestTokenization(cmd) => {
                self.transition(cmd.title_id, TitleStatus::PendingTokenization)?;
                Ok(vec![TitleEvent::TokenizationRequested(TokenizationRequested {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::TokenizeTitle(cmd) => self.handle_tokenize(cmd),
            TitleCommand::ListTitle(cmd) => self.handle_list(cmd),
            TitleCommand::UnlistTitle(cmd) => {
                self.transition_from(cmd.title_id, TitleStatus::ListedForSale, TitleStatus::Tokenized)?;
                self.ensure_owner(cmd.requested_by)?;
                Ok(vec![TitleEvent::TitleUnlisted(TitleUnlisted {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            // The four engine-driven pipeline commands replay as no-ops once
            // their step already holds, so a resumed settlement run re-issues
            // the whole sequence without tripping the transition guards.
            TitleCommand::EnterNegotiation(cmd) => {
                if self.active_bid == Some(cmd.bid_id)
                    && matches!(
                        self.status,
                        TitleStatus::InNegotiation
                            | TitleStatus::Negotiated
                            | TitleStatus::SettlementPending
                    )
                {
                    return Ok(vec![]);
                }
                self.transition_from(cmd.title_id, TitleStatus::ListedForSale, TitleStatus::InNegotiation)?;
                Ok(vec![TitleEvent::NegotiationEntered(NegotiationEntered {
                    title_id: cmd.title_id,
                    bid_id: cmd.bid_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::CancelNegotiation(cmd) => {
                self.transition_from(cmd.title_id, TitleStatus::InNegotiation, TitleStatus::ListedForSale)?;
                Ok(vec![TitleEvent::NegotiationCancelled(NegotiationCancelled {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::MarkNegotiated(cmd) => {
                if self.settlement == Some(cmd.settlement_id)
                    && matches!(
                        self.status,
                        TitleStatus::Negotiated
                            | TitleStatus::SettlementPending
                            | TitleStatus::Settled
                    )
                {
                    return Ok(vec![]);
                }
                self.transition(cmd.title_id, TitleStatus::Negotiated)?;
                Ok(vec![TitleEvent::TitleNegotiated(TitleNegotiated {
                    title_id: cmd.title_id,
                    settlement_id: cmd.settlement_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::BeginSettlement(cmd) => {
                if self.settlement == Some(cmd.settlement_id)
                    && matches!(
                        self.status,
                        TitleStatus::SettlementPending | TitleStatus::Settled
                    )
                {
                    return Ok(vec![]);
                }
                self.transition(cmd.title_id, TitleStatus::SettlementPending)?;
                Ok(vec![TitleEvent::SettlementStarted(SettlementStarted {
                    title_id: cmd.title_id,
                    settlement_id: cmd.settlement_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::RevertSettlement(cmd) => {
                self.transition_from(cmd.title_id, TitleStatus::SettlementPending, TitleStatus::InNegotiation)?;
                Ok(vec![TitleEvent::SettlementReverted(SettlementReverted {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::FinalizeSettlement(cmd) => {
                if self.settlement == Some(cmd.settlement_id)
                    && self.status == TitleStatus::Settled
                {
                    return Ok(vec![]);
                }
                self.transition(cmd.title_id, TitleStatus::Settled)?;
                Ok(vec![TitleEvent::TitleSettled(TitleSettled {
                    title_id: cmd.title_id,
                    settlement_id: cmd.settlement_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::ExpireTitle(cmd) => self.handle_expire(cmd),
            TitleCommand::CancelTitle(cmd) => {
                self.transition(cmd.title_id, TitleStatus::Cancelled)?;
                self.ensure_owner(cmd.requested_by)?;
                Ok(vec![TitleEvent::TitleCancelled(TitleCancelled {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TitleCommand::ReviseCurrentValue(cmd) => self.handle_revise(cmd),
        }
    }
}

impl CreditTitle {
    fn ensure_created(&self) -> MarketResult<()> {
        if !self.created {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }

    fn ensure_title_id(&self, title_id: TitleId) -> MarketResult<()> {
        if self.id != title_id {
            return Err(MarketError::internal("title_id mismatch"));
        }
        Ok(())
    }

    fn ensure_owner(&self, requested_by: UserId) -> MarketResult<()> {
        if self.owner_id != Some(requested_by) {
            return Err(MarketError::Unauthorized);
        }
        Ok(())
    }

    /// Shared transition guard: the title must exist, the command must target
    /// this aggregate, and the edge must be in the status graph.
    fn transition(&self, title_id: TitleId, to: TitleStatus) -> MarketResult<()> {
        self.ensure_created()?;
        self.ensure_title_id(title_id)?;
        if !self.status.allows(to) {
            return Err(MarketError::illegal_transition(format!(
                "{} -> {}",
                self.status, to
            )));
        }
        Ok(())
    }

    /// Like `transition`, but pinned to one source state. Needed where two
    /// commands share a target (e.g. tokenize and unlist both land on
    /// `Tokenized`) and must not accept each other's source.
    fn transition_from(
        &self,
        title_id: TitleId,
        from: TitleStatus,
        to: TitleStatus,
    ) -> MarketResult<()> {
        self.transition(title_id, to)?;
        if self.status != from {
            return Err(MarketError::illegal_transition(format!(
                "{} -> {} (requires {})",
                self.status, to, from
            )));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterTitle) -> MarketResult<Vec<TitleEvent>> {
        if self.created {
            return Err(MarketError::stale_version("title already registered"));
        }
        if cmd.nominal_value == 0 {
            return Err(MarketError::validation("nominal value must be positive"));
        }
        if cmd.category.trim().is_empty() {
            return Err(MarketError::validation("category must not be empty"));
        }

        Ok(vec![TitleEvent::TitleRegistered(TitleRegistered {
            title_id: cmd.title_id,
            owner_id: cmd.owner_id,
            issuer_id: cmd.issuer_id,
            category: cmd.category.clone(),
            subtype: cmd.subtype.clone(),
            nominal_value: cmd.nominal_value,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_tokenize(&self, cmd: &TokenizeTitle) -> MarketResult<Vec<TitleEvent>> {
        self.transition_from(cmd.title_id, TitleStatus::PendingTokenization, TitleStatus::Tokenized)?;
        if cmd.token_reference.is_empty() {
            return Err(MarketError::validation("token reference must not be empty"));
        }
        Ok(vec![TitleEvent::TitleTokenized(TitleTokenized {
            title_id: cmd.title_id,
            token_reference: cmd.token_reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_list(&self, cmd: &ListTitle) -> MarketResult<Vec<TitleEvent>> {
        self.transition_from(cmd.title_id, TitleStatus::Tokenized, TitleStatus::ListedForSale)?;
        self.ensure_owner(cmd.requested_by)?;
        if cmd.price == 0 {
            return Err(MarketError::validation("listing price must be positive"));
        }
        if let Some(deadline) = cmd.listed_until {
            if deadline <= cmd.occurred_at {
                return Err(MarketError::validation("listing deadline must be in the future"));
            }
        }
        Ok(vec![TitleEvent::TitleListed(TitleListed {
            title_id: cmd.title_id,
            price: cmd.price,
            listed_until: cmd.listed_until,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Unlike the owner-driven transitions, expiry never fails on state: the
    /// sweep runs on a schedule and must be repeatable. It emits only when
    /// the title is still in an expirable state and its deadline has passed.
    fn handle_expire(&self, cmd: &ExpireTitle) -> MarketResult<Vec<TitleEvent>> {
        self.ensure_created()?;
        self.ensure_title_id(cmd.title_id)?;
        if !matches!(
            self.status,
            TitleStatus::ListedForSale | TitleStatus::InNegotiation
        ) {
            return Ok(vec![]);
        }
        match self.listed_until {
            Some(deadline) if deadline <= cmd.occurred_at => {
                Ok(vec![TitleEvent::TitleExpired(TitleExpired {
                    title_id: cmd.title_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            _ => Ok(vec![]),
        }
    }

    fn handle_revise(&self, cmd: &ReviseCurrentValue) -> MarketResult<Vec<TitleEvent>> {
        self.ensure_created()?;
        self.ensure_title_id(cmd.title_id)?;
        if self.status.is_terminal() {
            return Err(MarketError::illegal_transition(format!(
                "revise_current_value on terminal status {}",
                self.status
            )));
        }
        if cmd.value > self.current_value {
            return Err(MarketError::validation(format!(
                "current value may only decrease ({} -> {})",
                self.current_value, cmd.value
            )));
        }
        Ok(vec![TitleEvent::CurrentValueRevised(CurrentValueRevised {
            title_id: cmd.title_id,
            value: cmd.value,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_title_id() -> TitleId {
        TitleId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register(title: &mut CreditTitle, owner: UserId) {
        let cmd = RegisterTitle {
            title_id: title.id_typed(),
            owner_id: owner,
            issuer_id: UserId::new(),
            category: "federal".to_string(),
            subtype: "icms".to_string(),
            nominal_value: 1_000_000,
            occurred_at: test_time(),
        };
        let events = title.handle(&TitleCommand::RegisterTitle(cmd)).unwrap();
        for e in &events {
            title.apply(e);
        }
    }

    fn drive(title: &mut CreditTitle, cmd: TitleCommand) {
        let events = title.handle(&cmd).unwrap();
        for e in &events {
            title.apply(e);
        }
    }

    /// Walk a title up to `ListedForSale` owned by `owner`.
    fn listed_title(owner: UserId, price: Amount) -> CreditTitle {
        listed_title_until(owner, price, None)
    }

    fn listed_title_until(
        owner: UserId,
        price: Amount,
        listed_until: Option<DateTime<Utc>>,
    ) -> CreditTitle {
        let mut title = CreditTitle::empty(test_title_id());
        register(&mut title, owner);
        let id = title.id_typed();
        drive(&mut title, TitleCommand::SubmitForValidation(SubmitForValidation {
            title_id: id,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::ValidateTitle(ValidateTitle {
            title_id: id,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::RequestTokenization(RequestTokenization {
            title_id: id,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::TokenizeTitle(TokenizeTitle {
            title_id: id,
            token_reference: "tok-1".to_string(),
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::ListTitle(ListTitle {
            title_id: id,
            requested_by: owner,
            price,
            listed_until,
            occurred_at: test_time(),
        }));
        title
    }

    #[test]
    fn full_lifecycle_reaches_settled() {
        let owner = UserId::new();
        let mut title = listed_title(owner, 500_000);
        let id = title.id_typed();
        assert_eq!(title.status(), TitleStatus::ListedForSale);
        assert_eq!(title.listing_price(), Some(500_000));

        let bid = AggregateId::new();
        let settlement = AggregateId::new();
        drive(&mut title, TitleCommand::EnterNegotiation(EnterNegotiation {
            title_id: id,
            bid_id: bid,
            occurred_at: test_time(),
        }));
        assert_eq!(title.status(), TitleStatus::InNegotiation);
        assert_eq!(title.active_bid(), Some(bid));

        drive(&mut title, TitleCommand::MarkNegotiated(MarkNegotiated {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::BeginSettlement(BeginSettlement {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::FinalizeSettlement(FinalizeSettlement {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));

        assert_eq!(title.status(), TitleStatus::Settled);
        assert!(title.status().is_terminal());
        assert_eq!(title.listing_price(), None);
        assert_eq!(title.settlement(), Some(settlement));
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let mut title = CreditTitle::empty(test_title_id());
        register(&mut title, UserId::new());

        // Draft -> Validated skips PendingValidation.
        let err = title
            .handle(&TitleCommand::ValidateTitle(ValidateTitle {
                title_id: title.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::IllegalTransition(_)));
    }

    #[test]
    fn listing_price_present_iff_listed_or_negotiating() {
        let owner = UserId::new();
        let mut title = listed_title(owner, 250_000);
        let id = title.id_typed();
        assert!(title.listing_price().is_some());

        drive(&mut title, TitleCommand::UnlistTitle(UnlistTitle {
            title_id: id,
            requested_by: owner,
            occurred_at: test_time(),
        }));
        assert_eq!(title.status(), TitleStatus::Tokenized);
        assert_eq!(title.listing_price(), None);
    }

    #[test]
    fn revert_settlement_restores_listing_price() {
        let owner = UserId::new();
        let mut title = listed_title(owner, 250_000);
        let id = title.id_typed();
        let settlement = AggregateId::new();

        drive(&mut title, TitleCommand::EnterNegotiation(EnterNegotiation {
            title_id: id,
            bid_id: AggregateId::new(),
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::MarkNegotiated(MarkNegotiated {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        assert_eq!(title.listing_price(), None);

        drive(&mut title, TitleCommand::BeginSettlement(BeginSettlement {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        drive(&mut title, TitleCommand::RevertSettlement(RevertSettlement {
            title_id: id,
            occurred_at: test_time(),
        }));

        assert_eq!(title.status(), TitleStatus::InNegotiation);
        assert_eq!(title.listing_price(), Some(250_000));
        // The failed settlement no longer hangs off the title.
        assert_eq!(title.settlement(), None);
    }

    #[test]
    fn resumed_pipeline_replays_emit_nothing() {
        let owner = UserId::new();
        let mut title = listed_title(owner, 250_000);
        let id = title.id_typed();
        let bid = AggregateId::new();
        let settlement = AggregateId::new();

        drive(&mut title, TitleCommand::EnterNegotiation(EnterNegotiation {
            title_id: id,
            bid_id: bid,
            occurred_at: test_time(),
        }));
        // Same bid again: nothing to do.
        assert!(title
            .handle(&TitleCommand::EnterNegotiation(EnterNegotiation {
                title_id: id,
                bid_id: bid,
                occurred_at: test_time(),
            }))
            .unwrap()
            .is_empty());
        // A different bid is still an illegal edge.
        let err = title
            .handle(&TitleCommand::EnterNegotiation(EnterNegotiation {
                title_id: id,
                bid_id: AggregateId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::IllegalTransition(_)));

        drive(&mut title, TitleCommand::MarkNegotiated(MarkNegotiated {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        assert!(title
            .handle(&TitleCommand::MarkNegotiated(MarkNegotiated {
                title_id: id,
                settlement_id: settlement,
                occurred_at: test_time(),
            }))
            .unwrap()
            .is_empty());

        drive(&mut title, TitleCommand::BeginSettlement(BeginSettlement {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        assert!(title
            .handle(&TitleCommand::BeginSettlement(BeginSettlement {
                title_id: id,
                settlement_id: settlement,
                occurred_at: test_time(),
            }))
            .unwrap()
            .is_empty());

        drive(&mut title, TitleCommand::FinalizeSettlement(FinalizeSettlement {
            title_id: id,
            settlement_id: settlement,
            occurred_at: test_time(),
        }));
        assert!(title
            .handle(&TitleCommand::FinalizeSettlement(FinalizeSettlement {
                title_id: id,
                settlement_id: settlement,
                occurred_at: test_time(),
            }))
            .unwrap()
            .is_empty());
        assert_eq!(title.status(), TitleStatus::Settled);
    }

    #[test]
    fn only_owner_may_list_or_cancel() {
        let owner = UserId::new();
        let stranger = UserId::new();
        let mut title = CreditTitle::empty(test_title_id());
        register(&mut title, owner);
        let id = title.id_typed();

        let err = title
            .handle(&TitleCommand::CancelTitle(CancelTitle {
                title_id: id,
                requested_by: stranger,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, MarketError::Unauthorized);

        drive(&mut title, TitleCommand::CancelTitle(CancelTitle {
            title_id: id,
            requested_by: owner,
            occurred_at: test_time(),
        }));
        assert_eq!(title.status(), TitleStatus::Cancelled);
    }

    #[test]
    fn terminal_states_accept_no_commands() {
        let owner = UserId::new();
        let t0 = test_time();
        let mut title = listed_title_until(owner, 100, Some(t0 + Duration::minutes(30)));
        let id = title.id_typed();
        drive(&mut title, TitleCommand::ExpireTitle(ExpireTitle {
            title_id: id,
            occurred_at: t0 + Duration::minutes(31),
        }));
        assert_eq!(title.status(), TitleStatus::Expired);

        let err = title
            .handle(&TitleCommand::ListTitle(ListTitle {
                title_id: id,
                requested_by: owner,
                price: 100,
                listed_until: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::IllegalTransition(_)));
    }

    #[test]
    fn expiry_waits_for_the_deadline_and_repeats_harmlessly() {
        let owner = UserId::new();
        let t0 = test_time();
        let mut title = listed_title_until(owner, 100, Some(t0 + Duration::minutes(30)));
        let id = title.id_typed();
        assert_eq!(title.listed_until(), Some(t0 + Duration::minutes(30)));

        // Too early: nothing happens.
        let events = title
            .handle(&TitleCommand::ExpireTitle(ExpireTitle {
                title_id: id,
                occurred_at: t0 + Duration::minutes(10),
            }))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(title.status(), TitleStatus::ListedForSale);

        drive(&mut title, TitleCommand::ExpireTitle(ExpireTitle {
            title_id: id,
            occurred_at: t0 + Duration::minutes(31),
        }));
        assert_eq!(title.status(), TitleStatus::Expired);
        assert_eq!(title.listing_price(), None);

        // Already expired: still a no-op, never an error.
        let events = title
            .handle(&TitleCommand::ExpireTitle(ExpireTitle {
                title_id: id,
                occurred_at: t0 + Duration::minutes(45),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn listing_without_a_deadline_never_expires() {
        let owner = UserId::new();
        let mut title = listed_title(owner, 100);
        let id = title.id_typed();

        let events = title
            .handle(&TitleCommand::ExpireTitle(ExpireTitle {
                title_id: id,
                occurred_at: test_time() + Duration::days(365),
            }))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(title.status(), TitleStatus::ListedForSale);
    }

    #[test]
    fn current_value_never_increases() {
        let mut title = CreditTitle::empty(test_title_id());
        register(&mut title, UserId::new());
        let id = title.id_typed();
        assert_eq!(title.current_value(), 1_000_000);

        drive(&mut title, TitleCommand::ReviseCurrentValue(ReviseCurrentValue {
            title_id: id,
            value: 900_000,
            occurred_at: test_time(),
        }));
        assert_eq!(title.current_value(), 900_000);

        let err = title
            .handle(&TitleCommand::ReviseCurrentValue(ReviseCurrentValue {
                title_id: id,
                value: 950_000,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    proptest! {
        /// Property: whatever sequence of commands is thrown at a title, the
        /// listing-price invariant holds and the status stays reachable from
        /// Draft via legal edges (every applied event is checked against the
        /// transition table before application).
        #[test]
        fn random_command_sequences_preserve_invariants(
            choices in prop::collection::vec(0usize..17, 1..40)
        ) {
            let owner = UserId::new();
            let title_id = test_title_id();
            let mut title = CreditTitle::empty(title_id);
            register(&mut title, owner);

            for c in choices {
                let now = test_time();
                let cmd = match c {
                    0 => TitleCommand::SubmitForValidation(SubmitForValidation { title_id, occurred_at: now }),
                    1 => TitleCommand::ValidateTitle(ValidateTitle { title_id, occurred_at: now }),
                    2 => TitleCommand::RejectTitle(RejectTitle { title_id, reason: "bad docs".into(), occurred_at: now }),
                    3 => TitleCommand::RequestTokenization(RequestTokenization { title_id, occurred_at: now }),
                    4 => TitleCommand::TokenizeTitle(TokenizeTitle { title_id, token_reference: "tok".into(), occurred_at: now }),
                    5 => TitleCommand::ListTitle(ListTitle { title_id, requested_by: owner, price: 1_000, listed_until: Some(now + Duration::days(7)), occurred_at: now }),
                    6 => TitleCommand::UnlistTitle(UnlistTitle { title_id, requested_by: owner, occurred_at: now }),
                    7 => TitleCommand::EnterNegotiation(EnterNegotiation { title_id, bid_id: AggregateId::new(), occurred_at: now }),
                    8 => TitleCommand::CancelNegotiation(CancelNegotiation { title_id, occurred_at: now }),
                    9 => TitleCommand::MarkNegotiated(MarkNegotiated { title_id, settlement_id: AggregateId::new(), occurred_at: now }),
                    10 => TitleCommand::BeginSettlement(BeginSettlement { title_id, settlement_id: AggregateId::new(), occurred_at: now }),
                    11 => TitleCommand::RevertSettlement(RevertSettlement { title_id, occurred_at: now }),
                    12 => TitleCommand::FinalizeSettlement(FinalizeSettlement { title_id, settlement_id: AggregateId::new(), occurred_at: now }),
                    13 => TitleCommand::ExpireTitle(ExpireTitle { title_id, occurred_at: now + Duration::days(30) }),
                    14 => TitleCommand::CancelTitle(CancelTitle { title_id, requested_by: owner, occurred_at: now }),
                    15 => TitleCommand::ReviseCurrentValue(ReviseCurrentValue { title_id, value: 500, occurred_at: now }),
                    _ => TitleCommand::ReviseCurrentValue(ReviseCurrentValue { title_id, value: 2_000_000, occurred_at: now }),
                };

                let before = title.status();
                if let Ok(events) = title.handle(&cmd) {
                    for e in &events {
                        if let Some(to) = e.status_after() {
                            if to != before {
                                prop_assert!(before.allows(to), "illegal edge {before} -> {to} emitted");
                            }
                        }
                        title.apply(e);
                    }
                }

                let listed = title.status().accepts_bids();
                prop_assert_eq!(
                    title.listing_price().is_some(),
                    listed,
                    "listing_price invariant broken in status {}", title.status()
                );
            }
        }
    }
}
