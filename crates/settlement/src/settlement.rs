use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credmart_core::{
    Aggregate, AggregateId, AggregateRoot, Amount, FeeRate, MarketError, MarketResult, UserId,
};
use credmart_events::Event;
use credmart_registry::TitleId;

use crate::allocation::{allocate, Allocation};

/// Settlement identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub AggregateId);

impl SettlementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SettlementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SettlementStatus::Pending)
    }
}

/// Aggregate root: one settlement attempt for one accepted bid.
///
/// The allocation split is computed once, at open, and frozen into the
/// opening event; the engine executes the wallet movements against that
/// frozen split and reports completion or failure. Terminal settlements are
/// immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    id: SettlementId,
    title_id: Option<TitleId>,
    bid_id: Option<AggregateId>,
    buyer_id: Option<UserId>,
    seller_id: Option<UserId>,
    price: Amount,
    allocations: Vec<Allocation>,
    status: SettlementStatus,
    failure_reason: Option<String>,
    version: u64,
}

impl Settlement {
    /// Empty settlement for rehydration.
    pub fn empty(id: SettlementId) -> Self {
        Self {
            id,
            title_id: None,
            bid_id: None,
            buyer_id: None,
            seller_id: None,
            price: 0,
            allocations: Vec::new(),
            status: SettlementStatus::Pending,
            failure_reason: None,
            version: 0,
        }
    }

    pub fn title_id(&self) -> Option<TitleId> {
        self.title_id
    }

    pub fn bid_id(&self) -> Option<AggregateId> {
        self.bid_id
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn price(&self) -> Amount {
        self.price
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

impl AggregateRoot for Settlement {
    type Id = SettlementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSettlement — computes and freezes the allocation split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSettlement {
    pub settlement_id: SettlementId,
    pub title_id: TitleId,
    pub bid_id: AggregateId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub platform_account: UserId,
    pub price: Amount,
    pub fee_rate: FeeRate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkCompleted — all wallet movements landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCompleted {
    pub settlement_id: SettlementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkFailed — execution aborted, wallets rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFailed {
    pub settlement_id: SettlementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementCommand {
    OpenSettlement(OpenSettlement),
    MarkCompleted(MarkCompleted),
    MarkFailed(MarkFailed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOpened {
    pub settlement_id: SettlementId,
    pub title_id: TitleId,
    pub bid_id: AggregateId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub price: Amount,
    pub allocations: Vec<Allocation>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCompleted {
    pub settlement_id: SettlementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailed {
    pub settlement_id: SettlementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEvent {
    SettlementOpened(SettlementOpened),
    SettlementCompleted(SettlementCompleted),
    SettlementFailed(SettlementFailed),
}

impl Event for SettlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettlementEvent::SettlementOpened(_) => "settlement.opened",
            SettlementEvent::SettlementCompleted(_) => "settlement.completed",
            SettlementEvent::SettlementFailed(_) => "settlement.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettlementEvent::SettlementOpened(e) => e.occurred_at,
            SettlementEvent::SettlementCompleted(e) => e.occurred_at,
            SettlementEvent::SettlementFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Settlement {
    type Command = SettlementCommand;
    type Event = SettlementEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettlementEvent::SettlementOpened(e) => {
                self.title_id = Some(e.title_id);
                self.bid_id = Some(e.bid_id);
                self.buyer_id = Some(e.buyer_id);
                self.seller_id = Some(e.seller_id);
                self.price = e.price;
                self.allocations = e.allocations.clone();
                self.status = SettlementStatus::Pending;
            }
            SettlementEvent::SettlementCompleted(_) => {
                self.status = SettlementStatus::Completed;
            }
            SettlementEvent::SettlementFailed(e) => {
                self.status = SettlementStatus::Failed;
                self.failure_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>> {
        match command {
            SettlementCommand::OpenSettlement(cmd) => self.handle_open(cmd),
            SettlementCommand::MarkCompleted(cmd) => self.handle_completed(cmd),
            SettlementCommand::MarkFailed(cmd) => self.handle_failed(cmd),
        }
    }
}

impl Settlement {
    fn ensure_id(&self, settlement_id: SettlementId) -> MarketResult<()> {
        if self.id != settlement_id {
            return Err(MarketError::internal("settlement id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSettlement) -> MarketResult<Vec<SettlementEvent>> {
        self.ensure_id(cmd.settlement_id)?;
        if self.title_id.is_some() {
            // A resumed pipeline re-opens with the same frozen trade; that
            // replay records nothing.
            if self.title_id == Some(cmd.title_id) && self.bid_id == Some(cmd.bid_id) {
                return Ok(vec![]);
            }
            return Err(MarketError::validation("settlement already opened"));
        }
        if cmd.buyer_id == cmd.seller_id {
            return Err(MarketError::validation(
                "buyer and seller must be distinct parties",
            ));
        }

        let allocations = allocate(
            cmd.price,
            cmd.fee_rate,
            cmd.buyer_id,
            cmd.seller_id,
            cmd.platform_account,
        )?;

        Ok(vec![SettlementEvent::SettlementOpened(SettlementOpened {
            settlement_id: cmd.settlement_id,
            title_id: cmd.title_id,
            bid_id: cmd.bid_id,
            buyer_id: cmd.buyer_id,
            seller_id: cmd.seller_id,
            price: cmd.price,
            allocations,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_completed(&self, cmd: &MarkCompleted) -> MarketResult<Vec<SettlementEvent>> {
        self.ensure_id(cmd.settlement_id)?;
        match self.status {
            // Replay of the completion is a no-op.
            SettlementStatus::Completed => Ok(vec![]),
            SettlementStatus::Failed => Err(MarketError::illegal_transition(
                "failed settlement cannot complete",
            )),
            SettlementStatus::Pending => {
                if self.title_id.is_none() {
                    return Err(MarketError::validation("settlement was never opened"));
                }
                Ok(vec![SettlementEvent::SettlementCompleted(
                    SettlementCompleted {
                        settlement_id: cmd.settlement_id,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
        }
    }

    fn handle_failed(&self, cmd: &MarkFailed) -> MarketResult<Vec<SettlementEvent>> {
        self.ensure_id(cmd.settlement_id)?;
        match self.status {
            SettlementStatus::Failed => Ok(vec![]),
            SettlementStatus::Completed => Err(MarketError::illegal_transition(
                "completed settlement cannot fail",
            )),
            SettlementStatus::Pending => {
                if self.title_id.is_none() {
                    return Err(MarketError::validation("settlement was never opened"));
                }
                Ok(vec![SettlementEvent::SettlementFailed(SettlementFailed {
                    settlement_id: cmd.settlement_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
