//! Settlement execution against the wallet ledger.
//!
//! Runs the money movements for one opened settlement: hold the buyer's
//! funds, finalize the debit, then pay out each creditor line. Every wallet
//! command carries an idempotency key derived from the settlement id, so a
//! crashed or retried execution never moves money twice.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use credmart_core::{AggregateId, AggregateRoot, MarketError, MarketResult, UserId};
use credmart_events::{EventBus, EventEnvelope};
use credmart_settlement::allocation::{AllocationRole, Party};
use credmart_settlement::{Settlement, SettlementStatus};
use credmart_wallet::account::{Credit, Reserve, SettleReservation};
use credmart_wallet::{WalletAccount, WalletCommand, WalletId, WalletTransactionKind};

use crate::dispatcher::CommandDispatcher;
use crate::store::EventStore;

/// Stream id for a user's wallet. One stream per user serializes all of that
/// user's money movement through the optimistic append.
pub(crate) fn wallet_stream(user_id: UserId) -> AggregateId {
    AggregateId::from_uuid(Uuid::from(user_id))
}

pub(crate) const WALLET_AGGREGATE_TYPE: &str = "wallet.account";

/// Result of executing a settlement's money movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed,
    /// The buyer could not cover the price; no funds moved.
    Failed { reason: String },
}

/// Execute the wallet movements for an opened settlement.
///
/// The buyer's reservation is the only step that can fail for business
/// reasons; it happens before any balance changes, so a `Failed` outcome
/// leaves every wallet exactly as it was. Later steps only fail on
/// infrastructure errors, which are surfaced to the caller for retry — the
/// idempotency keys make the whole sequence safely re-runnable.
pub fn execute<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    settlement: &Settlement,
    max_retries: u32,
    now: DateTime<Utc>,
) -> MarketResult<SettlementOutcome>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    if settlement.status() != SettlementStatus::Pending {
        return Err(MarketError::internal("settlement is not pending execution"));
    }
    let buyer_id = settlement
        .buyer_id()
        .ok_or_else(|| MarketError::internal("settlement has no buyer"))?;
    let settlement_id = *settlement.id();
    let price = settlement.price();
    let hold_key = format!("settlement:{settlement_id}:hold");

    let dispatch_wallet = |user_id: UserId, command: WalletCommand| {
        dispatcher.dispatch_with_retry::<WalletAccount>(
            wallet_stream(user_id),
            WALLET_AGGREGATE_TYPE,
            command,
            |_| WalletAccount::empty(WalletId::new(user_id)),
            max_retries,
        )
    };

    // 1) Hold the full price from the buyer's available funds.
    let reserve = dispatch_wallet(
        buyer_id,
        WalletCommand::Reserve(Reserve {
            user_id: buyer_id,
            amount: price,
            idempotency_key: hold_key.clone(),
            reference: Some(settlement_id.to_string()),
            reference_kind: Some("settlement".to_string()),
            occurred_at: now,
        }),
    );
    if let Err(err) = reserve {
        if let MarketError::InsufficientFunds { .. } = err {
            tracing::warn!(%settlement_id, %buyer_id, "settlement aborted: {err}");
            return Ok(SettlementOutcome::Failed {
                reason: err.to_string(),
            });
        }
        return Err(err);
    }

    // 2) Finalize the debit.
    dispatch_wallet(
        buyer_id,
        WalletCommand::SettleReservation(SettleReservation {
            user_id: buyer_id,
            amount: price,
            idempotency_key: hold_key,
            occurred_at: now,
        }),
    )?;

    // 3) Pay out every creditor line. Zero-value lines (a zero fee) are
    //    skipped; the ledger rejects empty credits.
    for line in settlement.allocations() {
        if line.role != AllocationRole::Creditor || line.value == 0 {
            continue;
        }
        let kind = match line.party {
            Party::Platform => WalletTransactionKind::PlatformFee,
            Party::Seller | Party::Buyer => WalletTransactionKind::TradeCredit,
        };
        dispatch_wallet(
            line.participant,
            WalletCommand::Credit(Credit {
                user_id: line.participant,
                amount: line.value,
                kind,
                reference: Some(settlement_id.to_string()),
                reference_kind: Some("settlement".to_string()),
                idempotency_key: Some(format!(
                    "settlement:{settlement_id}:{:?}:{}",
                    line.party, line.participant
                )),
                occurred_at: now,
            }),
        )?;
    }

    Ok(SettlementOutcome::Completed)
}
