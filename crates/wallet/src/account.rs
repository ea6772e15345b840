use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use credmart_core::{Aggregate, AggregateRoot, Amount, MarketError, MarketResult, UserId};
use credmart_events::Event;

/// Wallet identifier. One wallet per user; the stream id is derived from the
/// user id, which is what serializes concurrent operations per user while
/// letting different users' wallets proceed fully in parallel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub UserId);

impl WalletId {
    pub fn new(user_id: UserId) -> Self {
        Self(user_id)
    }

    pub fn user_id(&self) -> UserId {
        self.0
    }
}

impl core::fmt::Display for WalletId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Ledger transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTransactionKind {
    Deposit,
    Withdrawal,
    PlatformFee,
    TradeCredit,
    TradeDebit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One row of the per-user transaction history, rebuilt from events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: WalletTransactionKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub reference_kind: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Balance view returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: UserId,
    pub balance: Amount,
    pub pending_balance: Amount,
    pub available_balance: Amount,
}

/// Aggregate root: WalletAccount.
///
/// Invariants after every applied event: `balance ≥ pending_balance` (so
/// `available ≥ 0`) and each idempotency key applies at most once. A wallet
/// that has never seen an event is the zero balance — first access never
/// fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAccount {
    id: WalletId,
    balance: Amount,
    pending: Amount,
    /// Open holds: idempotency key -> reserved amount.
    reservations: HashMap<String, Amount>,
    /// Keys whose reservation was settled or released. Replays no-op.
    consumed_keys: HashSet<String>,
    /// Keys already applied by `Credit`. Replays no-op.
    credited_keys: HashSet<String>,
    transactions: Vec<WalletTransaction>,
    version: u64,
}

impl WalletAccount {
    /// Zero-balance wallet for rehydration (and for first access).
    pub fn empty(id: WalletId) -> Self {
        Self {
            id,
            balance: 0,
            pending: 0,
            reservations: HashMap::new(),
            consumed_keys: HashSet::new(),
            credited_keys: HashSet::new(),
            transactions: Vec::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> WalletId {
        self.id
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn pending_balance(&self) -> Amount {
        self.pending
    }

    pub fn available(&self) -> Amount {
        self.balance - self.pending
    }

    pub fn open_reservation(&self, key: &str) -> Option<Amount> {
        self.reservations.get(key).copied()
    }

    pub fn transactions(&self) -> &[WalletTransaction] {
        &self.transactions
    }

    pub fn balance_view(&self) -> WalletBalance {
        WalletBalance {
            user_id: self.id.user_id(),
            balance: self.balance,
            pending_balance: self.pending,
            available_balance: self.available(),
        }
    }
}

impl AggregateRoot for WalletAccount {
    type Id = WalletId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Deposit (external money in; always succeeds for amount > 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub user_id: UserId,
    pub amount: Amount,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Withdraw (fails when available funds cannot cover it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub user_id: UserId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reserve — hold `amount` from available without touching balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    pub user_id: UserId,
    pub amount: Amount,
    pub idempotency_key: String,
    pub reference: Option<String>,
    pub reference_kind: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SettleReservation — consume a prior hold, finalizing the debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleReservation {
    pub user_id: UserId,
    pub amount: Amount,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Release — cancel a hold, returning the funds to available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub user_id: UserId,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Credit — direct balance increase (sale proceeds, platform fee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub user_id: UserId,
    pub amount: Amount,
    pub kind: WalletTransactionKind,
    pub reference: Option<String>,
    pub reference_kind: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletCommand {
    Deposit(Deposit),
    Withdraw(Withdraw),
    Reserve(Reserve),
    SettleReservation(SettleReservation),
    Release(Release),
    Credit(Credit),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub user_id: UserId,
    pub amount: Amount,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsWithdrawn {
    pub user_id: UserId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsReserved {
    pub user_id: UserId,
    pub amount: Amount,
    pub idempotency_key: String,
    pub reference: Option<String>,
    pub reference_kind: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSettled {
    pub user_id: UserId,
    /// Finalized debit; the full hold is removed and any excess returns to
    /// available.
    pub amount: Amount,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub user_id: UserId,
    pub amount: Amount,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsCredited {
    pub user_id: UserId,
    pub amount: Amount,
    pub kind: WalletTransactionKind,
    pub reference: Option<String>,
    pub reference_kind: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    FundsDeposited(FundsDeposited),
    FundsWithdrawn(FundsWithdrawn),
    FundsReserved(FundsReserved),
    ReservationSettled(ReservationSettled),
    ReservationReleased(ReservationReleased),
    FundsCredited(FundsCredited),
}

impl Event for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::FundsDeposited(_) => "wallet.funds_deposited",
            WalletEvent::FundsWithdrawn(_) => "wallet.funds_withdrawn",
            WalletEvent::FundsReserved(_) => "wallet.funds_reserved",
            WalletEvent::ReservationSettled(_) => "wallet.reservation_settled",
            WalletEvent::ReservationReleased(_) => "wallet.reservation_released",
            WalletEvent::FundsCredited(_) => "wallet.funds_credited",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WalletEvent::FundsDeposited(e) => e.occurred_at,
            WalletEvent::FundsWithdrawn(e) => e.occurred_at,
            WalletEvent::FundsReserved(e) => e.occurred_at,
            WalletEvent::ReservationSettled(e) => e.occurred_at,
            WalletEvent::ReservationReleased(e) => e.occurred_at,
            WalletEvent::FundsCredited(e) => e.occurred_at,
        }
    }
}

impl Aggregate for WalletAccount {
    type Command = WalletCommand;
    type Event = WalletEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WalletEvent::FundsDeposited(e) => {
                self.balance += e.amount;
                self.push_tx(
                    WalletTransactionKind::Deposit,
                    e.amount,
                    TransactionStatus::Completed,
                    e.reference.clone(),
                    None,
                    None,
                    e.occurred_at,
                );
            }
            WalletEvent::FundsWithdrawn(e) => {
                self.balance -= e.amount;
                self.push_tx(
                    WalletTransactionKind::Withdrawal,
                    e.amount,
                    TransactionStatus::Completed,
                    None,
                    None,
                    None,
                    e.occurred_at,
                );
            }
            WalletEvent::FundsReserved(e) => {
                self.pending += e.amount;
                self.reservations
                    .insert(e.idempotency_key.clone(), e.amount);
                self.push_tx(
                    WalletTransactionKind::TradeDebit,
                    e.amount,
                    TransactionStatus::Pending,
                    e.reference.clone(),
                    e.reference_kind.clone(),
                    Some(e.idempotency_key.clone()),
                    e.occurred_at,
                );
            }
            WalletEvent::ReservationSettled(e) => {
                let held = self
                    .reservations
                    .remove(&e.idempotency_key)
                    .unwrap_or(e.amount);
                self.balance -= e.amount;
                self.pending -= held;
                self.consumed_keys.insert(e.idempotency_key.clone());
                self.finalize_tx(&e.idempotency_key, e.amount, TransactionStatus::Completed);
            }
            WalletEvent::ReservationReleased(e) => {
                self.reservations.remove(&e.idempotency_key);
                self.pending -= e.amount;
                self.consumed_keys.insert(e.idempotency_key.clone());
                self.finalize_tx(&e.idempotency_key, e.amount, TransactionStatus::Failed);
            }
            WalletEvent::FundsCredited(e) => {
                self.balance += e.amount;
                if let Some(key) = &e.idempotency_key {
                    self.credited_keys.insert(key.clone());
                }
                self.push_tx(
                    e.kind,
                    e.amount,
                    TransactionStatus::Completed,
                    e.reference.clone(),
                    e.reference_kind.clone(),
                    e.idempotency_key.clone(),
                    e.occurred_at,
                );
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>> {
        match command {
            WalletCommand::Deposit(cmd) => {
                ensure_positive(cmd.amount)?;
                self.ensure_user(cmd.user_id)?;
                self.ensure_headroom(cmd.amount)?;
                Ok(vec![WalletEvent::FundsDeposited(FundsDeposited {
                    user_id: cmd.user_id,
                    amount: cmd.amount,
                    reference: cmd.reference.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            WalletCommand::Withdraw(cmd) => {
                ensure_positive(cmd.amount)?;
                self.ensure_user(cmd.user_id)?;
                self.ensure_available(cmd.amount)?;
                Ok(vec![WalletEvent::FundsWithdrawn(FundsWithdrawn {
                    user_id: cmd.user_id,
                    amount: cmd.amount,
                    occurred_at: cmd.occurred_at,
                })])
            }
            WalletCommand::Reserve(cmd) => self.handle_reserve(cmd),
            WalletCommand::SettleReservation(cmd) => self.handle_settle(cmd),
            WalletCommand::Release(cmd) => self.handle_release(cmd),
            WalletCommand::Credit(cmd) => self.handle_credit(cmd),
        }
    }
}

impl WalletAccount {
    fn ensure_user(&self, user_id: UserId) -> MarketResult<()> {
        if self.id.user_id() != user_id {
            return Err(MarketError::internal("wallet user_id mismatch"));
        }
        Ok(())
    }

    fn ensure_available(&self, amount: Amount) -> MarketResult<()> {
        let available = self.available();
        if available < amount {
            return Err(MarketError::InsufficientFunds {
                available,
                required: amount,
            });
        }
        Ok(())
    }

    /// Inflows must not wrap the balance counter.
    fn ensure_headroom(&self, amount: Amount) -> MarketResult<()> {
        if self.balance.checked_add(amount).is_none() {
            return Err(MarketError::validation("balance overflow"));
        }
        Ok(())
    }

    fn handle_reserve(&self, cmd: &Reserve) -> MarketResult<Vec<WalletEvent>> {
        ensure_positive(cmd.amount)?;
        self.ensure_user(cmd.user_id)?;

        // Replay of a known key is a no-op, whether the hold is still open or
        // already consumed.
        if self.reservations.contains_key(&cmd.idempotency_key)
            || self.consumed_keys.contains(&cmd.idempotency_key)
        {
            return Ok(vec![]);
        }

        self.ensure_available(cmd.amount)?;

        Ok(vec![WalletEvent::FundsReserved(FundsReserved {
            user_id: cmd.user_id,
            amount: cmd.amount,
            idempotency_key: cmd.idempotency_key.clone(),
            reference: cmd.reference.clone(),
            reference_kind: cmd.reference_kind.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_settle(&self, cmd: &SettleReservation) -> MarketResult<Vec<WalletEvent>> {
        ensure_positive(cmd.amount)?;
        self.ensure_user(cmd.user_id)?;

        if self.consumed_keys.contains(&cmd.idempotency_key) {
            return Ok(vec![]);
        }

        let held = self
            .reservations
            .get(&cmd.idempotency_key)
            .copied()
            .ok_or_else(|| MarketError::NoMatchingReservation(cmd.idempotency_key.clone()))?;

        if held < cmd.amount {
            return Err(MarketError::NoMatchingReservation(format!(
                "{} (held {held}, requested {})",
                cmd.idempotency_key, cmd.amount
            )));
        }

        Ok(vec![WalletEvent::ReservationSettled(ReservationSettled {
            user_id: cmd.user_id,
            amount: cmd.amount,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &Release) -> MarketResult<Vec<WalletEvent>> {
        self.ensure_user(cmd.user_id)?;

        if self.consumed_keys.contains(&cmd.idempotency_key) {
            return Ok(vec![]);
        }

        let held = self
            .reservations
            .get(&cmd.idempotency_key)
            .copied()
            .ok_or_else(|| MarketError::NoMatchingReservation(cmd.idempotency_key.clone()))?;

        Ok(vec![WalletEvent::ReservationReleased(ReservationReleased {
            user_id: cmd.user_id,
            amount: held,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_credit(&self, cmd: &Credit) -> MarketResult<Vec<WalletEvent>> {
        ensure_positive(cmd.amount)?;
        self.ensure_user(cmd.user_id)?;

        if matches!(
            cmd.kind,
            WalletTransactionKind::Withdrawal | WalletTransactionKind::TradeDebit
        ) {
            return Err(MarketError::validation(
                "credit requires a credit-side transaction kind",
            ));
        }

        if let Some(key) = &cmd.idempotency_key {
            if self.credited_keys.contains(key) {
                return Ok(vec![]);
            }
        }

        self.ensure_headroom(cmd.amount)?;

        Ok(vec![WalletEvent::FundsCredited(FundsCredited {
            user_id: cmd.user_id,
            amount: cmd.amount,
            kind: cmd.kind,
            reference: cmd.reference.clone(),
            reference_kind: cmd.reference_kind.clone(),
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    #[allow(clippy::too_many_arguments)]
    fn push_tx(
        &mut self,
        kind: WalletTransactionKind,
        amount: Amount,
        status: TransactionStatus,
        reference: Option<String>,
        reference_kind: Option<String>,
        idempotency_key: Option<String>,
        created_at: DateTime<Utc>,
    ) {
        self.transactions.push(WalletTransaction {
            id: Uuid::now_v7(),
            user_id: self.id.user_id(),
            kind,
            amount,
            status,
            reference,
            reference_kind,
            idempotency_key,
            created_at,
        });
    }

    /// Complete or fail the pending transaction opened by a reservation.
    fn finalize_tx(&mut self, key: &str, amount: Amount, status: TransactionStatus) {
        if let Some(tx) = self
            .transactions
            .iter_mut()
            .rev()
            .find(|tx| tx.idempotency_key.as_deref() == Some(key))
        {
            tx.amount = amount;
            tx.status = status;
        }
    }
}

fn ensure_positive(amount: Amount) -> MarketResult<()> {
    if amount == 0 {
        return Err(MarketError::validation("amount must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wallet() -> WalletAccount {
        WalletAccount::empty(WalletId::new(UserId::new()))
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn drive(w: &mut WalletAccount, cmd: WalletCommand) -> Vec<WalletEvent> {
        let events = w.handle(&cmd).unwrap();
        for e in &events {
            w.apply(e);
        }
        events
    }

    fn deposit(w: &mut WalletAccount, amount: Amount) {
        let user = w.id_typed().user_id();
        drive(
            w,
            WalletCommand::Deposit(Deposit {
                user_id: user,
                amount,
                reference: None,
                occurred_at: test_time(),
            }),
        );
    }

    #[test]
    fn fresh_wallet_is_zero_balance() {
        let w = wallet();
        let view = w.balance_view();
        assert_eq!(view.balance, 0);
        assert_eq!(view.pending_balance, 0);
        assert_eq!(view.available_balance, 0);
    }

    #[test]
    fn inflows_that_would_wrap_the_balance_are_refused() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, u64::MAX - 10);

        let err = w
            .handle(&WalletCommand::Deposit(Deposit {
                user_id: user,
                amount: 11,
                reference: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let err = w
            .handle(&WalletCommand::Credit(Credit {
                user_id: user,
                amount: 11,
                kind: WalletTransactionKind::TradeCredit,
                reference: None,
                reference_kind: None,
                idempotency_key: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        // A deposit that lands exactly at the ceiling still goes through.
        deposit(&mut w, 10);
        assert_eq!(w.balance(), u64::MAX);
    }

    #[test]
    fn reserve_moves_funds_to_pending_without_touching_balance() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 1_000);

        drive(
            &mut w,
            WalletCommand::Reserve(Reserve {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                reference: None,
                reference_kind: None,
                occurred_at: test_time(),
            }),
        );

        assert_eq!(w.balance(), 1_000);
        assert_eq!(w.pending_balance(), 600);
        assert_eq!(w.available(), 400);
    }

    #[test]
    fn reserve_fails_when_available_cannot_cover() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 500);

        let err = w
            .handle(&WalletCommand::Reserve(Reserve {
                user_id: user,
                amount: 10_000,
                idempotency_key: "stl-1".into(),
                reference: None,
                reference_kind: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();

        assert_eq!(
            err,
            MarketError::InsufficientFunds {
                available: 500,
                required: 10_000
            }
        );
    }

    #[test]
    fn settle_consumes_the_reservation_and_completes_one_transaction() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 1_000);

        drive(
            &mut w,
            WalletCommand::Reserve(Reserve {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                reference: Some("settlement-1".into()),
                reference_kind: Some("settlement".into()),
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut w,
            WalletCommand::SettleReservation(SettleReservation {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                occurred_at: test_time(),
            }),
        );

        assert_eq!(w.balance(), 400);
        assert_eq!(w.pending_balance(), 0);
        assert_eq!(w.available(), 400);

        let debits: Vec<_> = w
            .transactions()
            .iter()
            .filter(|t| t.kind == WalletTransactionKind::TradeDebit)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].status, TransactionStatus::Completed);
        assert_eq!(debits[0].amount, 600);
    }

    #[test]
    fn settle_is_idempotent_per_key() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 1_000);

        drive(
            &mut w,
            WalletCommand::Reserve(Reserve {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                reference: None,
                reference_kind: None,
                occurred_at: test_time(),
            }),
        );
        let settle = WalletCommand::SettleReservation(SettleReservation {
            user_id: user,
            amount: 600,
            idempotency_key: "stl-1".into(),
            occurred_at: test_time(),
        });
        let first = drive(&mut w, settle.clone());
        assert_eq!(first.len(), 1);

        // Replay: no new events, no balance change, still one debit row.
        let replay = drive(&mut w, settle);
        assert!(replay.is_empty());
        assert_eq!(w.balance(), 400);
        let debits = w
            .transactions()
            .iter()
            .filter(|t| t.kind == WalletTransactionKind::TradeDebit)
            .count();
        assert_eq!(debits, 1);
    }

    #[test]
    fn settle_without_reservation_is_rejected() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 1_000);

        let err = w
            .handle(&WalletCommand::SettleReservation(SettleReservation {
                user_id: user,
                amount: 100,
                idempotency_key: "missing".into(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::NoMatchingReservation(_)));
    }

    #[test]
    fn release_returns_the_hold_to_available_and_fails_the_transaction() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        deposit(&mut w, 1_000);

        drive(
            &mut w,
            WalletCommand::Reserve(Reserve {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                reference: None,
                reference_kind: None,
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut w,
            WalletCommand::Release(Release {
                user_id: user,
                idempotency_key: "stl-1".into(),
                occurred_at: test_time(),
            }),
        );

        assert_eq!(w.balance(), 1_000);
        assert_eq!(w.available(), 1_000);
        let debit = w
            .transactions()
            .iter()
            .find(|t| t.kind == WalletTransactionKind::TradeDebit)
            .unwrap();
        assert_eq!(debit.status, TransactionStatus::Failed);

        // Settle after release is a no-op, not an error.
        let replay = drive(
            &mut w,
            WalletCommand::SettleReservation(SettleReservation {
                user_id: user,
                amount: 600,
                idempotency_key: "stl-1".into(),
                occurred_at: test_time(),
            }),
        );
        assert!(replay.is_empty());
    }

    #[test]
    fn credit_rejects_debit_kinds() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        let err = w
            .handle(&WalletCommand::Credit(Credit {
                user_id: user,
                amount: 100,
                kind: WalletTransactionKind::TradeDebit,
                reference: None,
                reference_kind: None,
                idempotency_key: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn credit_is_idempotent_when_keyed() {
        let mut w = wallet();
        let user = w.id_typed().user_id();
        let credit = WalletCommand::Credit(Credit {
            user_id: user,
            amount: 250,
            kind: WalletTransactionKind::PlatformFee,
            reference: Some("settlement-1".into()),
            reference_kind: Some("settlement".into()),
            idempotency_key: Some("fee-1".into()),
            occurred_at: test_time(),
        });

        drive(&mut w, credit.clone());
        let replay = drive(&mut w, credit);
        assert!(replay.is_empty());
        assert_eq!(w.balance(), 250);
        assert_eq!(w.transactions().len(), 1);
    }

    proptest! {
        /// Property: any sequence of wallet operations keeps
        /// `available = balance - pending ≥ 0` (commands that would break it
        /// fail instead).
        #[test]
        fn available_balance_never_goes_negative(
            ops in prop::collection::vec((0usize..5, 1u64..2_000, 0usize..6), 1..60)
        ) {
            let mut w = wallet();
            let user = w.id_typed().user_id();

            for (op, amount, key_no) in ops {
                let key = format!("key-{key_no}");
                let now = test_time();
                let cmd = match op {
                    0 => WalletCommand::Deposit(Deposit { user_id: user, amount, reference: None, occurred_at: now }),
                    1 => WalletCommand::Withdraw(Withdraw { user_id: user, amount, occurred_at: now }),
                    2 => WalletCommand::Reserve(Reserve { user_id: user, amount, idempotency_key: key, reference: None, reference_kind: None, occurred_at: now }),
                    3 => WalletCommand::SettleReservation(SettleReservation { user_id: user, amount, idempotency_key: key, occurred_at: now }),
                    _ => WalletCommand::Release(Release { user_id: user, idempotency_key: key, occurred_at: now }),
                };

                if let Ok(events) = w.handle(&cmd) {
                    for e in &events {
                        w.apply(e);
                    }
                }

                prop_assert!(w.balance() >= w.pending_balance());
            }
        }
    }
}
