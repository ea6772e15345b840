use serde::{Deserialize, Serialize};

use credmart_core::{Amount, FeeRate, MarketError, MarketResult, UserId};

/// Which side of the trade a participant stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
    Platform,
}

/// Direction of the money movement for one allocation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRole {
    /// Funds leave this participant's wallet.
    Debtor,
    /// Funds arrive in this participant's wallet.
    Creditor,
}

/// One line of the settlement split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: UserId,
    pub party: Party,
    pub role: AllocationRole,
    pub value: Amount,
}

/// Split one trade at `price` into its allocation lines.
///
/// The buyer is debited the full price; the seller is credited the price net
/// of the platform fee; the platform is credited the fee. Debits always equal
/// credits, so no money is created or destroyed by a settlement.
pub fn allocate(
    price: Amount,
    fee_rate: FeeRate,
    buyer: UserId,
    seller: UserId,
    platform: UserId,
) -> MarketResult<Vec<Allocation>> {
    if price == 0 {
        return Err(MarketError::validation("settlement price must be positive"));
    }

    let fee = fee_rate.fee_on(price);
    let seller_net = price - fee;

    let allocations = vec![
        Allocation {
            participant: buyer,
            party: Party::Buyer,
            role: AllocationRole::Debtor,
            value: price,
        },
        Allocation {
            participant: seller,
            party: Party::Seller,
            role: AllocationRole::Creditor,
            value: seller_net,
        },
        Allocation {
            participant: platform,
            party: Party::Platform,
            role: AllocationRole::Creditor,
            value: fee,
        },
    ];

    let debits: Amount = allocations
        .iter()
        .filter(|a| a.role == AllocationRole::Debtor)
        .map(|a| a.value)
        .sum();
    let credits: Amount = allocations
        .iter()
        .filter(|a| a.role == AllocationRole::Creditor)
        .map(|a| a.value)
        .sum();
    if debits != credits {
        return Err(MarketError::internal(format!(
            "allocation imbalance: debits {debits} != credits {credits}"
        )));
    }

    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parties() -> (UserId, UserId, UserId) {
        (UserId::new(), UserId::new(), UserId::new())
    }

    #[test]
    fn splits_price_into_fee_and_seller_net() {
        let (buyer, seller, platform) = parties();
        // 10,000.00 at 2.5%: fee 250.00, seller nets 9,750.00.
        let lines = allocate(1_000_000, FeeRate::from_basis_points(250).unwrap(), buyer, seller, platform)
            .unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].role, AllocationRole::Debtor);
        assert_eq!(lines[0].value, 1_000_000);
        assert_eq!(lines[1].participant, seller);
        assert_eq!(lines[1].value, 975_000);
        assert_eq!(lines[2].participant, platform);
        assert_eq!(lines[2].value, 25_000);
    }

    #[test]
    fn zero_fee_sends_everything_to_the_seller() {
        let (buyer, seller, platform) = parties();
        let lines = allocate(777, FeeRate::from_basis_points(0).unwrap(), buyer, seller, platform)
            .unwrap();
        assert_eq!(lines[1].value, 777);
        assert_eq!(lines[2].value, 0);
    }

    #[test]
    fn zero_price_is_rejected() {
        let (buyer, seller, platform) = parties();
        let err = allocate(0, FeeRate::from_basis_points(250).unwrap(), buyer, seller, platform)
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    proptest! {
        #[test]
        fn debits_always_equal_credits(price in 1u64..=10_000_000_000, bps in 0u32..10_000) {
            let (buyer, seller, platform) = parties();
            let rate = FeeRate::from_basis_points(bps).unwrap();
            let lines = allocate(price, rate, buyer, seller, platform).unwrap();

            let debits: Amount = lines.iter()
                .filter(|a| a.role == AllocationRole::Debtor)
                .map(|a| a.value)
                .sum();
            let credits: Amount = lines.iter()
                .filter(|a| a.role == AllocationRole::Creditor)
                .map(|a| a.value)
                .sum();
            prop_assert_eq!(debits, price);
            prop_assert_eq!(debits, credits);
        }
    }
}
