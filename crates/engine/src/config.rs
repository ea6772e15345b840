//! Marketplace configuration.

use serde::{Deserialize, Serialize};

use credmart_core::{FeeRate, UserId};

/// What happens to the listing when a dutch auction ends without a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutchClosePolicy {
    /// Keep the title listed at its original price.
    #[default]
    Relist,
    /// Cancel the listing; the title returns to `Tokenized`.
    Delist,
}

/// Engine-wide settings.
///
/// `platform_account` is the wallet that collects fees; it must exist before
/// the first settlement runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    pub fee_rate: FeeRate,
    pub platform_account: UserId,
    #[serde(default)]
    pub dutch_close_policy: DutchClosePolicy,
    /// Retry budget for commands that lose an optimistic-concurrency race.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl MarketplaceConfig {
    pub fn new(fee_rate: FeeRate, platform_account: UserId) -> Self {
        Self {
            fee_rate,
            platform_account,
            dutch_close_policy: DutchClosePolicy::default(),
            max_retries: default_max_retries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let cfg: MarketplaceConfig = serde_json::from_str(&format!(
            r#"{{ "fee_rate": 250, "platform_account": "{}" }}"#,
            UserId::new()
        ))
        .unwrap();
        assert_eq!(cfg.fee_rate.basis_points(), 250);
        assert_eq!(cfg.dutch_close_policy, DutchClosePolicy::Relist);
        assert_eq!(cfg.max_retries, 3);
    }
}
