//! # Limit Schemes
//!
//! How a voucher counts its usage. A scheme is chosen when the voucher is
//! created and never changes afterwards.
//!
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────────────────────┐
//! │ Scheme   │ Counter                      │ Exhausted when           │
//! ├──────────┼──────────────────────────────┼──────────────────────────┤
//! │ Global   │ one, on the voucher          │ voucher-wide limit hit   │
//! │ Redeemer │ one per redeemer             │ that redeemer's limit    │
//! │ Item     │ one per allow-listed item    │ that item's limit        │
//! └──────────┴──────────────────────────────┴──────────────────────────┘
//! ```

use crate::error::VoucherError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Usage-counting strategy of a voucher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScheme {
    /// One shared counter; any redeemer may redeem until the voucher-wide limit
    Global,
    /// One counter per redeemer
    Redeemer,
    /// One counter per (item-type, item-id) on the voucher's allow-list
    Item,
}

impl LimitScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScheme::Global => "global",
            LimitScheme::Redeemer => "redeemer",
            LimitScheme::Item => "item",
        }
    }

    /// Item-scheme vouchers require the caller to name items
    pub fn requires_items(&self) -> bool {
        matches!(self, LimitScheme::Item)
    }
}

impl Default for LimitScheme {
    fn default() -> Self {
        LimitScheme::Global
    }
}

impl std::fmt::Display for LimitScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitScheme {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(LimitScheme::Global),
            "redeemer" => Ok(LimitScheme::Redeemer),
            "item" => Ok(LimitScheme::Item),
            other => Err(VoucherError::Configuration(format!(
                "unknown limit scheme: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for scheme in [LimitScheme::Global, LimitScheme::Redeemer, LimitScheme::Item] {
            assert_eq!(scheme.as_str().parse::<LimitScheme>().unwrap(), scheme);
        }
        assert_eq!("ITEM".parse::<LimitScheme>().unwrap(), LimitScheme::Item);
    }

    #[test]
    fn test_unknown_scheme() {
        let err = "per-order".parse::<LimitScheme>().unwrap_err();
        assert!(matches!(err, VoucherError::Configuration(_)));
    }

    #[test]
    fn test_only_item_requires_items() {
        assert!(LimitScheme::Item.requires_items());
        assert!(!LimitScheme::Global.requires_items());
        assert!(!LimitScheme::Redeemer.requires_items());
    }
}
