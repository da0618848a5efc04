//! # Voucher Types
//!
//! The voucher record and the catalog used to seed a store.
//! Catalogs are usually loaded from `config/vouchers.toml`.

use crate::error::{VoucherError, VoucherResult};
use crate::model::{ModelRef, VoucherItem};
use crate::scheme::LimitScheme;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A redeemable voucher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    /// Unique voucher id (generated)
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Redeemable code (e.g. "SAVE10")
    pub code: String,

    /// Usage-counting scheme, fixed at creation
    #[serde(default)]
    limit_scheme: LimitScheme,

    /// Single use per counted subject, regardless of `quantity`
    #[serde(default)]
    pub disposable: bool,

    /// Max redemptions per counted subject (`None` = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,

    /// Item allow-list (item scheme only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<VoucherItem>,

    /// Whether the voucher can be looked up by code
    #[serde(default = "default_true")]
    pub active: bool,

    /// Not redeemable before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,

    /// Not redeemable from this instant on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// If non-empty, only these redeemers may redeem
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_redeemers: Vec<ModelRef>,

    /// These redeemers may never redeem
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_redeemers: Vec<ModelRef>,

    /// Custom metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    /// Created timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Voucher {
    /// Create an active, multi-use voucher with no limit
    pub fn new(code: impl Into<String>, limit_scheme: LimitScheme) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            limit_scheme,
            disposable: false,
            quantity: None,
            items: Vec::new(),
            active: true,
            starts_at: None,
            expires_at: None,
            allowed_redeemers: Vec::new(),
            denied_redeemers: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// The usage-counting scheme
    pub fn scheme(&self) -> LimitScheme {
        self.limit_scheme
    }

    /// Builder: single use per subject
    pub fn disposable(mut self) -> Self {
        self.disposable = true;
        self
    }

    /// Builder: max redemptions per subject
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Builder: add an allow-listed item
    pub fn with_item(mut self, item: VoucherItem) -> Self {
        self.items.push(item);
        self
    }

    /// Builder: restrict redemption window
    pub fn with_window(
        mut self,
        starts_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.starts_at = starts_at;
        self.expires_at = expires_at;
        self
    }

    /// Builder: allow a redeemer (restricts to the allowed set)
    pub fn allow_redeemer(mut self, redeemer: ModelRef) -> Self {
        self.allowed_redeemers.push(redeemer);
        self
    }

    /// Builder: deny a redeemer
    pub fn deny_redeemer(mut self, redeemer: ModelRef) -> Self {
        self.denied_redeemers.push(redeemer);
        self
    }

    /// Builder: add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder: deactivate
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check record invariants
    pub fn validate(&self) -> VoucherResult<()> {
        if self.code.trim().is_empty() {
            return Err(VoucherError::InvalidInput(
                "voucher code must not be empty".to_string(),
            ));
        }
        if self.quantity == Some(0) {
            return Err(VoucherError::InvalidInput(format!(
                "voucher {} must allow at least one redemption",
                self.code
            )));
        }
        if !self.items.is_empty() && self.limit_scheme != LimitScheme::Item {
            return Err(VoucherError::InvalidInput(format!(
                "voucher {} has items but uses the {} scheme",
                self.code, self.limit_scheme
            )));
        }
        Ok(())
    }

    /// Reject an update that would change the scheme of `existing`
    pub fn ensure_same_scheme(&self, existing: &Voucher) -> VoucherResult<()> {
        if self.limit_scheme != existing.limit_scheme {
            return Err(VoucherError::InvalidInput(format!(
                "limit scheme of voucher {} cannot change from {} to {}",
                existing.code, existing.limit_scheme, self.limit_scheme
            )));
        }
        Ok(())
    }

    /// Redemptions allowed per counted subject: 1 when disposable
    pub fn limit(&self) -> Option<u32> {
        if self.disposable {
            Some(1)
        } else {
            self.quantity
        }
    }

    /// Whether a counter at `count` has no redemptions left
    pub fn is_exhausted_at(&self, count: u32) -> bool {
        self.limit().map_or(false, |limit| count >= limit)
    }

    /// The error raised when a counter is exhausted
    pub fn exhaustion_error(&self) -> VoucherError {
        if self.disposable {
            VoucherError::AlreadyRedeemed {
                code: self.code.clone(),
            }
        } else {
            VoucherError::RedeemsExhausted {
                code: self.code.clone(),
            }
        }
    }

    /// Whether `item` is on the allow-list
    pub fn has_item(&self, item: &ModelRef) -> bool {
        self.items.iter().any(|allowed| allowed == item)
    }

    /// Keep only the items on the allow-list; others are dropped silently
    pub fn filter_items(&self, items: &[ModelRef]) -> Vec<ModelRef> {
        items
            .iter()
            .filter(|item| self.has_item(item))
            .cloned()
            .collect()
    }

    /// Whether the redemption window contains `now`
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| start <= now)
            && self.expires_at.map_or(true, |end| now < end)
    }

    /// Voucher-level permission for `redeemer` at `now`
    pub fn is_allowed_at(&self, redeemer: &ModelRef, now: DateTime<Utc>) -> bool {
        self.active
            && self.is_within_window(now)
            && !self.denied_redeemers.contains(redeemer)
            && (self.allowed_redeemers.is_empty() || self.allowed_redeemers.contains(redeemer))
    }

    /// Voucher-level permission for `redeemer` right now
    pub fn is_allowed(&self, redeemer: &ModelRef) -> bool {
        self.is_allowed_at(redeemer, Utc::now())
    }
}

/// Voucher catalog (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoucherCatalog {
    #[serde(default)]
    pub vouchers: Vec<Voucher>,
}

impl VoucherCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            vouchers: Vec::new(),
        }
    }

    /// Add a voucher to the catalog
    pub fn add(&mut self, voucher: Voucher) {
        self.vouchers.push(voucher);
    }

    /// Find a voucher by code
    pub fn get(&self, code: &str) -> Option<&Voucher> {
        self.vouchers.iter().find(|v| v.code == code)
    }

    /// Get all active vouchers
    pub fn active_vouchers(&self) -> impl Iterator<Item = &Voucher> {
        self.vouchers.iter().filter(|v| v.active)
    }

    /// Load and validate a catalog from a TOML string
    pub fn from_toml(toml_str: &str) -> VoucherResult<Self> {
        let catalog: Self = toml::from_str(toml_str)?;
        for voucher in &catalog.vouchers {
            voucher.validate()?;
        }
        Ok(catalog)
    }
}
