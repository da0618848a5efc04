//! # Store Traits
//!
//! The engine's seams to persistence. A backend implements both traits
//! (see [`MemoryVoucherStore`](crate::memory::MemoryVoucherStore) and the
//! `voucher-sqlite` crate).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  VoucherStore (trait)          UsageLedger (trait)          │
//! │  ├── insert / update / delete  ├── increment_use()          │
//! │  ├── get()                     ├── decrement_use()          │
//! │  ├── find_by_code()            ├── increment_model_use()    │
//! │  └── list()                    ├── decrement_model_use()    │
//! │                                ├── uses() / model_uses()    │
//! │                                └── record_redemption()      │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!              ┌─────────────┴─────────────┐
//!              │                           │
//!  ┌───────────┴─────────┐     ┌───────────┴─────────┐
//!  │ MemoryVoucherStore  │     │ SqliteVoucherStore  │
//!  └─────────────────────┘     └─────────────────────┘
//! ```
//!
//! ## Atomicity
//!
//! `increment_use` and `increment_model_use` must check the voucher's limit
//! and bump the counter as a single atomic step per key. When the counter
//! is already exhausted they fail with [`Voucher::exhaustion_error`] and
//! leave it unchanged.

use crate::error::VoucherResult;
use crate::model::{ModelRef, Subject};
use crate::usage::{RedemptionLink, UsageRecord};
use crate::voucher::Voucher;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// CRUD and code lookup for voucher records
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Persist a new voucher (validated, code must be unique)
    async fn insert(&self, voucher: &Voucher) -> VoucherResult<()>;

    /// Get a voucher by id, active or not
    async fn get(&self, id: Uuid) -> VoucherResult<Option<Voucher>>;

    /// Resolve a code to an active voucher.
    ///
    /// Fails with `InactiveVoucher` for unknown or deactivated codes.
    async fn find_by_code(&self, code: &str) -> VoucherResult<Voucher>;

    /// Replace a voucher record. The limit scheme cannot change.
    async fn update(&self, voucher: &Voucher) -> VoucherResult<()>;

    /// Delete a voucher; returns false if it did not exist
    async fn delete(&self, id: Uuid) -> VoucherResult<bool>;

    /// All vouchers
    async fn list(&self) -> VoucherResult<Vec<Voucher>>;
}

/// Per-voucher usage counters and redemption history
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Global scheme: bump the voucher's shared counter
    async fn increment_use(&self, voucher: &Voucher) -> VoucherResult<u32>;

    /// Global scheme: undo one use; false if the counter was already zero
    async fn decrement_use(&self, voucher: &Voucher) -> VoucherResult<bool>;

    /// Redeemer/item scheme: bump the (voucher, subject) counter,
    /// creating its record on first use
    async fn increment_model_use(&self, voucher: &Voucher, subject: &Subject)
        -> VoucherResult<u32>;

    /// Redeemer/item scheme: undo one use; false if already zero or unknown
    async fn decrement_model_use(&self, voucher: &Voucher, subject: &Subject)
        -> VoucherResult<bool>;

    /// Current value of the voucher's shared counter
    async fn uses(&self, voucher: &Voucher) -> VoucherResult<u32>;

    /// The (voucher, subject) record, if one was ever created
    async fn usage_record(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<Option<UsageRecord>>;

    /// Current value of the (voucher, subject) counter
    async fn model_uses(&self, voucher: &Voucher, subject: &Subject) -> VoucherResult<u32> {
        Ok(self
            .usage_record(voucher, subject)
            .await?
            .map_or(0, |record| record.count))
    }

    /// Whether the relevant counter has no redemptions left.
    ///
    /// `None` reads the shared counter, `Some` the subject's.
    async fn is_redeemed(&self, voucher: &Voucher, subject: Option<&Subject>) -> VoucherResult<bool> {
        let count = match subject {
            Some(subject) => self.model_uses(voucher, subject).await?,
            None => self.uses(voucher).await?,
        };
        Ok(voucher.is_exhausted_at(count))
    }

    /// Append to the audit trail
    async fn record_redemption(&self, link: &RedemptionLink) -> VoucherResult<()>;

    /// Every redemption made by `redeemer`, oldest first
    async fn redemptions_for(&self, redeemer: &ModelRef) -> VoucherResult<Vec<RedemptionLink>>;

    /// Whether `redeemer` ever redeemed `voucher` (refunds included)
    async fn has_redeemed(&self, voucher: &Voucher, redeemer: &ModelRef) -> VoucherResult<bool> {
        Ok(self
            .redemptions_for(redeemer)
            .await?
            .iter()
            .any(|link| link.voucher_id == voucher.id))
    }
}

/// Type alias for a shared voucher store (dynamic dispatch)
pub type SharedVoucherStore = Arc<dyn VoucherStore>;

/// Type alias for a shared usage ledger (dynamic dispatch)
pub type SharedUsageLedger = Arc<dyn UsageLedger>;
