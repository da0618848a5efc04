//! In-memory voucher store and usage ledger.
//!
//! Useful for tests, development and single-process deployments. Data is
//! lost on restart.
//!
//! Counters live in `DashMap`s keyed by voucher id (global scheme) or by
//! (voucher id, subject). Every increment happens under the entry's shard
//! lock, so the limit check and the bump are one atomic step.

use crate::error::{VoucherError, VoucherResult};
use crate::model::{ModelRef, Subject};
use crate::store::{UsageLedger, VoucherStore};
use crate::usage::{RedemptionLink, UsageRecord};
use crate::voucher::{Voucher, VoucherCatalog};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory storage for vouchers, counters and redemption links.
#[derive(Default)]
pub struct MemoryVoucherStore {
    vouchers: DashMap<Uuid, Voucher>,
    codes: DashMap<String, Uuid>,
    uses: DashMap<Uuid, u32>,
    usages: DashMap<(Uuid, Subject), UsageRecord>,
    links: RwLock<Vec<RedemptionLink>>,
}

impl MemoryVoucherStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with every voucher in `catalog`.
    pub fn from_catalog(catalog: &VoucherCatalog) -> VoucherResult<Self> {
        let store = Self::new();
        for voucher in &catalog.vouchers {
            store.put(voucher)?;
        }
        debug!(vouchers = store.vouchers.len(), "seeded memory store");
        Ok(store)
    }

    /// Number of stored vouchers.
    pub fn voucher_count(&self) -> usize {
        self.vouchers.len()
    }

    /// All usage records of `voucher`.
    pub fn usage_records(&self, voucher: &Voucher) -> Vec<UsageRecord> {
        self.usages
            .iter()
            .filter(|entry| entry.key().0 == voucher.id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn put(&self, voucher: &Voucher) -> VoucherResult<()> {
        voucher.validate()?;

        match self.codes.entry(voucher.code.clone()) {
            Entry::Occupied(_) => {
                return Err(VoucherError::InvalidInput(format!(
                    "voucher code {} already exists",
                    voucher.code
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(voucher.id);
            }
        }

        self.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for MemoryVoucherStore {
    async fn insert(&self, voucher: &Voucher) -> VoucherResult<()> {
        self.put(voucher)
    }

    async fn get(&self, id: Uuid) -> VoucherResult<Option<Voucher>> {
        Ok(self.vouchers.get(&id).map(|v| v.value().clone()))
    }

    async fn find_by_code(&self, code: &str) -> VoucherResult<Voucher> {
        let inactive = || VoucherError::InactiveVoucher {
            code: code.to_string(),
        };

        let id = self.codes.get(code).map(|id| *id).ok_or_else(inactive)?;
        let voucher = self
            .vouchers
            .get(&id)
            .map(|v| v.value().clone())
            .ok_or_else(inactive)?;

        if !voucher.active {
            return Err(inactive());
        }
        Ok(voucher)
    }

    async fn update(&self, voucher: &Voucher) -> VoucherResult<()> {
        voucher.validate()?;

        let existing = self.get(voucher.id).await?.ok_or_else(|| {
            VoucherError::InvalidInput(format!("voucher {} does not exist", voucher.id))
        })?;
        voucher.ensure_same_scheme(&existing)?;

        if voucher.code != existing.code {
            match self.codes.entry(voucher.code.clone()) {
                Entry::Occupied(entry) if *entry.get() != voucher.id => {
                    return Err(VoucherError::InvalidInput(format!(
                        "voucher code {} already exists",
                        voucher.code
                    )));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(voucher.id);
                }
            }
            self.codes.remove(&existing.code);
        }

        self.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> VoucherResult<bool> {
        let Some((_, voucher)) = self.vouchers.remove(&id) else {
            return Ok(false);
        };

        self.codes.remove_if(&voucher.code, |_, owner| *owner == id);
        self.uses.remove(&id);
        self.usages.retain(|(voucher_id, _), _| *voucher_id != id);
        Ok(true)
    }

    async fn list(&self) -> VoucherResult<Vec<Voucher>> {
        let mut vouchers: Vec<Voucher> = self.vouchers.iter().map(|v| v.value().clone()).collect();
        vouchers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(vouchers)
    }
}

#[async_trait]
impl UsageLedger for MemoryVoucherStore {
    async fn increment_use(&self, voucher: &Voucher) -> VoucherResult<u32> {
        let mut counter = self.uses.entry(voucher.id).or_insert(0);
        if voucher.is_exhausted_at(*counter) {
            return Err(voucher.exhaustion_error());
        }
        *counter = counter.saturating_add(1);
        Ok(*counter)
    }

    async fn decrement_use(&self, voucher: &Voucher) -> VoucherResult<bool> {
        match self.uses.get_mut(&voucher.id) {
            Some(mut counter) if *counter > 0 => {
                *counter -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_model_use(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<u32> {
        let mut record = self
            .usages
            .entry((voucher.id, subject.clone()))
            .or_insert_with(|| UsageRecord::new(voucher.id, subject.clone()));

        if voucher.is_exhausted_at(record.count) {
            return Err(voucher.exhaustion_error());
        }
        Ok(record.increment(Utc::now()))
    }

    async fn decrement_model_use(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<bool> {
        Ok(self
            .usages
            .get_mut(&(voucher.id, subject.clone()))
            .map_or(false, |mut record| record.decrement()))
    }

    async fn uses(&self, voucher: &Voucher) -> VoucherResult<u32> {
        Ok(self.uses.get(&voucher.id).map_or(0, |counter| *counter))
    }

    async fn usage_record(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<Option<UsageRecord>> {
        Ok(self
            .usages
            .get(&(voucher.id, subject.clone()))
            .map(|record| record.value().clone()))
    }

    async fn record_redemption(&self, link: &RedemptionLink) -> VoucherResult<()> {
        self.links.write().await.push(link.clone());
        Ok(())
    }

    async fn redemptions_for(&self, redeemer: &ModelRef) -> VoucherResult<Vec<RedemptionLink>> {
        Ok(self
            .links
            .read()
            .await
            .iter()
            .filter(|link| &link.redeemer == redeemer)
            .cloned()
            .collect())
    }
}
