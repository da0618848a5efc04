//! # Redeemers
//!
//! Any entity can redeem vouchers by exposing its identity through
//! [`Redeemer`]. [`Redeeming`] wraps such an entity together with an engine
//! and offers the redeem/refund operations on its behalf.
//!
//! ```rust,ignore
//! struct Customer { id: i64 }
//!
//! impl Redeemer for Customer {
//!     fn redeemer_ref(&self) -> ModelRef {
//!         ModelRef::new("Customer", self.id)
//!     }
//! }
//!
//! let customer = Customer { id: 7 };
//! engine.redeemer(&customer).redeem("SAVE10", None).await?;
//! let history = engine.redeemer(&customer).vouchers().await?;
//! ```

use crate::engine::RedemptionEngine;
use crate::error::VoucherResult;
use crate::model::{Items, ModelRef};
use crate::usage::RedemptionLink;
use crate::voucher::Voucher;

/// Capability: can redeem vouchers
pub trait Redeemer: Send + Sync {
    /// Identity used for counters and redemption links
    fn redeemer_ref(&self) -> ModelRef;
}

impl Redeemer for ModelRef {
    fn redeemer_ref(&self) -> ModelRef {
        self.clone()
    }
}

/// A redeemer bound to an engine
pub struct Redeeming<'e, R: Redeemer + ?Sized> {
    engine: &'e RedemptionEngine,
    redeemer: &'e R,
}

impl<'e, R: Redeemer + ?Sized> Redeeming<'e, R> {
    pub fn new(engine: &'e RedemptionEngine, redeemer: &'e R) -> Self {
        Self { engine, redeemer }
    }

    pub fn inner(&self) -> &R {
        self.redeemer
    }

    /// Redeem a code
    pub async fn redeem(&self, code: &str, items: Option<Items>) -> VoucherResult<Voucher> {
        self.engine
            .redeem(code, &self.redeemer.redeemer_ref(), items)
            .await
    }

    /// Redeem a code with no items
    pub async fn redeem_voucher(&self, code: &str) -> VoucherResult<Voucher> {
        self.redeem(code, None).await
    }

    /// Refund a voucher
    pub async fn refund(&self, voucher: &Voucher, items: Option<Items>) -> VoucherResult<bool> {
        self.engine
            .refund(voucher, &self.redeemer.redeemer_ref(), items)
            .await
    }

    /// Eligibility for a voucher record
    pub async fn can_redeem(&self, voucher: &Voucher, items: Option<Items>) -> VoucherResult<bool> {
        self.engine
            .can_redeem(voucher, &self.redeemer.redeemer_ref(), items)
            .await
    }

    /// Eligibility for a code
    pub async fn can_redeem_code(&self, code: &str, items: Option<Items>) -> VoucherResult<bool> {
        self.engine
            .can_redeem_code(code, &self.redeemer.redeemer_ref(), items)
            .await
    }

    /// Redemption history, oldest first
    pub async fn vouchers(&self) -> VoucherResult<Vec<RedemptionLink>> {
        self.engine
            .redemptions_for(&self.redeemer.redeemer_ref())
            .await
    }

    /// Whether this redeemer ever redeemed `voucher`
    pub async fn has_redeemed(&self, voucher: &Voucher) -> VoucherResult<bool> {
        self.engine
            .ledger()
            .has_redeemed(voucher, &self.redeemer.redeemer_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggingEventSink;
    use crate::memory::MemoryVoucherStore;
    use crate::scheme::LimitScheme;
    use crate::store::VoucherStore;
    use std::sync::Arc;

    struct Customer {
        id: i64,
    }

    impl Redeemer for Customer {
        fn redeemer_ref(&self) -> ModelRef {
            ModelRef::new("Customer", self.id)
        }
    }

    #[tokio::test]
    async fn test_entity_redeems_through_adapter() {
        let store = Arc::new(MemoryVoucherStore::new());
        let voucher = Voucher::new("WELCOME", LimitScheme::Redeemer).disposable();
        store.insert(&voucher).await.unwrap();
        let engine = RedemptionEngine::with_backend(store, Arc::new(LoggingEventSink));

        let customer = Customer { id: 7 };
        let redeeming = engine.redeemer(&customer);

        assert!(redeeming.can_redeem_code("WELCOME", None).await.unwrap());
        assert!(!redeeming.has_redeemed(&voucher).await.unwrap());

        redeeming.redeem_voucher("WELCOME").await.unwrap();

        let history = redeeming.vouchers().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, "WELCOME");
        assert_eq!(history[0].redeemer, ModelRef::new("Customer", 7));
        assert!(redeeming.has_redeemed(&voucher).await.unwrap());

        // refund keeps the history but frees the counter
        assert!(redeeming.refund(&voucher, None).await.unwrap());
        assert!(redeeming.can_redeem(&voucher, None).await.unwrap());
        assert!(redeeming.has_redeemed(&voucher).await.unwrap());
        assert_eq!(redeeming.inner().id, 7);
    }

    #[tokio::test]
    async fn test_model_ref_is_a_redeemer() {
        let store = Arc::new(MemoryVoucherStore::new());
        store
            .insert(&Voucher::new("SAVE10", LimitScheme::Global))
            .await
            .unwrap();
        let engine = RedemptionEngine::with_backend(store, Arc::new(LoggingEventSink));

        let user = ModelRef::new("User", 1);
        engine.redeemer(&user).redeem("SAVE10", None).await.unwrap();
        assert_eq!(engine.redeemer(&user).vouchers().await.unwrap().len(), 1);
    }
}
