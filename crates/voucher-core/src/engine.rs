//! # Redemption Engine
//!
//! Orchestrates redeem and refund:
//!
//! ```text
//! redeem(code, redeemer, items)
//!   │
//!   ├─ store.find_by_code(code) ──────────────► InactiveVoucher
//!   ├─ EligibilityChecker::can_redeem ────────► InvalidInput / AlreadyRedeemed
//!   │     └─ false ───────────────────────────► CannotRedeem   / RedeemsExhausted
//!   ├─ ledger increment (per scheme, atomic) ─► AlreadyRedeemed / RedeemsExhausted
//!   ├─ ledger.record_redemption(link) ───────► Storage (increments released)
//!   └─ events.emit(Redeemed)
//! ```
//!
//! The eligibility check only gives early, precise errors. The conditional
//! increment is what actually prevents a double grant when two requests
//! race for the last redemption.

use crate::eligibility::EligibilityChecker;
use crate::error::{VoucherError, VoucherResult};
use crate::events::{SharedEventSink, VoucherEvent};
use crate::model::{Items, ModelRef, Subject};
use crate::redeemer::{Redeemer, Redeeming};
use crate::scheme::LimitScheme;
use crate::store::{SharedUsageLedger, SharedVoucherStore, UsageLedger, VoucherStore};
use crate::usage::RedemptionLink;
use crate::voucher::Voucher;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Redeem/refund orchestrator over a store, a ledger and an event sink
#[derive(Clone)]
pub struct RedemptionEngine {
    store: SharedVoucherStore,
    ledger: SharedUsageLedger,
    events: SharedEventSink,
}

impl RedemptionEngine {
    pub fn new(store: SharedVoucherStore, ledger: SharedUsageLedger, events: SharedEventSink) -> Self {
        Self {
            store,
            ledger,
            events,
        }
    }

    /// Build from one backend that is both the store and the ledger
    pub fn with_backend<B>(backend: Arc<B>, events: SharedEventSink) -> Self
    where
        B: VoucherStore + UsageLedger + 'static,
    {
        Self::new(backend.clone(), backend, events)
    }

    pub fn store(&self) -> &dyn VoucherStore {
        self.store.as_ref()
    }

    pub fn ledger(&self) -> &dyn UsageLedger {
        self.ledger.as_ref()
    }

    pub fn checker(&self) -> EligibilityChecker<'_> {
        EligibilityChecker::new(self.ledger.as_ref())
    }

    /// Give `redeemer` the redeem/refund capability
    pub fn redeemer<'e, R: Redeemer + ?Sized>(&'e self, redeemer: &'e R) -> Redeeming<'e, R> {
        Redeeming::new(self, redeemer)
    }

    /// Redeem `code` for `redeemer`.
    ///
    /// `items` is required for item-scheme vouchers and ignored otherwise.
    #[instrument(skip(self, redeemer, items), fields(redeemer = %redeemer))]
    pub async fn redeem(
        &self,
        code: &str,
        redeemer: &ModelRef,
        items: Option<Items>,
    ) -> VoucherResult<Voucher> {
        let voucher = self.store.find_by_code(code).await?;
        let items = items.map(Items::into_vec);

        if !self
            .checker()
            .can_redeem(&voucher, redeemer, items.as_deref())
            .await?
        {
            warn!(code = %voucher.code, scheme = %voucher.scheme(), "redemption refused");
            return Err(VoucherError::CannotRedeem {
                voucher: Box::new(voucher),
                items: items.unwrap_or_default(),
            });
        }

        let granted: Vec<Option<Subject>> = match voucher.scheme() {
            LimitScheme::Item => {
                let filtered = voucher.filter_items(items.as_deref().unwrap_or_default());
                self.increment_items(&voucher, &filtered)
                    .await?
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            LimitScheme::Redeemer => {
                let subject = Subject::Redeemer(redeemer.clone());
                self.ledger.increment_model_use(&voucher, &subject).await?;
                vec![Some(subject)]
            }
            LimitScheme::Global => {
                self.ledger.increment_use(&voucher).await?;
                vec![None]
            }
        };

        let link = RedemptionLink::new(&voucher, redeemer.clone(), Utc::now());
        if let Err(err) = self.ledger.record_redemption(&link).await {
            error!(code = %voucher.code, error = %err, "failed to record redemption");
            self.release(&voucher, &granted).await;
            return Err(err);
        }

        info!(code = %voucher.code, scheme = %voucher.scheme(), "voucher redeemed");

        self.events.emit(&VoucherEvent::Redeemed {
            redeemer: redeemer.clone(),
            voucher: voucher.clone(),
        });

        Ok(voucher)
    }

    /// Redeem with no items
    pub async fn redeem_voucher(&self, code: &str, redeemer: &ModelRef) -> VoucherResult<Voucher> {
        self.redeem(code, redeemer, None).await
    }

    /// Undo a redemption's counter effect.
    ///
    /// No eligibility or "was it redeemed" check is made; counters floor at
    /// zero. Returns true if at least one counter was decremented.
    #[instrument(skip(self, voucher, redeemer, items), fields(code = %voucher.code, redeemer = %redeemer))]
    pub async fn refund(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<Items>,
    ) -> VoucherResult<bool> {
        let refunded = match voucher.scheme() {
            LimitScheme::Item => {
                let items = items.map(Items::into_vec).unwrap_or_default();
                let mut any = false;
                for item in voucher.filter_items(&items) {
                    any |= self
                        .ledger
                        .decrement_model_use(voucher, &Subject::Item(item))
                        .await?;
                }
                any
            }
            LimitScheme::Redeemer => {
                self.ledger
                    .decrement_model_use(voucher, &Subject::Redeemer(redeemer.clone()))
                    .await?
            }
            LimitScheme::Global => self.ledger.decrement_use(voucher).await?,
        };

        if refunded {
            info!("voucher refunded");
        } else {
            debug!("refund found nothing to decrement");
        }

        self.events.emit(&VoucherEvent::Refunded {
            redeemer: redeemer.clone(),
            voucher: voucher.clone(),
        });

        Ok(refunded)
    }

    /// Can `redeemer` redeem `voucher` with `items`? See [`EligibilityChecker::can_redeem`].
    pub async fn can_redeem(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<Items>,
    ) -> VoucherResult<bool> {
        let items = items.map(Items::into_vec);
        self.checker()
            .can_redeem(voucher, redeemer, items.as_deref())
            .await
    }

    /// [`can_redeem`](Self::can_redeem) for a code; unknown or inactive codes fail
    pub async fn can_redeem_code(
        &self,
        code: &str,
        redeemer: &ModelRef,
        items: Option<Items>,
    ) -> VoucherResult<bool> {
        let voucher = self.store.find_by_code(code).await?;
        self.can_redeem(&voucher, redeemer, items).await
    }

    /// Boolean eligibility: exhaustion counts as "no"
    pub async fn is_eligible(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<Items>,
    ) -> VoucherResult<bool> {
        let items = items.map(Items::into_vec);
        self.checker()
            .is_eligible(voucher, redeemer, items.as_deref())
            .await
    }

    /// Every redemption `redeemer` has made
    pub async fn redemptions_for(&self, redeemer: &ModelRef) -> VoucherResult<Vec<RedemptionLink>> {
        self.ledger.redemptions_for(redeemer).await
    }

    /// Bump each item that still has room; returns the items bumped.
    ///
    /// An item lost to a concurrent redemption is skipped; if every item was
    /// lost the last exhaustion error is returned. Any other failure undoes
    /// the bumps already made.
    async fn increment_items(
        &self,
        voucher: &Voucher,
        items: &[ModelRef],
    ) -> VoucherResult<Vec<Subject>> {
        let mut granted = Vec::new();
        let mut last_refusal = None;

        for item in items {
            let subject = Subject::Item(item.clone());
            match self.ledger.increment_model_use(voucher, &subject).await {
                Ok(count) => {
                    debug!(item = %item, count, "item use recorded");
                    granted.push(subject);
                }
                Err(err) if err.is_exhaustion() => {
                    debug!(item = %item, "item used up, skipped");
                    last_refusal = Some(err);
                }
                Err(err) => {
                    error!(item = %item, error = %err, "item increment failed");
                    let granted: Vec<Option<Subject>> = granted.into_iter().map(Some).collect();
                    self.release(voucher, &granted).await;
                    return Err(err);
                }
            }
        }

        match (granted.is_empty(), last_refusal) {
            (true, Some(err)) => Err(err),
            _ => Ok(granted),
        }
    }

    /// Undo increments of a redemption that did not complete.
    ///
    /// `None` is the shared counter. Failures are logged; the caller already
    /// has an error to return.
    async fn release(&self, voucher: &Voucher, granted: &[Option<Subject>]) {
        for counter in granted {
            let undone = match counter {
                Some(subject) => self.ledger.decrement_model_use(voucher, subject).await,
                None => self.ledger.decrement_use(voucher).await,
            };
            if let Err(err) = undone {
                error!(code = %voucher.code, error = %err, "failed to release counter");
            }
        }
        warn!(code = %voucher.code, counters = granted.len(), "redemption rolled back");
    }
}
