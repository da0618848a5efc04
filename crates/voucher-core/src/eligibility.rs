//! # Eligibility
//!
//! Decides whether a redeemer (and, for item-scheme vouchers, which items)
//! may redeem a voucher right now. Reads counters, never writes them.
//!
//! ## Item scheme
//!
//! Requested items are first filtered down to the voucher's allow-list.
//! Redemption is allowed when ANY surviving item still has redemptions left,
//! not only when all of them do.
//!
//! ```text
//! items = [Book#42 (used), Pen#7 (not listed), Mug#1 (unused)]
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//!         filtered           dropped            filtered
//!            └────────── any available? ──────────┘
//!                              yes → eligible
//! ```

use crate::error::{VoucherError, VoucherResult};
use crate::model::{ModelRef, Subject};
use crate::scheme::LimitScheme;
use crate::store::UsageLedger;
use crate::voucher::Voucher;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Read-only redemption checks against a ledger
pub struct EligibilityChecker<'a> {
    ledger: &'a dyn UsageLedger,
}

impl<'a> EligibilityChecker<'a> {
    pub fn new(ledger: &'a dyn UsageLedger) -> Self {
        Self { ledger }
    }

    /// Can `redeemer` redeem `voucher` with `items`?
    ///
    /// # Errors
    /// - `InvalidInput` when the voucher uses the item scheme and `items` is `None`
    /// - `AlreadyRedeemed` / `RedeemsExhausted` when the relevant counter is used up
    pub async fn can_redeem(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<&[ModelRef]>,
    ) -> VoucherResult<bool> {
        self.can_redeem_at(voucher, redeemer, items, Utc::now()).await
    }

    /// [`can_redeem`](Self::can_redeem) evaluated at `now`
    pub async fn can_redeem_at(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<&[ModelRef]>,
        now: DateTime<Utc>,
    ) -> VoucherResult<bool> {
        if voucher.scheme() == LimitScheme::Item {
            let items = items.ok_or_else(|| {
                VoucherError::InvalidInput(format!(
                    "voucher {} requires at least one item",
                    voucher.code
                ))
            })?;

            let filtered = voucher.filter_items(items);
            if filtered.is_empty() {
                debug!(code = %voucher.code, "no requested item is on the allow-list");
                return Ok(false);
            }

            if !self.any_item_available(voucher, &filtered).await? {
                // every listed item is used up: report which way
                self.check_is_redeemed(voucher, redeemer, Some(filtered.as_slice())).await?;
                return Ok(false);
            }

            return Ok(voucher.is_allowed_at(redeemer, now));
        }

        self.check_is_redeemed(voucher, redeemer, items).await?;

        Ok(voucher.is_allowed_at(redeemer, now))
    }

    /// Boolean form of [`can_redeem`](Self::can_redeem): exhaustion counts as "no"
    pub async fn is_eligible(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<&[ModelRef]>,
    ) -> VoucherResult<bool> {
        match self.can_redeem(voucher, redeemer, items).await {
            Err(err) if err.is_exhaustion() => Ok(false),
            other => other,
        }
    }

    /// Fail if the relevant counter has no redemptions left.
    ///
    /// Item scheme: redeemed if ANY allow-listed requested item is used up.
    /// Global scheme: the shared counter. Redeemer scheme: `redeemer`'s own.
    pub async fn check_is_redeemed(
        &self,
        voucher: &Voucher,
        redeemer: &ModelRef,
        items: Option<&[ModelRef]>,
    ) -> VoucherResult<()> {
        let is_redeemed = match voucher.scheme() {
            LimitScheme::Item => {
                let filtered = voucher.filter_items(items.unwrap_or_default());
                let mut redeemed = false;
                for item in filtered {
                    if self
                        .ledger
                        .is_redeemed(voucher, Some(&Subject::Item(item)))
                        .await?
                    {
                        redeemed = true;
                        break;
                    }
                }
                redeemed
            }
            LimitScheme::Redeemer => {
                self.ledger
                    .is_redeemed(voucher, Some(&Subject::Redeemer(redeemer.clone())))
                    .await?
            }
            LimitScheme::Global => self.ledger.is_redeemed(voucher, None).await?,
        };

        if is_redeemed {
            debug!(code = %voucher.code, redeemer = %redeemer, "voucher used up");
            return Err(voucher.exhaustion_error());
        }

        Ok(())
    }

    async fn any_item_available(&self, voucher: &Voucher, items: &[ModelRef]) -> VoucherResult<bool> {
        for item in items {
            let subject = Subject::Item(item.clone());
            if !self.ledger.is_redeemed(voucher, Some(&subject)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
