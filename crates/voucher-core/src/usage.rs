//! # Usage Records
//!
//! Counter rows kept by a [`UsageLedger`](crate::store::UsageLedger) and the
//! redemption links that form the audit trail. Neither is deleted when a
//! refund brings a counter back to zero.

use crate::model::{ModelRef, Subject};
use crate::voucher::Voucher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Redemption count of one (voucher, subject) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub voucher_id: Uuid,

    #[serde(flatten)]
    pub subject: Subject,

    /// Current operational count (refunds decrement it)
    pub count: u32,

    /// Last successful redemption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// A fresh record with no redemptions
    pub fn new(voucher_id: Uuid, subject: Subject) -> Self {
        Self {
            voucher_id,
            subject,
            count: 0,
            redeemed_at: None,
        }
    }

    /// Count one redemption at `at`
    pub fn increment(&mut self, at: DateTime<Utc>) -> u32 {
        self.count = self.count.saturating_add(1);
        self.redeemed_at = Some(at);
        self.count
    }

    /// Undo one redemption; returns false if already at zero
    pub fn decrement(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }
}

/// Audit row: `redeemer` redeemed `voucher` at `redeemed_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionLink {
    pub voucher_id: Uuid,
    pub code: String,
    pub redeemer: ModelRef,
    pub redeemed_at: DateTime<Utc>,
}

impl RedemptionLink {
    pub fn new(voucher: &Voucher, redeemer: ModelRef, redeemed_at: DateTime<Utc>) -> Self {
        Self {
            voucher_id: voucher.id,
            code: voucher.code.clone(),
            redeemer,
            redeemed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_floors_at_zero() {
        let mut record = UsageRecord::new(Uuid::new_v4(), Subject::Item(ModelRef::new("Book", 42)));
        assert!(!record.decrement());
        assert_eq!(record.count, 0);

        let now = Utc::now();
        assert_eq!(record.increment(now), 1);
        assert_eq!(record.redeemed_at, Some(now));

        assert!(record.decrement());
        assert_eq!(record.count, 0);
        // last redemption time survives the refund
        assert_eq!(record.redeemed_at, Some(now));
    }

    #[test]
    fn test_record_serializes_subject_inline() {
        let record = UsageRecord::new(Uuid::nil(), Subject::Redeemer(ModelRef::new("User", 1)));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["subject"], "redeemer");
        assert_eq!(json["kind"], "User");
        assert_eq!(json["count"], 0);
    }
}
