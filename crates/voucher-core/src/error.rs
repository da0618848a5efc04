//! # Voucher Error Types
//!
//! Typed error handling for the voucher engine.
//! All redemption operations return `Result<T, VoucherError>`.
//!
//! The first five variants are the redemption-path kinds callers are
//! expected to translate into distinct responses; the rest come from the
//! store, configuration or (de)serialization layers.

use crate::model::ModelRef;
use crate::voucher::Voucher;
use thiserror::Error;

/// Core error type for all voucher operations
#[derive(Debug, Error)]
pub enum VoucherError {
    /// Code is unknown or the voucher has been deactivated
    #[error("The provided code {code} is inactive")]
    InactiveVoucher { code: String },

    /// Redeemer is disallowed or none of the provided items are eligible
    #[error("Cannot redeem voucher {}: redeemer is disallowed or no provided item is eligible", .voucher.code)]
    CannotRedeem {
        voucher: Box<Voucher>,
        items: Vec<ModelRef>,
    },

    /// Disposable voucher already consumed by this subject
    #[error("Voucher {code} has already been redeemed")]
    AlreadyRedeemed { code: String },

    /// Redemption limit reached for this subject (or globally)
    #[error("Voucher {code} has no redemptions left")]
    RedeemsExhausted { code: String },

    /// Malformed request, e.g. item-scheme redemption without items
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors (bad table names, unknown scheme names)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VoucherError {
    /// Returns true for the two "limit reached" kinds
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            VoucherError::AlreadyRedeemed { .. } | VoucherError::RedeemsExhausted { .. }
        )
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, VoucherError::Storage(_))
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            VoucherError::InactiveVoucher { .. } => 404,
            VoucherError::CannotRedeem { .. } => 403,
            VoucherError::AlreadyRedeemed { .. } => 409,
            VoucherError::RedeemsExhausted { .. } => 410,
            VoucherError::InvalidInput(_) => 422,
            VoucherError::Storage(_) => 503,
            VoucherError::Configuration(_) => 500,
            VoucherError::Serialization(_) => 500,
        }
    }
}

impl From<serde_json::Error> for VoucherError {
    fn from(err: serde_json::Error) -> Self {
        VoucherError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VoucherError {
    fn from(err: toml::de::Error) -> Self {
        VoucherError::Configuration(err.to_string())
    }
}

/// Result type alias for voucher operations
pub type VoucherResult<T> = Result<T, VoucherError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::LimitScheme;

    #[test]
    fn test_exhaustion_errors() {
        assert!(VoucherError::AlreadyRedeemed { code: "A".into() }.is_exhaustion());
        assert!(VoucherError::RedeemsExhausted { code: "A".into() }.is_exhaustion());
        assert!(!VoucherError::InvalidInput("no items".into()).is_exhaustion());
        assert!(VoucherError::Storage("locked".into()).is_retryable());
        assert!(!VoucherError::InactiveVoucher { code: "A".into() }.is_retryable());
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let voucher = Voucher::new("SAVE10", LimitScheme::Global);
        let codes = [
            VoucherError::InactiveVoucher { code: "x".into() }.status_code(),
            VoucherError::CannotRedeem {
                voucher: Box::new(voucher),
                items: vec![],
            }
            .status_code(),
            VoucherError::AlreadyRedeemed { code: "x".into() }.status_code(),
            VoucherError::RedeemsExhausted { code: "x".into() }.status_code(),
            VoucherError::InvalidInput("x".into()).status_code(),
        ];

        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_messages_carry_code() {
        let err = VoucherError::InactiveVoucher {
            code: "SAVE10".into(),
        };
        assert_eq!(err.to_string(), "The provided code SAVE10 is inactive");

        let err = VoucherError::CannotRedeem {
            voucher: Box::new(Voucher::new("FREEBOOK", LimitScheme::Item)),
            items: vec![],
        };
        assert!(err.to_string().contains("FREEBOOK"));
    }
}
