//! # voucher-core
//!
//! Core types, traits and redemption rules for the voucher engine.
//!
//! This crate provides:
//! - `Voucher`, `LimitScheme` and `VoucherCatalog` for voucher records
//! - `VoucherStore` and `UsageLedger` traits for persistence backends
//! - `EligibilityChecker` for the "may this redeem now?" decision
//! - `RedemptionEngine` for redeem/refund orchestration
//! - `Redeemer` / `Redeeming` to give any entity the redeem capability
//! - `EventSink` for redeemed/refunded notifications
//! - `MemoryVoucherStore`, an in-memory backend
//! - `VoucherError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use voucher_core::{LimitScheme, MemoryVoucherStore, ModelRef, RedemptionEngine, Voucher};
//!
//! let store = Arc::new(MemoryVoucherStore::new());
//! store.insert(&Voucher::new("SAVE10", LimitScheme::Global).with_quantity(2)).await?;
//!
//! let engine = RedemptionEngine::with_backend(store, Arc::new(LoggingEventSink));
//!
//! // Redeem for a user
//! let voucher = engine.redeem("SAVE10", &ModelRef::new("User", 1), None).await?;
//!
//! // Item-scheme vouchers need items
//! engine.redeem("FREEBOOK", &user, Some(ModelRef::new("Book", 42).into())).await?;
//! ```

pub mod eligibility;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod redeemer;
pub mod scheme;
pub mod store;
pub mod usage;
pub mod voucher;

// Re-exports for convenience
pub use eligibility::EligibilityChecker;
pub use engine::RedemptionEngine;
pub use error::{VoucherError, VoucherResult};
pub use events::{
    BroadcastEventSink, EventSink, LoggingEventSink, RecordingEventSink, SharedEventSink,
    VoucherEvent, VOUCHER_REDEEMED, VOUCHER_REFUNDED,
};
pub use memory::MemoryVoucherStore;
pub use model::{Items, ModelRef, Subject, VoucherItem};
pub use redeemer::{Redeemer, Redeeming};
pub use scheme::LimitScheme;
pub use store::{SharedUsageLedger, SharedVoucherStore, UsageLedger, VoucherStore};
pub use usage::{RedemptionLink, UsageRecord};
pub use voucher::{Voucher, VoucherCatalog};
