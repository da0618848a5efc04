//! # voucher-sqlite
//!
//! SQLite backend for the voucher engine.
//!
//! `SqliteVoucherStore` implements both `VoucherStore` and `UsageLedger`
//! on a sqlx pool. Table names are configurable through `StoreConfig`,
//! and the tables are created on connect.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voucher_sqlite::{SqliteVoucherStore, StoreConfig};
//! use voucher_core::{LoggingEventSink, RedemptionEngine};
//!
//! // VOUCHER_DATABASE_URL=sqlite://vouchers.db
//! let store = Arc::new(SqliteVoucherStore::new(StoreConfig::from_env()?).await?);
//! let engine = RedemptionEngine::with_backend(store, Arc::new(LoggingEventSink));
//!
//! engine.redeem("SAVE10", &ModelRef::new("User", 1), None).await?;
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! database_url = "sqlite://vouchers.db"
//! max_connections = 5
//!
//! [tables]
//! prefix = "shop_"
//! redeemer_pivot_table = "customer_voucher"
//! ```

pub mod config;
pub mod schema;
pub mod store;

// Re-exports
pub use config::{StoreConfig, TableNames, IN_MEMORY_URL};
pub use store::SqliteVoucherStore;
