//! # Store Configuration
//!
//! Connection and table-name settings for the SQLite backend.
//! Loaded from environment variables or a TOML file.

use serde::{Deserialize, Serialize};
use std::env;
use voucher_core::{VoucherError, VoucherResult};

/// URL of a private in-memory database
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Table names used by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Prepended to every table name
    pub prefix: String,

    /// Voucher records and their global counter
    pub vouchers: String,

    /// Item allow-lists
    pub items: String,

    /// Per-redeemer and per-item counters
    pub usages: String,

    /// Redeemer pivot (redemption history)
    pub redeemer_pivot_table: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            vouchers: "vouchers".to_string(),
            items: "voucher_items".to_string(),
            usages: "voucher_usages".to_string(),
            redeemer_pivot_table: "redeemer_voucher".to_string(),
        }
    }
}

impl TableNames {
    /// Builder: set the prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn vouchers(&self) -> String {
        format!("{}{}", self.prefix, self.vouchers)
    }

    pub fn items(&self) -> String {
        format!("{}{}", self.prefix, self.items)
    }

    pub fn usages(&self) -> String {
        format!("{}{}", self.prefix, self.usages)
    }

    pub fn redemptions(&self) -> String {
        format!("{}{}", self.prefix, self.redeemer_pivot_table)
    }

    /// Every prefixed name must be a plain SQL identifier and distinct.
    ///
    /// Names are spliced into statements, so nothing else is accepted.
    pub fn validate(&self) -> VoucherResult<()> {
        let names = [
            self.vouchers(),
            self.items(),
            self.usages(),
            self.redemptions(),
        ];

        for name in &names {
            if !is_identifier(name) {
                return Err(VoucherError::Configuration(format!(
                    "invalid table name: {name:?}"
                )));
            }
        }

        for (i, name) in names.iter().enumerate() {
            if names[i + 1..].contains(name) {
                return Err(VoucherError::Configuration(format!(
                    "table name {name} is used twice"
                )));
            }
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SQLite store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// sqlx connection URL (`sqlite://vouchers.db`, `sqlite::memory:`)
    pub database_url: String,

    /// Pool size (forced to 1 for in-memory databases)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub tables: TableNames,
}

fn default_max_connections() -> u32 {
    5
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `VOUCHER_DATABASE_URL`
    ///
    /// Optional:
    /// - `VOUCHER_MAX_CONNECTIONS` (default 5)
    /// - `VOUCHER_TABLE_PREFIX`
    pub fn from_env() -> VoucherResult<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let database_url = env::var("VOUCHER_DATABASE_URL").map_err(|_| {
            VoucherError::Configuration("VOUCHER_DATABASE_URL not set".to_string())
        })?;

        let max_connections = match env::var("VOUCHER_MAX_CONNECTIONS") {
            Ok(value) => value.parse::<u32>().map_err(|_| {
                VoucherError::Configuration(format!(
                    "VOUCHER_MAX_CONNECTIONS must be a positive integer, got {value:?}"
                ))
            })?,
            Err(_) => default_max_connections(),
        };

        let prefix = env::var("VOUCHER_TABLE_PREFIX").unwrap_or_default();

        let config = Self {
            database_url,
            max_connections,
            tables: TableNames::default().with_prefix(prefix),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML document
    pub fn from_toml(content: &str) -> VoucherResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create config with explicit values
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: default_max_connections(),
            tables: TableNames::default(),
        }
    }

    /// A private in-memory database (for testing)
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            tables: TableNames::default(),
        }
    }

    /// Builder: set pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Builder: set table names
    pub fn with_tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    /// Whether the URL points at an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Pool size actually used
    pub fn pool_size(&self) -> u32 {
        if self.is_in_memory() {
            1
        } else {
            self.max_connections
        }
    }

    pub fn validate(&self) -> VoucherResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(VoucherError::Configuration(
                "database_url must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(VoucherError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        self.tables.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_names() {
        let tables = TableNames::default();
        assert_eq!(tables.vouchers(), "vouchers");
        assert_eq!(tables.items(), "voucher_items");
        assert_eq!(tables.usages(), "voucher_usages");
        assert_eq!(tables.redemptions(), "redeemer_voucher");
        assert!(tables.validate().is_ok());

        let prefixed = tables.with_prefix("shop_");
        assert_eq!(prefixed.redemptions(), "shop_redeemer_voucher");
    }

    #[test]
    fn test_table_names_must_be_identifiers() {
        let mut tables = TableNames::default();
        tables.vouchers = "vouchers; DROP TABLE x".to_string();
        assert!(matches!(
            tables.validate(),
            Err(VoucherError::Configuration(_))
        ));

        let tables = TableNames::default().with_prefix("1st_");
        assert!(tables.validate().is_err());

        let mut tables = TableNames::default();
        tables.items = "vouchers".to_string();
        assert!(tables.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml(
            r#"
            database_url = "sqlite://vouchers.db"

            [tables]
            prefix = "shop_"
            redeemer_pivot_table = "customer_voucher"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 5);
        assert_eq!(config.tables.vouchers(), "shop_vouchers");
        assert_eq!(config.tables.redemptions(), "shop_customer_voucher");
        assert!(!config.is_in_memory());

        let err = StoreConfig::from_toml(
            r#"
            database_url = "sqlite://vouchers.db"
            max_connections = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, VoucherError::Configuration(_)));
    }

    #[test]
    fn test_in_memory_uses_single_connection() {
        let config = StoreConfig::new(IN_MEMORY_URL).with_max_connections(8);
        assert!(config.is_in_memory());
        assert_eq!(config.pool_size(), 1);
        assert_eq!(StoreConfig::in_memory().pool_size(), 1);
        assert_eq!(
            StoreConfig::new("sqlite://v.db").with_max_connections(8).pool_size(),
            8
        );
    }

    #[test]
    fn test_from_env() {
        env::set_var("VOUCHER_DATABASE_URL", "sqlite://env.db");
        env::set_var("VOUCHER_MAX_CONNECTIONS", "3");
        env::set_var("VOUCHER_TABLE_PREFIX", "app_");

        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite://env.db");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.tables.vouchers(), "app_vouchers");

        env::set_var("VOUCHER_MAX_CONNECTIONS", "many");
        assert!(StoreConfig::from_env().is_err());

        env::remove_var("VOUCHER_MAX_CONNECTIONS");
        env::remove_var("VOUCHER_TABLE_PREFIX");
        env::remove_var("VOUCHER_DATABASE_URL");
        assert!(StoreConfig::from_env().is_err());
    }
}
