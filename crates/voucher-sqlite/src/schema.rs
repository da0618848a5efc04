//! # Schema Bootstrap
//!
//! Creates the store's tables on connect. Names come from [`TableNames`],
//! so the statements are built at runtime rather than shipped as migration
//! files.
//!
//! ```text
//! vouchers ──┬── voucher_items      (allow-list, item scheme)
//!            ├── voucher_usages     (redeemer / item counters)
//!            └── redeemer_voucher   (redemption history)
//! ```

use crate::config::TableNames;
use crate::store::storage_error;
use sqlx::SqlitePool;
use tracing::debug;
use voucher_core::VoucherResult;

/// `CREATE` statements for every table and index, in dependency order
pub fn create_statements(tables: &TableNames) -> Vec<String> {
    let vouchers = tables.vouchers();
    let items = tables.items();
    let usages = tables.usages();
    let redemptions = tables.redemptions();

    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {vouchers} (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                limit_scheme TEXT NOT NULL,
                disposable INTEGER NOT NULL DEFAULT 0,
                quantity INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                starts_at TEXT,
                expires_at TEXT,
                allowed_redeemers TEXT NOT NULL DEFAULT '[]',
                denied_redeemers TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{{}}',
                uses INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {items} (
                voucher_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                model_type TEXT NOT NULL,
                model_id TEXT NOT NULL,
                PRIMARY KEY (voucher_id, position)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {usages} (
                voucher_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                model_type TEXT NOT NULL,
                model_id TEXT NOT NULL,
                uses INTEGER NOT NULL DEFAULT 0,
                redeemed_at TEXT,
                PRIMARY KEY (voucher_id, subject, model_type, model_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {redemptions} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voucher_id TEXT NOT NULL,
                code TEXT NOT NULL,
                redeemer_type TEXT NOT NULL,
                redeemer_id TEXT NOT NULL,
                redeemed_at TEXT NOT NULL
            )
            "#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{redemptions}_redeemer \
             ON {redemptions}(redeemer_type, redeemer_id)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{redemptions}_voucher ON {redemptions}(voucher_id)"
        ),
    ]
}

/// Run every `CREATE` statement against `pool`
pub async fn bootstrap(pool: &SqlitePool, tables: &TableNames) -> VoucherResult<()> {
    for statement in create_statements(tables) {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .map_err(storage_error)?;
    }

    debug!(vouchers = %tables.vouchers(), "voucher schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_use_configured_names() {
        let tables = TableNames::default().with_prefix("shop_");
        let statements = create_statements(&tables);

        assert_eq!(statements.len(), 6);
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS shop_vouchers"));
        assert!(statements[1].contains("shop_voucher_items"));
        assert!(statements[2].contains("shop_voucher_usages"));
        assert!(statements[3].contains("shop_redeemer_voucher"));
        assert!(statements[4].contains("idx_shop_redeemer_voucher_redeemer"));
        // escaped braces render as a JSON object default
        assert!(statements[0].contains("DEFAULT '{}'"));
    }
}
