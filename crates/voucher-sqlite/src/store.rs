//! # SQLite Voucher Store
//!
//! Persistent [`VoucherStore`] + [`UsageLedger`] on a sqlx SQLite pool.
//!
//! Every counter change is a single conditional statement, so the limit
//! check and the bump cannot interleave with another request:
//!
//! ```text
//! global:   UPDATE vouchers SET uses = uses + 1
//!           WHERE id = ? AND (limit IS NULL OR uses < limit) RETURNING uses
//!
//! subject:  INSERT INTO voucher_usages ... VALUES (..., 1, ...)
//!           ON CONFLICT DO UPDATE SET uses = uses + 1
//!           WHERE limit IS NULL OR uses < limit RETURNING uses
//! ```
//!
//! No row back means the counter was already at its limit.

use crate::config::{StoreConfig, TableNames};
use crate::schema;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, Sqlite, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use voucher_core::{
    LimitScheme, ModelRef, RedemptionLink, Subject, UsageLedger, UsageRecord, Voucher,
    VoucherCatalog, VoucherError, VoucherItem, VoucherResult, VoucherStore,
};

const VOUCHER_COLUMNS: &str = "id, code, limit_scheme, disposable, quantity, active, \
     starts_at, expires_at, allowed_redeemers, denied_redeemers, metadata, created_at";

pub(crate) fn storage_error(err: sqlx::Error) -> VoucherError {
    VoucherError::Storage(err.to_string())
}

fn write_error(err: sqlx::Error, code: &str) -> VoucherError {
    let duplicate = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
    if duplicate {
        VoucherError::InvalidInput(format!("voucher code {code} already exists"))
    } else {
        storage_error(err)
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    // fixed width keeps text ordering chronological
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> VoucherResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| VoucherError::Storage(format!("invalid timestamp {value:?}: {e}")))
}

fn parse_id(value: &str) -> VoucherResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| VoucherError::Storage(format!("invalid voucher id {value:?}: {e}")))
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct VoucherRow {
    id: String,
    code: String,
    limit_scheme: String,
    disposable: bool,
    quantity: Option<i64>,
    active: bool,
    starts_at: Option<String>,
    expires_at: Option<String>,
    allowed_redeemers: String,
    denied_redeemers: String,
    metadata: String,
    created_at: String,
}

impl VoucherRow {
    fn into_voucher(self, items: Vec<VoucherItem>) -> VoucherResult<Voucher> {
        let scheme = LimitScheme::from_str(&self.limit_scheme)?;

        let mut voucher = Voucher::new(self.code, scheme);
        voucher.id = parse_id(&self.id)?;
        voucher.disposable = self.disposable;
        voucher.quantity = self.quantity.map(to_count);
        voucher.items = items;
        voucher.active = self.active;
        voucher.starts_at = self.starts_at.as_deref().map(parse_time).transpose()?;
        voucher.expires_at = self.expires_at.as_deref().map(parse_time).transpose()?;
        voucher.allowed_redeemers = serde_json::from_str(&self.allowed_redeemers)?;
        voucher.denied_redeemers = serde_json::from_str(&self.denied_redeemers)?;
        voucher.metadata = serde_json::from_str(&self.metadata)?;
        voucher.created_at = parse_time(&self.created_at)?;
        Ok(voucher)
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    voucher_id: String,
    model_type: String,
    model_id: String,
}

impl ItemRow {
    fn into_item(self) -> VoucherItem {
        ModelRef::new(self.model_type, self.model_id)
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    voucher_id: String,
    subject: String,
    model_type: String,
    model_id: String,
    uses: i64,
    redeemed_at: Option<String>,
}

impl UsageRow {
    fn into_record(self) -> VoucherResult<UsageRecord> {
        let model = ModelRef::new(self.model_type, self.model_id);
        let subject = Subject::from_label(&self.subject, model).ok_or_else(|| {
            VoucherError::Storage(format!("unknown usage subject {:?}", self.subject))
        })?;

        Ok(UsageRecord {
            voucher_id: parse_id(&self.voucher_id)?,
            subject,
            count: to_count(self.uses),
            redeemed_at: self.redeemed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct LinkRow {
    voucher_id: String,
    code: String,
    redeemer_type: String,
    redeemer_id: String,
    redeemed_at: String,
}

impl LinkRow {
    fn into_link(self) -> VoucherResult<RedemptionLink> {
        Ok(RedemptionLink {
            voucher_id: parse_id(&self.voucher_id)?,
            code: self.code,
            redeemer: ModelRef::new(self.redeemer_type, self.redeemer_id),
            redeemed_at: parse_time(&self.redeemed_at)?,
        })
    }
}

/// SQLite-backed voucher store and usage ledger.
pub struct SqliteVoucherStore {
    pool: SqlitePool,
    tables: TableNames,
}

impl SqliteVoucherStore {
    /// Connect, then create any missing tables.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral, one connection)
    /// - `sqlite://vouchers.db` - File-based database, created if missing
    pub async fn new(config: StoreConfig) -> VoucherResult<Self> {
        config.validate()?;

        info!(
            url = %config.database_url,
            pool_size = config.pool_size(),
            "connecting voucher store"
        );

        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| VoucherError::Configuration(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.pool_size())
            .min_connections(1);

        if config.is_in_memory() {
            // the database lives only as long as its one connection
            pool_options = pool_options
                .idle_timeout(Option::<Duration>::None)
                .max_lifetime(Option::<Duration>::None);
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        schema::bootstrap(&pool, &config.tables).await?;

        Ok(Self {
            pool,
            tables: config.tables,
        })
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> VoucherResult<Self> {
        Self::new(StoreConfig::in_memory()).await
    }

    /// Connect using [`StoreConfig::from_env`].
    pub async fn from_env() -> VoucherResult<Self> {
        Self::new(StoreConfig::from_env()?).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Insert every voucher in `catalog`; returns how many were added.
    pub async fn import_catalog(&self, catalog: &VoucherCatalog) -> VoucherResult<usize> {
        for voucher in &catalog.vouchers {
            self.insert(voucher).await?;
        }
        info!(vouchers = catalog.vouchers.len(), "catalog imported");
        Ok(catalog.vouchers.len())
    }

    async fn exists(&self, id: Uuid) -> VoucherResult<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", self.tables.vouchers());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count > 0)
    }

    async fn items_of(&self, voucher_id: &str) -> VoucherResult<Vec<VoucherItem>> {
        let sql = format!(
            "SELECT voucher_id, model_type, model_id FROM {} WHERE voucher_id = ? ORDER BY position",
            self.tables.items()
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(voucher_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    async fn hydrate(&self, row: VoucherRow) -> VoucherResult<Voucher> {
        let items = self.items_of(&row.id).await?;
        row.into_voucher(items)
    }

    async fn write_items(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        voucher: &Voucher,
    ) -> VoucherResult<()> {
        let delete = format!("DELETE FROM {} WHERE voucher_id = ?", self.tables.items());
        sqlx::query(&delete)
            .bind(voucher.id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;

        let insert = format!(
            "INSERT INTO {} (voucher_id, position, model_type, model_id) VALUES (?, ?, ?, ?)",
            self.tables.items()
        );
        for (position, item) in voucher.items.iter().enumerate() {
            sqlx::query(&insert)
                .bind(voucher.id.to_string())
                .bind(position as i64)
                .bind(item.kind.as_str())
                .bind(item.id.as_str())
                .execute(&mut **tx)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for SqliteVoucherStore {
    async fn insert(&self, voucher: &Voucher) -> VoucherResult<()> {
        voucher.validate()?;

        let sql = format!(
            "INSERT INTO {} ({VOUCHER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.tables.vouchers()
        );
        let allowed = serde_json::to_string(&voucher.allowed_redeemers)?;
        let denied = serde_json::to_string(&voucher.denied_redeemers)?;
        let metadata = serde_json::to_string(&voucher.metadata)?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(&sql)
            .bind(voucher.id.to_string())
            .bind(voucher.code.as_str())
            .bind(voucher.scheme().as_str())
            .bind(voucher.disposable)
            .bind(voucher.quantity.map(i64::from))
            .bind(voucher.active)
            .bind(voucher.starts_at.map(format_time))
            .bind(voucher.expires_at.map(format_time))
            .bind(allowed)
            .bind(denied)
            .bind(metadata)
            .bind(format_time(voucher.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, &voucher.code))?;

        self.write_items(&mut tx, voucher).await?;
        tx.commit().await.map_err(storage_error)?;

        debug!(code = %voucher.code, scheme = %voucher.scheme(), "voucher stored");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> VoucherResult<Option<Voucher>> {
        let sql = format!(
            "SELECT {VOUCHER_COLUMNS} FROM {} WHERE id = ?",
            self.tables.vouchers()
        );
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> VoucherResult<Voucher> {
        let sql = format!(
            "SELECT {VOUCHER_COLUMNS} FROM {} WHERE code = ?",
            self.tables.vouchers()
        );
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        let inactive = || VoucherError::InactiveVoucher {
            code: code.to_string(),
        };

        let voucher = self.hydrate(row.ok_or_else(inactive)?).await?;
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

        let sql = format!(
            "UPDATE {} SET code = ?, disposable = ?, quantity = ?, active = ?, starts_at = ?, \
             expires_at = ?, allowed_redeemers = ?, denied_redeemers = ?, metadata = ?, \
             created_at = ? WHERE id = ?",
            self.tables.vouchers()
        );
        let allowed = serde_json::to_string(&voucher.allowed_redeemers)?;
        let denied = serde_json::to_string(&voucher.denied_redeemers)?;
        let metadata = serde_json::to_string(&voucher.metadata)?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(&sql)
            .bind(voucher.code.as_str())
            .bind(voucher.disposable)
            .bind(voucher.quantity.map(i64::from))
            .bind(voucher.active)
            .bind(voucher.starts_at.map(format_time))
            .bind(voucher.expires_at.map(format_time))
            .bind(allowed)
            .bind(denied)
            .bind(metadata)
            .bind(format_time(voucher.created_at))
            .bind(voucher.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, &voucher.code))?;

        self.write_items(&mut tx, voucher).await?;
        tx.commit().await.map_err(storage_error)?;

        debug!(code = %voucher.code, "voucher updated");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> VoucherResult<bool> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let sql = format!("DELETE FROM {} WHERE id = ?", self.tables.vouchers());
        let removed = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .rows_affected();

        if removed == 0 {
            return Ok(false);
        }

        // redemption history is kept
        for table in [self.tables.items(), self.tables.usages()] {
            let sql = format!("DELETE FROM {table} WHERE voucher_id = ?");
            sqlx::query(&sql)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(true)
    }

    async fn list(&self) -> VoucherResult<Vec<Voucher>> {
        let sql = format!(
            "SELECT {VOUCHER_COLUMNS} FROM {} ORDER BY created_at",
            self.tables.vouchers()
        );
        let rows = sqlx::query_as::<_, VoucherRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        let sql = format!(
            "SELECT voucher_id, model_type, model_id FROM {} ORDER BY voucher_id, position",
            self.tables.items()
        );
        let item_rows = sqlx::query_as::<_, ItemRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut items: HashMap<String, Vec<VoucherItem>> = HashMap::new();
        for row in item_rows {
            items
                .entry(row.voucher_id.clone())
                .or_default()
                .push(row.into_item());
        }

        rows.into_iter()
            .map(|row| {
                let voucher_items = items.remove(&row.id).unwrap_or_default();
                row.into_voucher(voucher_items)
            })
            .collect()
    }
}

#[async_trait]
impl UsageLedger for SqliteVoucherStore {
    async fn increment_use(&self, voucher: &Voucher) -> VoucherResult<u32> {
        let sql = format!(
            "UPDATE {} SET uses = uses + 1 WHERE id = ? AND (? IS NULL OR uses < ?) RETURNING uses",
            self.tables.vouchers()
        );
        let limit = voucher.limit().map(i64::from);

        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(voucher.id.to_string())
            .bind(limit)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match count {
            Some(count) => Ok(to_count(count)),
            None if self.exists(voucher.id).await? => Err(voucher.exhaustion_error()),
            None => Err(VoucherError::InactiveVoucher {
                code: voucher.code.clone(),
            }),
        }
    }

    async fn decrement_use(&self, voucher: &Voucher) -> VoucherResult<bool> {
        let sql = format!(
            "UPDATE {} SET uses = uses - 1 WHERE id = ? AND uses > 0",
            self.tables.vouchers()
        );
        let result = sqlx::query(&sql)
            .bind(voucher.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_model_use(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<u32> {
        let sql = format!(
            "INSERT INTO {} (voucher_id, subject, model_type, model_id, uses, redeemed_at) \
             VALUES (?, ?, ?, ?, 1, ?) \
             ON CONFLICT (voucher_id, subject, model_type, model_id) \
             DO UPDATE SET uses = uses + 1, redeemed_at = excluded.redeemed_at \
             WHERE ? IS NULL OR uses < ? \
             RETURNING uses",
            self.tables.usages()
        );
        let model = subject.model();
        let limit = voucher.limit().map(i64::from);

        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(voucher.id.to_string())
            .bind(subject.label())
            .bind(model.kind.as_str())
            .bind(model.id.as_str())
            .bind(format_time(Utc::now()))
            .bind(limit)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        count.map(to_count).ok_or_else(|| voucher.exhaustion_error())
    }

    async fn decrement_model_use(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<bool> {
        let sql = format!(
            "UPDATE {} SET uses = uses - 1 \
             WHERE voucher_id = ? AND subject = ? AND model_type = ? AND model_id = ? AND uses > 0",
            self.tables.usages()
        );
        let model = subject.model();

        let result = sqlx::query(&sql)
            .bind(voucher.id.to_string())
            .bind(subject.label())
            .bind(model.kind.as_str())
            .bind(model.id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn uses(&self, voucher: &Voucher) -> VoucherResult<u32> {
        let sql = format!("SELECT uses FROM {} WHERE id = ?", self.tables.vouchers());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(voucher.id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count.map_or(0, to_count))
    }

    async fn usage_record(
        &self,
        voucher: &Voucher,
        subject: &Subject,
    ) -> VoucherResult<Option<UsageRecord>> {
        let sql = format!(
            "SELECT voucher_id, subject, model_type, model_id, uses, redeemed_at FROM {} \
             WHERE voucher_id = ? AND subject = ? AND model_type = ? AND model_id = ?",
            self.tables.usages()
        );
        let model = subject.model();

        let row = sqlx::query_as::<_, UsageRow>(&sql)
            .bind(voucher.id.to_string())
            .bind(subject.label())
            .bind(model.kind.as_str())
            .bind(model.id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.map(UsageRow::into_record).transpose()
    }

    async fn record_redemption(&self, link: &RedemptionLink) -> VoucherResult<()> {
        let sql = format!(
            "INSERT INTO {} (voucher_id, code, redeemer_type, redeemer_id, redeemed_at) \
             VALUES (?, ?, ?, ?, ?)",
            self.tables.redemptions()
        );
        sqlx::query(&sql)
            .bind(link.voucher_id.to_string())
            .bind(link.code.as_str())
            .bind(link.redeemer.kind.as_str())
            .bind(link.redeemer.id.as_str())
            .bind(format_time(link.redeemed_at))
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn redemptions_for(&self, redeemer: &ModelRef) -> VoucherResult<Vec<RedemptionLink>> {
        let sql = format!(
            "SELECT voucher_id, code, redeemer_type, redeemer_id, redeemed_at FROM {} \
             WHERE redeemer_type = ? AND redeemer_id = ? ORDER BY id",
            self.tables.redemptions()
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(redeemer.kind.as_str())
            .bind(redeemer.id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(LinkRow::into_link).collect()
    }

    async fn has_redeemed(&self, voucher: &Voucher, redeemer: &ModelRef) -> VoucherResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE voucher_id = ? AND redeemer_type = ? AND redeemer_id = ?",
            self.tables.redemptions()
        );
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(voucher.id.to_string())
            .bind(redeemer.kind.as_str())
            .bind(redeemer.id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use voucher_core::{RecordingEventSink, RedemptionEngine};

    fn user(id: u32) -> ModelRef {
        ModelRef::new("User", id)
    }

    fn book() -> ModelRef {
        ModelRef::new("Book", 42)
    }

    fn pen() -> ModelRef {
        ModelRef::new("Pen", 7)
    }

    async fn store_with(vouchers: &[Voucher]) -> Arc<SqliteVoucherStore> {
        let store = SqliteVoucherStore::in_memory().await.unwrap();
        for voucher in vouchers {
            store.insert(voucher).await.unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_voucher_round_trip() {
        let now = Utc::now();
        let voucher = Voucher::new("FREEBOOK", LimitScheme::Item)
            .with_quantity(3)
            .with_item(book())
            .with_item(ModelRef::new("Book", 43))
            .with_window(Some(now - ChronoDuration::days(1)), Some(now + ChronoDuration::days(7)))
            .allow_redeemer(user(1))
            .deny_redeemer(user(2))
            .with_metadata("campaign", "spring");
        let store = store_with(&[voucher.clone()]).await;

        assert_eq!(store.get(voucher.id).await.unwrap(), Some(voucher.clone()));
        assert_eq!(store.find_by_code("FREEBOOK").await.unwrap(), voucher);
        assert_eq!(store.list().await.unwrap(), vec![voucher]);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_code_inactive_and_unknown() {
        let store = store_with(&[Voucher::new("OLD", LimitScheme::Global).deactivated()]).await;

        for code in ["OLD", "MISSING"] {
            assert!(matches!(
                store.find_by_code(code).await,
                Err(VoucherError::InactiveVoucher { code: c }) if c == code
            ));
        }
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = store_with(&[Voucher::new("SAVE10", LimitScheme::Global)]).await;

        let err = store
            .insert(&Voucher::new("SAVE10", LimitScheme::Redeemer))
            .await
            .unwrap_err();
        assert!(matches!(err, VoucherError::InvalidInput(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_scheme() {
        let voucher = Voucher::new("SAVE10", LimitScheme::Global).with_quantity(2);
        let store = store_with(&[voucher.clone()]).await;

        let mut changed = voucher.clone().with_quantity(5);
        changed.code = "SAVE20".to_string();
        store.update(&changed).await.unwrap();
        assert_eq!(store.find_by_code("SAVE20").await.unwrap().quantity, Some(5));
        assert!(store.find_by_code("SAVE10").await.is_err());

        let mut rescheme = Voucher::new("SAVE20", LimitScheme::Redeemer);
        rescheme.id = voucher.id;
        assert!(matches!(
            store.update(&rescheme).await,
            Err(VoucherError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_counters() {
        let voucher = Voucher::new("WELCOME", LimitScheme::Redeemer);
        let store = store_with(&[voucher.clone()]).await;
        let subject = Subject::Redeemer(user(1));
        store.increment_model_use(&voucher, &subject).await.unwrap();

        assert!(store.delete(voucher.id).await.unwrap());
        assert!(!store.delete(voucher.id).await.unwrap());
        assert!(store.usage_record(&voucher, &subject).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_global_counter_respects_limit() {
        let voucher = Voucher::new("SAVE10", LimitScheme::Global).with_quantity(2);
        let store = store_with(&[voucher.clone()]).await;

        assert_eq!(store.increment_use(&voucher).await.unwrap(), 1);
        assert_eq!(store.increment_use(&voucher).await.unwrap(), 2);
        assert!(matches!(
            store.increment_use(&voucher).await,
            Err(VoucherError::RedeemsExhausted { .. })
        ));
        assert_eq!(store.uses(&voucher).await.unwrap(), 2);

        assert!(store.decrement_use(&voucher).await.unwrap());
        assert!(store.decrement_use(&voucher).await.unwrap());
        assert!(!store.decrement_use(&voucher).await.unwrap());
        assert_eq!(store.uses(&voucher).await.unwrap(), 0);

        let unknown = Voucher::new("GHOST", LimitScheme::Global);
        assert!(matches!(
            store.increment_use(&unknown).await,
            Err(VoucherError::InactiveVoucher { .. })
        ));
    }

    #[tokio::test]
    async fn test_subject_counter_upsert() {
        let voucher = Voucher::new("FREEBOOK", LimitScheme::Item)
            .disposable()
            .with_item(book());
        let store = store_with(&[voucher.clone()]).await;
        let subject = Subject::Item(book());

        assert!(store.usage_record(&voucher, &subject).await.unwrap().is_none());
        assert_eq!(store.increment_model_use(&voucher, &subject).await.unwrap(), 1);
        assert!(matches!(
            store.increment_model_use(&voucher, &subject).await,
            Err(VoucherError::AlreadyRedeemed { .. })
        ));

        let record = store.usage_record(&voucher, &subject).await.unwrap().unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.subject, subject);
        assert!(record.redeemed_at.is_some());
        assert!(store.is_redeemed(&voucher, Some(&subject)).await.unwrap());

        assert!(store.decrement_model_use(&voucher, &subject).await.unwrap());
        assert!(!store.decrement_model_use(&voucher, &subject).await.unwrap());
        // record survives at zero
        assert_eq!(store.model_uses(&voucher, &subject).await.unwrap(), 0);
        assert!(store.usage_record(&voucher, &subject).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_redemption_history() {
        let first = Voucher::new("A", LimitScheme::Global);
        let second = Voucher::new("B", LimitScheme::Global);
        let store = store_with(&[first.clone(), second.clone()]).await;
        let now = Utc::now();

        store
            .record_redemption(&RedemptionLink::new(&second, user(1), now))
            .await
            .unwrap();
        store
            .record_redemption(&RedemptionLink::new(&first, user(1), now))
            .await
            .unwrap();
        store
            .record_redemption(&RedemptionLink::new(&first, user(2), now))
            .await
            .unwrap();

        let history = store.redemptions_for(&user(1)).await.unwrap();
        let codes: Vec<&str> = history.iter().map(|link| link.code.as_str()).collect();
        assert_eq!(codes, vec!["B", "A"]);
        assert_eq!(history[0].redeemed_at, now);

        assert!(store.has_redeemed(&first, &user(2)).await.unwrap());
        assert!(!store.has_redeemed(&second, &user(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_catalog() {
        let catalog = VoucherCatalog::from_toml(
            r#"
            [[vouchers]]
            code = "SAVE10"
            quantity = 2

            [[vouchers]]
            code = "FREEBOOK"
            limit_scheme = "item"
            disposable = true
            items = [{ kind = "Book", id = "42" }]
            "#,
        )
        .unwrap();

        let store = SqliteVoucherStore::in_memory().await.unwrap();
        assert_eq!(store.import_catalog(&catalog).await.unwrap(), 2);

        let freebook = store.find_by_code("FREEBOOK").await.unwrap();
        assert_eq!(freebook.scheme(), LimitScheme::Item);
        assert_eq!(freebook.items, vec![book()]);
    }

    #[tokio::test]
    async fn test_custom_table_names() {
        let config = StoreConfig::in_memory()
            .with_tables(TableNames::default().with_prefix("shop_"));
        let store = SqliteVoucherStore::new(config).await.unwrap();
        store
            .insert(&Voucher::new("SAVE10", LimitScheme::Global))
            .await
            .unwrap();

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shop_vouchers")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_engine_scenarios() {
        let save10 = Voucher::new("SAVE10", LimitScheme::Global).with_quantity(2);
        let freebook = Voucher::new("FREEBOOK", LimitScheme::Item)
            .disposable()
            .with_item(book());
        let store = store_with(&[save10.clone(), freebook.clone()]).await;
        let events = Arc::new(RecordingEventSink::new());
        let engine = RedemptionEngine::with_backend(store.clone(), events.clone());

        engine.redeem("SAVE10", &user(1), None).await.unwrap();
        engine.redeem("SAVE10", &user(2), None).await.unwrap();
        assert!(matches!(
            engine.redeem("SAVE10", &user(3), None).await,
            Err(VoucherError::RedeemsExhausted { .. })
        ));
        assert_eq!(store.uses(&save10).await.unwrap(), 2);

        engine
            .redeem("FREEBOOK", &user(1), Some(vec![book(), pen()].into()))
            .await
            .unwrap();
        assert_eq!(
            store.model_uses(&freebook, &Subject::Item(book())).await.unwrap(),
            1
        );
        assert!(store
            .usage_record(&freebook, &Subject::Item(pen()))
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            engine.redeem("FREEBOOK", &user(1), Some(book().into())).await,
            Err(VoucherError::AlreadyRedeemed { .. })
        ));

        assert!(engine.refund(&save10, &user(1), None).await.unwrap());
        engine.redeem("SAVE10", &user(3), None).await.unwrap();

        assert_eq!(engine.redemptions_for(&user(1)).await.unwrap().len(), 2);
        assert_eq!(events.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_grant_once() {
        let path = std::env::temp_dir().join(format!("vouchers-{}.db", Uuid::new_v4()));
        let config =
            StoreConfig::new(format!("sqlite://{}", path.display())).with_max_connections(8);
        let store = Arc::new(SqliteVoucherStore::new(config).await.unwrap());

        let voucher = Voucher::new("LAST", LimitScheme::Global).disposable();
        store.insert(&voucher).await.unwrap();
        let engine =
            RedemptionEngine::with_backend(store.clone(), Arc::new(RecordingEventSink::new()));

        let mut handles = Vec::new();
        for id in 0..48 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.redeem("LAST", &user(id), None).await
            }));
        }

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(err) => assert!(err.is_exhaustion(), "unexpected error: {err:?}"),
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(store.uses(&voucher).await.unwrap(), 1);

        store.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
