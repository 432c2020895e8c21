use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{
    ERROR_DEACTIVATION_CEILING, HistorySource, NewProduct, PriceHistoryRecord, PriceUpdate, Product,
    generate_id,
};
use crate::utils::error::{AppError, Result};

/// Hours of inactivity after which an error-deactivated product becomes
/// eligible for automatic reactivation.
const REACTIVATION_AFTER_HOURS: i64 = 24;

/// Persistence operations the monitoring pipeline depends on. Implemented by
/// the sqlite store below and by in-memory doubles in tests.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, new_product: NewProduct) -> Result<Product>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>>;
    async fn find_by_url(&self, url: &str) -> Result<Option<Product>>;
    async fn find_active(&self) -> Result<Vec<Product>>;

    /// Active products whose last check is missing or older than the
    /// interval, below the error ceiling, most overdue first (never-checked
    /// products lead), capped at `max_count`.
    async fn find_due_for_check(&self, interval_minutes: u64, max_count: u32)
    -> Result<Vec<Product>>;

    /// Shift `current_price` into `last_price`, store the new price, stamp
    /// the check, and reset the error trail.
    async fn update_price(&self, id: &str, new_price: f64) -> Result<PriceUpdate>;

    /// Record a failed check. Crossing the ceiling deactivates the product.
    async fn increment_error(&self, id: &str, message: &str) -> Result<()>;

    /// Reactivate products that were deactivated by errors and have not been
    /// checked for 24 hours. Returns how many were brought back.
    async fn reactivate_stale_errored(&self) -> Result<u64>;

    async fn append_history(
        &self,
        product_id: &str,
        price: f64,
        change_percent: Option<f64>,
        source: HistorySource,
    ) -> Result<()>;
    async fn recent_history(&self, product_id: &str, limit: u32) -> Result<Vec<PriceHistoryRecord>>;
    async fn purge_history_older_than(&self, days: u32) -> Result<u64>;

    async fn set_active(&self, id: &str, active: bool) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Write a consistent snapshot of the store; returns its location.
    async fn backup(&self) -> Result<String>;
}

pub struct SqliteProductStore {
    pool: SqlitePool,
    backup_dir: PathBuf,
}

impl SqliteProductStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            backup_dir: PathBuf::from("data/backups"),
        }
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(AppError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                current_price REAL,
                last_price REAL,
                target_price REAL,
                promotion_threshold REAL NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_checked_at TEXT,
                check_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                channel_id TEXT,
                guild_id TEXT,
                user_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                price REAL NOT NULL,
                price_change_percent REAL,
                checked_at TEXT NOT NULL,
                source TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_product \
             ON price_history(product_id, checked_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn insert(&self, new_product: NewProduct) -> Result<Product> {
        let product = Product::new(new_product);

        sqlx::query(
            r#"
            INSERT INTO products (
                id, url, name, current_price, last_price, target_price,
                promotion_threshold, is_active, last_checked_at, check_count,
                error_count, last_error, channel_id, guild_id, user_id,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(&product.url)
        .bind(&product.name)
        .bind(product.current_price)
        .bind(product.last_price)
        .bind(product.target_price)
        .bind(product.promotion_threshold)
        .bind(product.is_active)
        .bind(product.last_checked_at)
        .bind(product.check_count)
        .bind(product.error_count)
        .bind(&product.last_error)
        .bind(&product.channel_id)
        .bind(&product.guild_id)
        .bind(&product.user_id)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn find_active(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE is_active = 1 ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn find_due_for_check(
        &self,
        interval_minutes: u64,
        max_count: u32,
    ) -> Result<Vec<Product>> {
        let cutoff = Utc::now() - Duration::minutes(interval_minutes as i64);

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT * FROM products
            WHERE is_active = 1
              AND error_count < ?
              AND (last_checked_at IS NULL OR last_checked_at <= ?)
            ORDER BY last_checked_at IS NOT NULL, last_checked_at ASC
            LIMIT ?
            "#,
        )
        .bind(ERROR_DEACTIVATION_CEILING)
        .bind(cutoff)
        .bind(max_count)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    async fn update_price(&self, id: &str, new_price: f64) -> Result<PriceUpdate> {
        let mut tx = self.pool.begin().await?;

        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: format!("product {id}"),
            })?;

        let update = PriceUpdate::compute(product.current_price, new_price);
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE products
            SET last_price = current_price,
                current_price = ?,
                last_checked_at = ?,
                check_count = check_count + 1,
                error_count = 0,
                last_error = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_price)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(update)
    }

    async fn increment_error(&self, id: &str, message: &str) -> Result<()> {
        let now = Utc::now();

        // Increment and ceiling-triggered deactivation happen in one UPDATE.
        let result = sqlx::query(
            r#"
            UPDATE products
            SET error_count = error_count + 1,
                last_error = ?,
                last_checked_at = ?,
                updated_at = ?,
                is_active = CASE WHEN error_count + 1 >= ? THEN 0 ELSE is_active END
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(ERROR_DEACTIVATION_CEILING)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: format!("product {id}"),
            });
        }
        Ok(())
    }

    async fn reactivate_stale_errored(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(REACTIVATION_AFTER_HOURS);

        let result = sqlx::query(
            r#"
            UPDATE products
            SET is_active = 1,
                error_count = 0,
                last_error = NULL,
                updated_at = ?
            WHERE is_active = 0
              AND error_count >= ?
              AND last_checked_at IS NOT NULL
              AND last_checked_at <= ?
            "#,
        )
        .bind(Utc::now())
        .bind(ERROR_DEACTIVATION_CEILING)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn append_history(
        &self,
        product_id: &str,
        price: f64,
        change_percent: Option<f64>,
        source: HistorySource,
    ) -> Result<()> {
        let record =
            PriceHistoryRecord::new(product_id.to_string(), price, change_percent, source);

        sqlx::query(
            r#"
            INSERT INTO price_history (id, product_id, price, price_change_percent, checked_at, source)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.product_id)
        .bind(record.price)
        .bind(record.price_change_percent)
        .bind(record.checked_at)
        .bind(record.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_history(
        &self,
        product_id: &str,
        limit: u32,
    ) -> Result<Vec<PriceHistoryRecord>> {
        let records = sqlx::query_as::<_, PriceHistoryRecord>(
            "SELECT * FROM price_history WHERE product_id = ? ORDER BY checked_at DESC LIMIT ?",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn purge_history_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days as i64);

        let result = sqlx::query("DELETE FROM price_history WHERE checked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET is_active = ?, error_count = 0, last_error = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: format!("product {id}"),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn backup(&self) -> Result<String> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let filename = format!(
            "pricewatch-{}-{}.db",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &generate_id()[..8]
        );
        let path = self.backup_dir.join(filename);

        sqlx::query(&format!("VACUUM INTO '{}'", path.display()))
            .execute(&self.pool)
            .await?;

        info!(path = %path.display(), "store backup written");
        Ok(path.to_string_lossy().to_string())
    }
}
