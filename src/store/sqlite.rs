//! SQLite-backed definition store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::DefinitionStore;
use crate::error::{RatekeeperError, Result};
use crate::limiter::{LimiterConfig, LimiterDefinition};

const CREATE_LIMITS_TABLE: &str = "CREATE TABLE IF NOT EXISTS limits (
    id INTEGER PRIMARY KEY,
    limiter_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    count INTEGER NOT NULL,
    interval INTEGER NOT NULL,
    precision REAL NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
)";

/// Definition store over a `limits` table.
#[derive(Debug, Clone)]
pub struct SqliteDefinitionStore {
    pool: SqlitePool,
}

impl SqliteDefinitionStore {
    /// Open (creating if missing) the database at `database_url` and ensure the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::with_pool(pool);
        store.init_schema().await?;
        info!(database_url = %database_url, "Definition store connected");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `limits` table if it does not exist.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_LIMITS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace the definition for `limiter_id`.
    ///
    /// Returns the new `updated_at` stamp, which is strictly greater than any
    /// previous stamp of the same row.
    pub async fn save_definition(&self, limiter_id: &str, config: &LimiterConfig) -> Result<i64> {
        config.validate()?;

        let row = sqlx::query(
            "INSERT INTO limits (limiter_id, name, count, interval, precision, is_deleted, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(limiter_id) DO UPDATE SET
                name = excluded.name,
                count = excluded.count,
                interval = excluded.interval,
                precision = excluded.precision,
                is_deleted = 0,
                updated_at = max(excluded.updated_at, limits.updated_at + 1)
             RETURNING updated_at",
        )
        .bind(limiter_id)
        .bind(config.name.as_str())
        .bind(config.count)
        .bind(config.interval_millis)
        .bind(config.precision)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let updated_at: i64 = row.try_get("updated_at")?;
        debug!(limiter_id = %limiter_id, updated_at = updated_at, "Definition saved");
        Ok(updated_at)
    }

    /// Soft-delete the definition for `limiter_id`.
    pub async fn mark_deleted(&self, limiter_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE limits SET is_deleted = 1, updated_at = max(?, updated_at + 1)
             WHERE limiter_id = ? AND is_deleted = 0",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(limiter_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RatekeeperError::NotFound(limiter_id.to_string()));
        }
        debug!(limiter_id = %limiter_id, "Definition marked deleted");
        Ok(())
    }
}

#[async_trait]
impl DefinitionStore for SqliteDefinitionStore {
    async fn load_definitions(&self) -> Result<Vec<LimiterDefinition>> {
        let rows = sqlx::query(
            "SELECT limiter_id, name, count, interval, precision, updated_at
             FROM limits WHERE is_deleted = 0 ORDER BY limiter_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let config = LimiterConfig {
                name: row.try_get("name")?,
                interval_millis: row.try_get("interval")?,
                count: row.try_get("count")?,
                precision: row.try_get("precision")?,
            };
            definitions.push(LimiterDefinition::new(
                row.try_get::<String, _>("limiter_id")?,
                config,
                row.try_get("updated_at")?,
            ));
        }

        debug!(count = definitions.len(), "Definitions loaded");
        Ok(definitions)
    }
}
