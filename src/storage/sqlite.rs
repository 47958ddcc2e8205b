//! SQLite-backed storage area.
//!
//! SQLite is the source of truth for everything that must survive a restart.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{announce_change, check_quota, entry_size, Storage, StorageChange, StorageUsage};
use crate::errors::AppResult;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Handle onto a SQLite storage area.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    changes: broadcast::Sender<StorageChange>,
    context: Uuid,
    quota_bytes: Option<u64>,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, quota_bytes: Option<u64>) -> Self {
        let (changes, _) = broadcast::channel(super::CHANGE_CHANNEL_CAPACITY);
        Self {
            pool,
            changes,
            context: Uuid::new_v4(),
            quota_bytes,
        }
    }

    /// Open (or create) the database at `db_path`.
    pub async fn open(db_path: &Path, quota_bytes: Option<u64>) -> AppResult<Self> {
        let pool = init_database(db_path).await?;
        tracing::info!("Durable storage opened at {:?}", db_path);
        Ok(Self::new(pool, quota_bytes))
    }

    /// A new context sharing this area.
    pub fn context(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            changes: self.changes.clone(),
            context: Uuid::new_v4(),
            quota_bytes: self.quota_bytes,
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn context_id(&self) -> Uuid {
        self.context
    }

    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        let serialized = serde_json::to_string(&value)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let old: Option<String> = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("value"));

        if self.quota_bytes.is_some() {
            let other_bytes: i64 = sqlx::query(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS bytes FROM kv WHERE key != ?",
            )
            .bind(key)
            .fetch_one(&mut *tx)
            .await?
            .get("bytes");
            check_quota(
                other_bytes.max(0) as u64,
                entry_size(key, &serialized),
                self.quota_bytes,
            )?;
        }

        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&serialized)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let old_value = old.map(|raw| serde_json::from_str(&raw)).transpose()?;
        announce_change(&self.changes, key, old_value, Some(value), self.context);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let old: Option<String> = sqlx::query("DELETE FROM kv WHERE key = ? RETURNING value")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("value"));

        match old {
            Some(raw) => {
                let old_value = serde_json::from_str(&raw)?;
                announce_change(&self.changes, key, Some(old_value), None, self.context);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn usage(&self) -> AppResult<StorageUsage> {
        let bytes: i64 = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS bytes FROM kv",
        )
        .fetch_one(&self.pool)
        .await?
        .get("bytes");

        Ok(StorageUsage {
            bytes_in_use: bytes.max(0) as u64,
            quota_bytes: self.quota_bytes,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
