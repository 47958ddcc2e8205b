//! Durable key/value storage shared by every context.
//!
//! A storage *area* holds the data and the change channel; a storage
//! *handle* is one context's view of that area. Every write is announced on
//! the change channel to all handles, the writer included, tagged with the
//! writer's context id.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::{init_database, SqliteStorage};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Capacity of the change notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A key changed in durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Context that performed the write
    pub origin: Uuid,
}

/// Bytes used by the area and its quota, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub bytes_in_use: u64,
    pub quota_bytes: Option<u64>,
}

/// Asynchronous key/value store with change notifications.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Identifier of the context owning this handle.
    fn context_id(&self) -> Uuid;

    /// Read a key.
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;

    /// Replace a key wholesale. Fails with `QuotaExceeded` without writing
    /// anything if the area would grow past its quota.
    async fn set(&self, key: &str, value: Value) -> AppResult<()>;

    /// Delete a key. Returns false if it did not exist.
    async fn remove(&self, key: &str) -> AppResult<bool>;

    /// Current usage of the area.
    async fn usage(&self) -> AppResult<StorageUsage>;

    /// Subscribe to changes made through any handle of this area.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Read a key and deserialize it.
pub async fn get_typed<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> AppResult<Option<T>> {
    match storage.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize a value and store it under a key.
pub async fn set_typed<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) -> AppResult<()> {
    storage.set(key, serde_json::to_value(value)?).await
}

/// Byte cost of one stored entry.
pub(crate) fn entry_size(key: &str, serialized: &str) -> u64 {
    (key.len() + serialized.len()) as u64
}

/// Fail if writing an entry of `entry_bytes` next to `other_bytes` breaks the quota.
pub(crate) fn check_quota(other_bytes: u64, entry_bytes: u64, quota: Option<u64>) -> AppResult<()> {
    match quota {
        Some(quota_bytes) if other_bytes + entry_bytes > quota_bytes => {
            tracing::warn!(
                bytes = other_bytes + entry_bytes,
                quota_bytes,
                "Refusing write over storage quota"
            );
            Err(AppError::QuotaExceeded {
                bytes_in_use: other_bytes + entry_bytes,
                quota_bytes,
            })
        }
        _ => Ok(()),
    }
}

/// Broadcast a change if the value actually changed.
pub(crate) fn announce_change(
    changes: &broadcast::Sender<StorageChange>,
    key: &str,
    old_value: Option<Value>,
    new_value: Option<Value>,
    origin: Uuid,
) {
    if old_value == new_value {
        return;
    }
    // No receivers is fine: nobody is listening in this process yet.
    let _ = changes.send(StorageChange {
        key: key.to_string(),
        old_value,
        new_value,
        origin,
    });
}
