//! In-process storage area, used for ephemeral contexts and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{announce_change, check_quota, entry_size, Storage, StorageChange, StorageUsage};
use crate::errors::AppResult;

struct Area {
    /// Values are kept serialized so usage reflects stored bytes.
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    quota_bytes: Option<u64>,
}

/// Handle onto an in-memory storage area.
#[derive(Clone)]
pub struct MemoryStorage {
    area: Arc<Area>,
    context: Uuid,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Area that refuses writes past `quota_bytes`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self::build(Some(quota_bytes))
    }

    fn build(quota_bytes: Option<u64>) -> Self {
        let (changes, _) = broadcast::channel(super::CHANGE_CHANNEL_CAPACITY);
        Self {
            area: Arc::new(Area {
                entries: Mutex::new(HashMap::new()),
                changes,
                quota_bytes,
            }),
            context: Uuid::new_v4(),
        }
    }

    /// A new context sharing this area.
    pub fn context(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            context: Uuid::new_v4(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn context_id(&self) -> Uuid {
        self.context
    }

    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let raw = self.area.entries.lock().get(key).cloned();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        let serialized = serde_json::to_string(&value)?;
        let old = {
            let mut entries = self.area.entries.lock();
            let other_bytes: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum();
            check_quota(other_bytes, entry_size(key, &serialized), self.area.quota_bytes)?;
            entries.insert(key.to_string(), serialized)
        };

        let old_value = old.map(|raw| serde_json::from_str(&raw)).transpose()?;
        announce_change(&self.area.changes, key, old_value, Some(value), self.context);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let old = self.area.entries.lock().remove(key);
        match old {
            Some(raw) => {
                let old_value = serde_json::from_str(&raw)?;
                announce_change(&self.area.changes, key, Some(old_value), None, self.context);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn usage(&self) -> AppResult<StorageUsage> {
        let bytes_in_use = self
            .area
            .entries
            .lock()
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum();
        Ok(StorageUsage {
            bytes_in_use,
            quota_bytes: self.area.quota_bytes,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.area.changes.subscribe()
    }
}
