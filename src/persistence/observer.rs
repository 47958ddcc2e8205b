//! Debounced list persistence.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::{Flush, QuotaRecovery, DEFAULT_DEBOUNCE};
use crate::collection::Indexable;
use crate::errors::{AppError, AppResult};
use crate::events::SubscriptionId;
use crate::list_manager::ListManager;
use crate::storage::Storage;

/// Options for a [`PersistenceObserver`].
#[derive(Debug, Clone, Copy)]
pub struct PersistenceOptions {
    pub debounce: Duration,
    /// Quota recovery policy, used only if the list opted into recovery
    pub quota_recovery: QuotaRecovery,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            quota_recovery: QuotaRecovery::default(),
        }
    }
}

/// Keeps one list manager and one storage key in sync.
pub struct PersistenceObserver<T>
where
    T: Indexable + Serialize + DeserializeOwned + std::fmt::Debug,
{
    manager: Arc<ListManager<T>>,
    storage: Arc<dyn Storage>,
    key: &'static str,
    options: PersistenceOptions,
    subscription: SubscriptionId,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> PersistenceObserver<T>
where
    T: Indexable + Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    /// Hydrate `manager` from storage, then start persisting its changes.
    ///
    /// Hydration completes before the change subscription exists, so the
    /// initial load never triggers a write.
    pub async fn attach(
        manager: Arc<ListManager<T>>,
        storage: Arc<dyn Storage>,
        options: PersistenceOptions,
    ) -> AppResult<Arc<Self>> {
        let key = manager.storage_key().ok_or_else(|| {
            AppError::Configuration(format!("List {} has no storage key", manager.name()))
        })?;

        let stored = storage.get(key).await?;
        let items = decode_items::<T>(key, stored);
        tracing::info!(list = manager.name(), count = items.len(), "Hydrating list from storage");
        for item in items {
            manager.put(item, &[]);
        }

        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let subscription = manager.subscribe_all(move |_| {
            // Receiver gone means the observer is shutting down.
            let _ = tx.send(());
        });

        let observer = Arc::new(Self {
            manager,
            storage,
            key,
            options,
            subscription,
            tasks: Mutex::new(Vec::new()),
        });

        let task = tokio::spawn(debounce_loop(
            Arc::downgrade(&observer),
            rx,
            options.debounce,
        ));
        observer.tasks.lock().push(task);

        Ok(observer)
    }

    /// Apply writes made to the same key by other contexts.
    ///
    /// Changes this context made itself are ignored. Only items that differ
    /// are put, and items missing from the incoming snapshot are removed.
    pub fn follow_external_changes(self: &Arc<Self>) {
        let rx = self.storage.subscribe();
        let task = tokio::spawn(follow_loop(Arc::downgrade(self), rx));
        self.tasks.lock().push(task);
    }

    pub fn manager(&self) -> &Arc<ListManager<T>> {
        &self.manager
    }

    /// Write the whole list to storage.
    pub async fn save(&self) -> AppResult<()> {
        let value = self.snapshot()?;
        match self.storage.set(self.key, value).await {
            Ok(()) => Ok(()),
            Err(AppError::QuotaExceeded {
                bytes_in_use,
                quota_bytes,
            }) if self.manager.quota_recovery() => {
                self.recover_from_quota(bytes_in_use, quota_bytes).await
            }
            Err(err) => Err(err),
        }
    }

    fn snapshot(&self) -> AppResult<Value> {
        let items = self.manager.all().to_vec();
        Ok(serde_json::to_value(items)?)
    }

    async fn recover_from_quota(&self, bytes_in_use: u64, quota_bytes: u64) -> AppResult<()> {
        let age_of = self.manager.age_key().ok_or_else(|| {
            AppError::Configuration(format!("List {} has no age key", self.manager.name()))
        })?;

        let mut ages: Vec<i64> = self.manager.all().iter().map(age_of).collect();
        ages.sort_unstable();

        let count = self
            .options
            .quota_recovery
            .items_to_delete(bytes_in_use, quota_bytes, ages.len());
        if count == 0 {
            return Err(AppError::QuotaExceeded {
                bytes_in_use,
                quota_bytes,
            });
        }

        let threshold = ages[count - 1];
        let purged = self.manager.purge(threshold)?;
        tracing::warn!(
            list = self.manager.name(),
            bytes_in_use,
            quota_bytes,
            purged,
            "Storage quota exceeded, dropped oldest items"
        );

        // One retry; a further failure waits for the next change.
        let value = self.snapshot()?;
        self.storage.set(self.key, value).await
    }

    fn reconcile(&self, incoming: Option<Value>) {
        let items = decode_items::<T>(self.key, incoming);
        let keys: HashSet<T::Key> = items.iter().map(|i| i.primary_key().clone()).collect();

        for stale in self
            .manager
            .all()
            .keys()
            .into_iter()
            .filter(|key| !keys.contains(key))
        {
            self.manager.remove(&stale);
        }

        for item in items {
            if self.manager.one(item.primary_key()).as_ref() != Some(&item) {
                self.manager.put(item, &[]);
            }
        }
    }
}

#[async_trait]
impl<T> Flush for PersistenceObserver<T>
where
    T: Indexable + Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    fn storage_key(&self) -> &'static str {
        self.key
    }

    async fn flush(&self) -> AppResult<()> {
        self.save().await
    }
}

impl<T> Drop for PersistenceObserver<T>
where
    T: Indexable + Serialize + DeserializeOwned + std::fmt::Debug,
{
    fn drop(&mut self) {
        self.manager.unsubscribe(self.subscription);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Decode a stored snapshot, skipping entries that no longer parse.
fn decode_items<T: DeserializeOwned>(key: &str, stored: Option<Value>) -> Vec<T> {
    match stored {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    tracing::warn!(key, "Skipping unreadable stored item: {}", err);
                    None
                }
            })
            .collect(),
        Some(other) => {
            tracing::warn!(key, "Stored value is not a list: {}", other);
            Vec::new()
        }
    }
}

async fn debounce_loop<T>(
    observer: Weak<PersistenceObserver<T>>,
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) where
    T: Indexable + Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    while rx.recv().await.is_some() {
        // Every further event restarts the wait.
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) | Err(_) => break,
            }
        }

        let Some(observer) = observer.upgrade() else {
            return;
        };
        if let Err(err) = observer.save().await {
            tracing::error!(key = observer.key, "Failed to persist list: {}", err);
        } else {
            tracing::debug!(key = observer.key, "List persisted");
        }
    }
}

async fn follow_loop<T>(
    observer: Weak<PersistenceObserver<T>>,
    mut rx: broadcast::Receiver<crate::storage::StorageChange>,
) where
    T: Indexable + Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    loop {
        match rx.recv().await {
            Ok(change) => {
                let Some(observer) = observer.upgrade() else {
                    return;
                };
                if change.key != observer.key
                    || change.origin == observer.storage.context_id()
                {
                    continue;
                }
                tracing::debug!(key = observer.key, origin = %change.origin, "Applying external change");
                observer.reconcile(change.new_value);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                let Some(observer) = observer.upgrade() else {
                    return;
                };
                tracing::warn!(key = observer.key, missed, "Missed storage changes, re-reading");
                match observer.storage.get(observer.key).await {
                    Ok(value) => observer.reconcile(value),
                    Err(err) => tracing::error!(key = observer.key, "Re-read failed: {}", err),
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
