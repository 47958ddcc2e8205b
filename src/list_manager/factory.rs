//! Per-name list manager registry.
//!
//! Each list exists at most once per factory. Concurrent requests for a
//! list that is still loading wait on the same initialization instead of
//! building a second instance.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{ListKind, ListManager, ListName};
use super::{HiddenProductList, NotificationList, PinnedProductList, ProductList};
use crate::errors::{AppError, AppResult};
use crate::models::{HiddenProduct, NotificationItem, Product};
use crate::persistence::{Flush, PersistenceObserver, PersistenceOptions};
use crate::storage::Storage;

type Instance = Arc<dyn Any + Send + Sync>;

/// A list manager resolved from its logical name.
#[derive(Clone)]
pub enum AnyListManager {
    Products(Arc<ListManager<Product>>),
    PinnedProducts(Arc<ListManager<Product>>),
    HiddenProducts(Arc<ListManager<HiddenProduct>>),
    Notifications(Arc<ListManager<NotificationItem>>),
}

impl AnyListManager {
    pub fn name(&self) -> ListName {
        match self {
            AnyListManager::Products(_) => ListName::Products,
            AnyListManager::PinnedProducts(_) => ListName::PinnedProducts,
            AnyListManager::HiddenProducts(_) => ListName::HiddenProducts,
            AnyListManager::Notifications(_) => ListName::Notifications,
        }
    }
}

pub struct ListManagerFactory {
    storage: Arc<dyn Storage>,
    options: PersistenceOptions,
    follow_external: bool,
    instances: Mutex<HashMap<ListName, Arc<OnceCell<Instance>>>>,
    persisted: Mutex<Vec<Arc<dyn Flush>>>,
}

impl ListManagerFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            options: PersistenceOptions::default(),
            follow_external: false,
            instances: Mutex::new(HashMap::new()),
            persisted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.options.debounce = debounce;
        self
    }

    pub fn with_options(mut self, options: PersistenceOptions) -> Self {
        self.options = options;
        self
    }

    /// Keep persisted lists in step with writes from other contexts.
    pub fn follow_external_changes(mut self, follow: bool) -> Self {
        self.follow_external = follow;
        self
    }

    /// Get or build the list described by `K`.
    ///
    /// Persisted lists are hydrated before this returns.
    pub async fn create<K: ListKind>(&self) -> AppResult<Arc<ListManager<K::Item>>> {
        let cell = {
            let mut instances = self.instances.lock();
            Arc::clone(
                instances
                    .entry(K::NAME)
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let instance = cell.get_or_try_init(|| self.build::<K>()).await?;
        Arc::clone(instance)
            .downcast::<ListManager<K::Item>>()
            .map_err(|_| AppError::Internal(format!("List {} has an unexpected type", K::NAME)))
    }

    /// Get or build a list by its logical name.
    pub async fn create_by_name(&self, name: &str) -> AppResult<AnyListManager> {
        Ok(match name.parse::<ListName>()? {
            ListName::Products => AnyListManager::Products(self.create::<ProductList>().await?),
            ListName::PinnedProducts => {
                AnyListManager::PinnedProducts(self.create::<PinnedProductList>().await?)
            }
            ListName::HiddenProducts => {
                AnyListManager::HiddenProducts(self.create::<HiddenProductList>().await?)
            }
            ListName::Notifications => {
                AnyListManager::Notifications(self.create::<NotificationList>().await?)
            }
        })
    }

    async fn build<K: ListKind>(&self) -> AppResult<Instance> {
        tracing::info!(list = %K::NAME, "Creating list manager");
        let manager = Arc::new(ListManager::new(K::config())?);

        if manager.storage_key().is_some() {
            let observer = PersistenceObserver::attach(
                Arc::clone(&manager),
                Arc::clone(&self.storage),
                self.options,
            )
            .await?;
            if self.follow_external {
                observer.follow_external_changes();
            }
            self.persisted.lock().push(observer);
        }

        Ok(manager)
    }

    /// Write every persisted list now.
    pub async fn flush_all(&self) -> AppResult<()> {
        let persisted: Vec<Arc<dyn Flush>> = self.persisted.lock().clone();
        for target in persisted {
            tracing::debug!(key = target.storage_key(), "Flushing list");
            target.flush().await?;
        }
        Ok(())
    }
}
