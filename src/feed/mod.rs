//! Product feed coordinator.
//!
//! Ties the live product list to the pinned, hidden and notification lists:
//! pinning mirrors into the live list, expiry never drops a pinned product,
//! and hidden products are filtered out of every view.

use std::sync::{Arc, Weak};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::brenda::{AnnounceOutcome, Brenda};
use crate::errors::{AppError, AppResult};
use crate::events::SubscriptionId;
use crate::list_manager::{ListEvent, ListEventKind, ListManager};
use crate::models::{derive_search, HiddenProduct, NotificationItem, Product};
use crate::settings::SidePanelTab;
use crate::util::now_millis;

/// One inbound feed message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedMessage {
    NewProducts { products: Vec<Product> },
    Etv { asin: String, etv: f64 },
    Pin { asin: String },
    Unpin { asin: String },
    Hide { asin: String },
    Unhide { asin: String },
    Announce { asin: String },
    Notification { id: String, asin: String },
    NotificationClosed { id: String },
}

pub struct ProductFeed {
    products: Arc<ListManager<Product>>,
    pinned: Arc<ListManager<Product>>,
    hidden: Arc<ListManager<HiddenProduct>>,
    notifications: Arc<ListManager<NotificationItem>>,
    brenda: Option<Arc<Brenda>>,
    product_subscriptions: Vec<SubscriptionId>,
    pinned_subscriptions: Vec<SubscriptionId>,
}

impl ProductFeed {
    pub fn new(
        products: Arc<ListManager<Product>>,
        pinned: Arc<ListManager<Product>>,
        hidden: Arc<ListManager<HiddenProduct>>,
        notifications: Arc<ListManager<NotificationItem>>,
    ) -> Self {
        // Pins restored from storage belong in the live list too.
        for item in pinned.all().iter() {
            products.put(pinned_copy(item, true), &[]);
        }

        let product_subscriptions = vec![{
            let pinned = Arc::downgrade(&pinned);
            let products_ref = Arc::downgrade(&products);
            products.subscribe(ListEventKind::RemovedMultiple, move |event| {
                if let ListEvent::RemovedMultiple(asins) = event {
                    restore_pinned(&products_ref, &pinned, asins);
                }
            })
        }];

        let pinned_subscriptions = vec![
            {
                let products = Arc::downgrade(&products);
                pinned.subscribe(ListEventKind::Created, move |event| {
                    if let (ListEvent::Created(item), Some(products)) = (event, products.upgrade()) {
                        products.put(pinned_copy(item, true), &["pinned"]);
                    }
                })
            },
            {
                let products = Arc::downgrade(&products);
                pinned.subscribe(ListEventKind::Updated, move |event| {
                    if let (ListEvent::Updated { item, .. }, Some(products)) =
                        (event, products.upgrade())
                    {
                        let copy = pinned_copy(item, true);
                        if products.one(&copy.asin).as_ref() != Some(&copy) {
                            products.put(copy, &["pinned"]);
                        }
                    }
                })
            },
            {
                let products = Arc::downgrade(&products);
                pinned.subscribe(ListEventKind::Removed, move |event| {
                    if let ListEvent::Removed(asin) = event {
                        clear_pinned_flag(&products, std::slice::from_ref(asin));
                    }
                })
            },
            {
                let products = Arc::downgrade(&products);
                pinned.subscribe(ListEventKind::RemovedMultiple, move |event| {
                    if let ListEvent::RemovedMultiple(asins) = event {
                        clear_pinned_flag(&products, asins);
                    }
                })
            },
            {
                let products = Arc::downgrade(&products);
                pinned.subscribe(ListEventKind::Cleared, move |_| {
                    if let Some(list) = products.upgrade() {
                        let asins: Vec<String> = list
                            .all()
                            .iter()
                            .filter(|p| p.pinned)
                            .map(|p| p.asin.clone())
                            .collect();
                        clear_pinned_flag(&products, &asins);
                    }
                })
            },
        ];

        Self {
            products,
            pinned,
            hidden,
            notifications,
            brenda: None,
            product_subscriptions,
            pinned_subscriptions,
        }
    }

    pub fn with_brenda(mut self, brenda: Option<Arc<Brenda>>) -> Self {
        self.brenda = brenda;
        self
    }

    pub fn products(&self) -> &Arc<ListManager<Product>> {
        &self.products
    }

    pub fn pinned(&self) -> &Arc<ListManager<Product>> {
        &self.pinned
    }

    pub fn hidden(&self) -> &Arc<ListManager<HiddenProduct>> {
        &self.hidden
    }

    pub fn notifications(&self) -> &Arc<ListManager<NotificationItem>> {
        &self.notifications
    }

    /// Apply one inbound message.
    pub fn handle(&self, message: FeedMessage) -> AppResult<()> {
        match message {
            FeedMessage::NewProducts { products } => {
                let count = self.ingest(products);
                tracing::info!(count, "New products received");
            }
            FeedMessage::Etv { asin, etv } => {
                self.apply_etv(&asin, etv);
            }
            FeedMessage::Pin { asin } => {
                self.pin(&asin);
            }
            FeedMessage::Unpin { asin } => {
                self.unpin(&asin);
            }
            FeedMessage::Hide { asin } => self.hide(&asin),
            FeedMessage::Unhide { asin } => {
                self.unhide(&asin);
            }
            FeedMessage::Announce { asin } => {
                if self.brenda.is_none() {
                    return Err(AppError::Configuration(
                        "Announcing requires a Brenda token".to_string(),
                    ));
                }
                self.announce(&asin);
            }
            FeedMessage::Notification { id, asin } => self.record_notification(&id, &asin),
            FeedMessage::NotificationClosed { id } => {
                self.resolve_notification(&id);
            }
        }
        Ok(())
    }

    /// Put incoming records into the live list. Returns how many were new.
    ///
    /// A product already in the list keeps its first-seen timestamp, its
    /// local flags and the ETV range seen so far.
    pub fn ingest(&self, records: Vec<Product>) -> usize {
        let mut created = 0;
        for mut record in records {
            if record.search.is_empty() {
                record.search = derive_search(&record.title);
            }

            match self.products.one(&record.asin) {
                Some(existing) => {
                    let mut merged = Product {
                        timestamp: existing.timestamp,
                        pinned: existing.pinned,
                        announced: existing.announced,
                        notified: existing.notified,
                        etv_min: existing.etv_min,
                        etv_max: existing.etv_max,
                        ..record.clone()
                    };
                    for etv in [record.etv_min, record.etv_max].into_iter().flatten() {
                        merged.record_etv(etv);
                    }
                    self.update_product(merged, &[]);
                }
                None => {
                    record.pinned = self.pinned.has(&record.asin);
                    self.products.put(record, &[]);
                    created += 1;
                }
            }
        }
        created
    }

    /// Widen a product's ETV range. False if the product is unknown.
    pub fn apply_etv(&self, asin: &str, etv: f64) -> bool {
        let Some(mut product) = self.products.one(&asin.to_string()) else {
            tracing::warn!(asin, "ETV for unknown product");
            return false;
        };
        product.record_etv(etv);
        self.update_product(product, &["etvMin", "etvMax"]);
        true
    }

    pub fn pin(&self, asin: &str) -> bool {
        let Some(mut product) = self.products.one(&asin.to_string()) else {
            tracing::warn!(asin, "Cannot pin unknown product");
            return false;
        };
        product.pinned = true;
        self.pinned.put(product, &["pinned"]);
        true
    }

    pub fn unpin(&self, asin: &str) -> bool {
        self.pinned.remove(&asin.to_string())
    }

    pub fn hide(&self, asin: &str) {
        self.hidden.put(HiddenProduct::new(asin, now_millis()), &[]);
    }

    pub fn unhide(&self, asin: &str) -> bool {
        self.hidden.remove(&asin.to_string())
    }

    pub fn is_hidden(&self, asin: &str) -> bool {
        self.hidden.has(&asin.to_string())
    }

    /// Live products that are not hidden, in list order.
    pub fn visible(&self) -> Vec<Product> {
        self.products
            .all()
            .iter()
            .filter(|p| !self.hidden.has(&p.asin))
            .cloned()
            .collect()
    }

    /// Visible products whose title contains `text`, ignoring case.
    pub fn search(&self, text: &str) -> Vec<Product> {
        let needle = text.to_lowercase();
        self.visible()
            .into_iter()
            .filter(|p| p.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Visible, unexpired products matching a user-defined tab.
    pub fn tab_products(&self, tab: &SidePanelTab, expire: Duration) -> AppResult<Vec<Product>> {
        let pattern = match (&tab.search, tab.is_regex) {
            (Some(search), true) if !search.is_empty() => Some(Regex::new(search).map_err(|err| {
                AppError::Validation(format!("Invalid regex for tab {}: {}", tab.name, err))
            })?),
            _ => None,
        };
        let expire_ms = i64::try_from(expire.as_millis()).unwrap_or(i64::MAX);
        let expiration = now_millis().saturating_sub(expire_ms);

        Ok(self
            .visible()
            .into_iter()
            .filter(|product| {
                if product.timestamp < expiration {
                    return false;
                }
                if tab.is_zero_etv && product.etv_min != Some(0.0) {
                    return false;
                }
                let title = product.title.to_lowercase();
                match (&pattern, &tab.search) {
                    (Some(regex), _) => regex.is_match(&title),
                    (None, Some(search)) => title.contains(search.as_str()),
                    (None, None) => true,
                }
            })
            .collect())
    }

    pub fn record_notification(&self, id: &str, asin: &str) {
        self.notifications
            .put(NotificationItem::new(id, asin, now_millis()), &[]);
        if let Some(mut product) = self.products.one(&asin.to_string()) {
            product.notified = true;
            self.update_product(product, &["notified"]);
        }
    }

    /// Drop a notification once it was clicked or closed.
    pub fn resolve_notification(&self, id: &str) -> Option<NotificationItem> {
        let key = id.to_string();
        let notification = self.notifications.one(&key)?;
        self.notifications.remove(&key);
        Some(notification)
    }

    /// Queue a product for announcement.
    ///
    /// Returns `None` when announcing is disabled, the product is unknown,
    /// its ETV is not known yet, or it was already announced.
    pub fn announce(&self, asin: &str) -> Option<AnnounceOutcome> {
        let brenda = self.brenda.as_ref()?;
        let mut product = self.products.one(&asin.to_string())?;
        if product.announced {
            tracing::debug!(asin, "Already announced");
            return None;
        }
        let etv = product.etv_min?;

        let outcome = brenda.announce(asin, etv.to_string(), product.queue.as_str());
        if outcome == AnnounceOutcome::Queued {
            product.announced = true;
            self.update_product(product, &["announced"]);
        }
        Some(outcome)
    }

    /// Write a changed live product. A pinned product's stored copy is
    /// updated too, so expiry restores it as it is now.
    fn update_product(&self, product: Product, changes: &[&'static str]) {
        let stored = (product.pinned && self.pinned.has(&product.asin)).then(|| product.clone());
        self.products.put(product, changes);
        if let Some(copy) = stored {
            self.pinned.put(copy, changes);
        }
    }
}

impl Drop for ProductFeed {
    fn drop(&mut self) {
        for id in self.product_subscriptions.drain(..) {
            self.products.unsubscribe(id);
        }
        for id in self.pinned_subscriptions.drain(..) {
            self.pinned.unsubscribe(id);
        }
    }
}

fn pinned_copy(item: &Product, pinned: bool) -> Product {
    Product {
        pinned,
        ..item.clone()
    }
}

fn restore_pinned(
    products: &Weak<ListManager<Product>>,
    pinned: &Weak<ListManager<Product>>,
    asins: &[String],
) {
    let (Some(products), Some(pinned)) = (products.upgrade(), pinned.upgrade()) else {
        return;
    };
    for asin in asins {
        if let Some(item) = pinned.one(asin) {
            tracing::debug!(asin = %asin, "Keeping pinned product");
            products.put(pinned_copy(&item, true), &[]);
        }
    }
}

fn clear_pinned_flag(products: &Weak<ListManager<Product>>, asins: &[String]) {
    let Some(products) = products.upgrade() else {
        return;
    };
    for asin in asins {
        if let Some(product) = products.one(asin) {
            products.put(pinned_copy(&product, false), &["pinned"]);
        }
    }
}
