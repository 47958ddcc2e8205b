//! The concrete lists and their configuration.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ListConfig, ListManager};
use crate::collection::{Indexable, SortPolicy};
use crate::errors::AppError;
use crate::models::{HiddenProduct, NotificationItem, Product};

/// Logical list names accepted by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListName {
    Products,
    PinnedProducts,
    HiddenProducts,
    Notifications,
}

impl ListName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListName::Products => "products",
            ListName::PinnedProducts => "pinnedProducts",
            ListName::HiddenProducts => "hiddenProducts",
            ListName::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ListName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "products" => Ok(ListName::Products),
            "pinnedProducts" => Ok(ListName::PinnedProducts),
            "hiddenProducts" => Ok(ListName::HiddenProducts),
            "notifications" => Ok(ListName::Notifications),
            other => Err(AppError::Configuration(format!(
                "List manager {} not found",
                other
            ))),
        }
    }
}

/// A list the factory knows how to build.
pub trait ListKind: Send + Sync + 'static {
    type Item: Indexable + Serialize + DeserializeOwned + PartialEq + fmt::Debug;

    const NAME: ListName;

    fn config() -> ListConfig<Self::Item>;
}

/// Live product feed. Pinned products first, then newest first.
/// Not persisted; it is rebuilt from the feed on every start.
pub struct ProductList;

/// Products the user pinned, oldest pin first.
pub struct PinnedProductList;

/// Products the user hid, oldest hide first.
pub struct HiddenProductList;

/// Notifications awaiting a click or dismissal.
pub struct NotificationList;

fn compare_products(a: &Product, b: &Product) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
}

impl ListKind for ProductList {
    type Item = Product;
    const NAME: ListName = ListName::Products;

    fn config() -> ListConfig<Product> {
        ListConfig {
            name: ListName::Products.as_str(),
            sort: Some(SortPolicy::Comparator(compare_products)),
            age_key: Some(|p: &Product| p.timestamp),
            storage_key: None,
            quota_recovery: false,
        }
    }
}

impl ListKind for PinnedProductList {
    type Item = Product;
    const NAME: ListName = ListName::PinnedProducts;

    fn config() -> ListConfig<Product> {
        ListConfig {
            name: ListName::PinnedProducts.as_str(),
            sort: Some(SortPolicy::Key(|p: &Product| p.timestamp)),
            age_key: None,
            storage_key: Some("pinnedProducts"),
            quota_recovery: false,
        }
    }
}

impl ListKind for HiddenProductList {
    type Item = HiddenProduct;
    const NAME: ListName = ListName::HiddenProducts;

    fn config() -> ListConfig<HiddenProduct> {
        ListConfig {
            name: ListName::HiddenProducts.as_str(),
            sort: Some(SortPolicy::Key(|h: &HiddenProduct| h.timestamp)),
            age_key: None,
            storage_key: Some("hiddenProducts"),
            quota_recovery: true,
        }
    }
}

impl ListKind for NotificationList {
    type Item = NotificationItem;
    const NAME: ListName = ListName::Notifications;

    fn config() -> ListConfig<NotificationItem> {
        ListConfig {
            name: ListName::Notifications.as_str(),
            sort: Some(SortPolicy::Key(|n: &NotificationItem| n.timestamp)),
            age_key: None,
            storage_key: Some("notifications"),
            quota_recovery: false,
        }
    }
}

pub type ProductListManager = ListManager<Product>;
pub type HiddenProductListManager = ListManager<HiddenProduct>;
pub type NotificationListManager = ListManager<NotificationItem>;
