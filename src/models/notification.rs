//! Notification model.

use serde::{Deserialize, Serialize};

use crate::collection::Indexable;

/// A native notification raised for a product and not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    /// Notification identifier assigned by the host
    pub id: String,
    pub asin: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl NotificationItem {
    pub fn new(id: impl Into<String>, asin: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            asin: asin.into(),
            timestamp,
        }
    }
}

impl Indexable for NotificationItem {
    type Key = String;

    fn primary_key(&self) -> &String {
        &self.id
    }
}
