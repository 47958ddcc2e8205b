//! Hidden product model.

use serde::{Deserialize, Serialize};

use crate::collection::Indexable;

/// A product the user chose to hide. Its presence suppresses the product
/// from every rendered view, whether or not it is still in the live list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HiddenProduct {
    pub asin: String,
    /// Hide time, epoch millis
    pub timestamp: i64,
}

impl HiddenProduct {
    pub fn new(asin: impl Into<String>, timestamp: i64) -> Self {
        Self {
            asin: asin.into(),
            timestamp,
        }
    }
}

impl Indexable for HiddenProduct {
    type Key = String;

    fn primary_key(&self) -> &String {
        &self.asin
    }
}
