//! Product model.

use serde::{Deserialize, Serialize};

use crate::collection::Indexable;

/// Queue a product was offered in.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProductQueue {
    /// Recommended for you
    RFY,
    /// Available for all
    AFA,
    /// Additional items
    AI,
}

impl ProductQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductQueue::RFY => "RFY",
            ProductQueue::AFA => "AFA",
            ProductQueue::AI => "AI",
        }
    }
}

/// A product observed in the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub asin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_asin: Option<String>,
    pub queue: ProductQueue,
    /// First seen, epoch millis
    pub timestamp: i64,
    #[serde(default)]
    pub img_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub search: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etv_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etv_max: Option<f64>,
    #[serde(default)]
    pub announced: bool,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub pinned: bool,
}

impl Product {
    pub fn new(asin: impl Into<String>, queue: ProductQueue, timestamp: i64) -> Self {
        Self {
            asin: asin.into(),
            parent_asin: None,
            queue,
            timestamp,
            img_url: String::new(),
            title: String::new(),
            search: String::new(),
            etv_min: None,
            etv_max: None,
            announced: false,
            notified: false,
            pinned: false,
        }
    }

    /// Set the title and the search token derived from it.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.search = derive_search(&self.title);
        self
    }

    /// Widen the known ETV range with a new observation.
    pub fn record_etv(&mut self, etv: f64) {
        self.etv_min = Some(self.etv_min.map_or(etv, |min| min.min(etv)));
        self.etv_max = Some(self.etv_max.map_or(etv, |max| max.max(etv)));
    }

    pub fn has_etv(&self) -> bool {
        self.etv_min.is_some()
    }
}

impl Indexable for Product {
    type Key = String;

    fn primary_key(&self) -> &String {
        &self.asin
    }
}

fn is_search_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || c == '\'' || c == ','
}

/// Short search token for a title: the longest run of up to 40 plain
/// characters that ends right before a whitespace. Titles without such a
/// run are used as-is.
pub fn derive_search(title: &str) -> String {
    let chars: Vec<char> = title.chars().collect();
    let plain = chars
        .iter()
        .take(40)
        .take_while(|c| is_search_char(**c))
        .count();

    (0..=plain)
        .rev()
        .find(|&cut| chars.get(cut).is_some_and(|c| c.is_whitespace()))
        .map(|cut| chars[..cut].iter().collect())
        .unwrap_or_else(|| title.to_string())
}
