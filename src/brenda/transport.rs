//! Delivery of announcements and status messages.

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::AppResult;

/// Form body of one announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnounceForm {
    pub version: u32,
    pub token: String,
    pub domain: String,
    pub tab: String,
    pub asin: String,
    pub etv: String,
}

/// Sends announcements to the Brenda endpoint.
#[async_trait]
pub trait AnnounceTransport: Send + Sync {
    /// Send one announcement and return the HTTP status.
    ///
    /// An `Err` means no response was received.
    async fn send(&self, form: &AnnounceForm) -> AppResult<u16>;
}

/// Form-encoded `PUT` over HTTP.
pub struct HttpAnnounceTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpAnnounceTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AnnounceTransport for HttpAnnounceTransport {
    async fn send(&self, form: &AnnounceForm) -> AppResult<u16> {
        tracing::debug!(url = %self.url, asin = %form.asin, "Sending announcement");
        let response = self.client.put(&self.url).form(form).send().await?;
        let status = response.status().as_u16();
        tracing::debug!(status, "Announcement response");
        Ok(status)
    }
}

/// Shows short status messages to the user.
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, message: &str);
}

/// Notifier that writes messages to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, title: &str, message: &str) {
        tracing::info!(title, "{}", message);
    }
}
