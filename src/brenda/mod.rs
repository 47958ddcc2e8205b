//! Rate-limited announcement queue.
//!
//! Announcements are sent one at a time, oldest first, at most once per
//! rate-limit window. Every 429 response widens the window by one base
//! interval and every successful send narrows it again by one step.

mod transport;

pub use transport::*;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Queued announcements beyond this are refused.
pub const MAX_QUEUE_LENGTH: usize = 5;

/// Base rate-limit window.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(10);

/// Title of every status message.
pub const TOAST_TITLE: &str = "Brenda Announcement";

pub const QUEUE_FULL_MESSAGE: &str =
    "The queue is full, not everything should be shared. Please be selective.";

/// Status message for a send outcome. `None` means no response arrived.
pub fn status_message(status: Option<u16>) -> &'static str {
    match status {
        Some(200) => "{asin} has been successfully announced to Brenda.",
        Some(401) => "API Token invalid, please go in the extension settings to correct it.",
        Some(422) => "Unprocessable entity. The request was malformed and rejected.",
        Some(429) => "Hit rate limit, backing off, will retry.",
        _ => "The announce has failed for an unknown reason.",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrendaQueueItem {
    pub asin: String,
    pub etv: String,
    pub queue: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrendaState {
    Idle,
    Scheduled,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Queued,
    QueueFull,
}

/// Identity and pacing of a queue.
#[derive(Debug, Clone)]
pub struct BrendaOptions {
    /// Announcement token
    pub guid: String,
    pub domain: String,
    pub base_interval: Duration,
}

struct QueueState {
    queue: VecDeque<BrendaQueueItem>,
    timer: Option<JoinHandle<()>>,
    processing: bool,
    last_process: Option<Instant>,
    violations: u32,
    interval: Duration,
}

pub struct Brenda {
    options: BrendaOptions,
    transport: Arc<dyn AnnounceTransport>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<QueueState>,
}

impl Brenda {
    pub fn new(
        options: BrendaOptions,
        transport: Arc<dyn AnnounceTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let interval = options.base_interval;
        Arc::new(Self {
            options,
            transport,
            notifier,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                timer: None,
                processing: false,
                last_process: None,
                violations: 0,
                interval,
            }),
        })
    }

    /// Queue an announcement.
    ///
    /// A full queue is reported to the user and is not an error.
    pub fn announce(
        self: &Arc<Self>,
        asin: impl Into<String>,
        etv: impl Into<String>,
        queue: impl Into<String>,
    ) -> AnnounceOutcome {
        let item = BrendaQueueItem {
            asin: asin.into(),
            etv: etv.into(),
            queue: queue.into(),
        };
        tracing::debug!(asin = %item.asin, etv = %item.etv, queue = %item.queue, "Announce");

        let mut state = self.state.lock();
        if state.queue.len() >= MAX_QUEUE_LENGTH {
            drop(state);
            tracing::error!("Brenda queue is full");
            self.notifier.show(TOAST_TITLE, QUEUE_FULL_MESSAGE);
            return AnnounceOutcome::QueueFull;
        }
        state.queue.push_back(item);

        if state.timer.is_some() || state.processing {
            tracing::debug!("Queue is already being processed");
            return AnnounceOutcome::Queued;
        }

        // Wait out whatever is left of the current window.
        let delay = state
            .last_process
            .map(|last| (last + state.interval).saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);
        tracing::debug!(?delay, "Scheduling queue processing");
        state.timer = Some(self.schedule(delay));
        AnnounceOutcome::Queued
    }

    fn schedule(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let this: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(brenda) = this.upgrade() {
                brenda.process().await;
            }
        })
    }

    /// Send the oldest queued announcement and schedule the next pass.
    ///
    /// Only the queue's own timer calls this. A pass that finds a send
    /// already in flight does nothing.
    async fn process(self: &Arc<Self>) {
        let item = {
            let mut state = self.state.lock();
            if state.processing {
                tracing::debug!("Announcement already in flight");
                return;
            }
            match state.queue.pop_front() {
                Some(item) => {
                    state.processing = true;
                    item
                }
                None => {
                    tracing::debug!("Queue is empty");
                    state.timer = None;
                    return;
                }
            }
        };

        let form = AnnounceForm {
            version: 1,
            token: self.options.guid.clone(),
            domain: self.options.domain.clone(),
            tab: item.queue.clone(),
            asin: item.asin.clone(),
            etv: item.etv.clone(),
        };
        let result = self.transport.send(&form).await;

        let message = {
            let mut state = self.state.lock();
            let status = match result {
                Ok(429) => {
                    state.queue.push_front(item.clone());
                    state.violations += 1;
                    tracing::debug!(violations = state.violations, "Rate limited");
                    Some(429)
                }
                Ok(status) => {
                    if (200..300).contains(&status) {
                        state.violations = state.violations.saturating_sub(1);
                        tracing::debug!(violations = state.violations, "Announced");
                    } else {
                        tracing::warn!(status, asin = %item.asin, "Announcement rejected");
                    }
                    Some(status)
                }
                Err(err) => {
                    tracing::error!(asin = %item.asin, "Announcement failed: {}", err);
                    state.queue.push_front(item.clone());
                    None
                }
            };

            let interval = self.options.base_interval * (state.violations + 1);
            state.interval = interval;
            state.last_process = Some(Instant::now());
            state.processing = false;
            state.timer = Some(self.schedule(interval));

            status_message(status).replace("{asin}", &item.asin)
        };

        self.notifier.show(TOAST_TITLE, &message);
    }

    pub fn state(&self) -> BrendaState {
        let state = self.state.lock();
        if state.processing {
            BrendaState::Processing
        } else if state.timer.is_some() {
            BrendaState::Scheduled
        } else {
            BrendaState::Idle
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn queued(&self) -> Vec<BrendaQueueItem> {
        self.state.lock().queue.iter().cloned().collect()
    }

    /// Current wait between two sends.
    pub fn rate_limit_interval(&self) -> Duration {
        self.state.lock().interval
    }

    pub fn violation_count(&self) -> u32 {
        self.state.lock().violations
    }
}

impl Drop for Brenda {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}
