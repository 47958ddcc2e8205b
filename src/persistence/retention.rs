//! Periodic retention sweeps.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::collection::Indexable;
use crate::errors::AppResult;
use crate::list_manager::ListManager;
use crate::util::now_millis;

/// Purge everything older than `retention` from `manager`.
pub fn sweep_once<T>(manager: &ListManager<T>, retention: Duration) -> AppResult<usize>
where
    T: Indexable + std::fmt::Debug,
{
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    manager.purge(now_millis().saturating_sub(retention_ms))
}

/// Run [`sweep_once`] every `interval` until the manager is dropped.
///
/// `retention` is re-read before each sweep so it can follow settings.
pub fn spawn_retention_sweep<T, F>(
    manager: &Arc<ListManager<T>>,
    retention: F,
    interval: Duration,
) -> JoinHandle<()>
where
    T: Indexable + std::fmt::Debug,
    F: Fn() -> Duration + Send + 'static,
{
    let manager: Weak<ListManager<T>> = Arc::downgrade(manager);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                tracing::debug!("List dropped, stopping retention sweep");
                return;
            };
            match sweep_once(&manager, retention()) {
                Ok(0) => {}
                Ok(purged) => tracing::info!(list = manager.name(), purged, "Retention sweep"),
                Err(err) => tracing::error!(list = manager.name(), "Retention sweep failed: {}", err),
            }
        }
    })
}
