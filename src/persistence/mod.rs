//! Durable persistence of list managers.
//!
//! An observer hydrates a list from storage once, then writes the full list
//! back after every burst of mutations has gone quiet for the debounce
//! period. Writes that hit the storage quota can trim the list's oldest
//! entries and retry once.

mod observer;
mod quota;
mod retention;

pub use observer::*;
pub use quota::*;
pub use retention::*;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::AppResult;

/// Default quiet period before a snapshot is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Something holding unsaved state that can be written out on demand.
#[async_trait]
pub trait Flush: Send + Sync {
    /// Storage key the state is written under.
    fn storage_key(&self) -> &'static str;

    /// Write the current state now, bypassing any pending debounce.
    async fn flush(&self) -> AppResult<()>;
}
