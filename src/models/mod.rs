//! Data models for the product feed.
//!
//! Field names serialize in camelCase so persisted snapshots stay readable
//! by every context sharing the storage area.

mod hidden;
mod notification;
mod product;

pub use hidden::*;
pub use notification::*;
pub use product::*;
