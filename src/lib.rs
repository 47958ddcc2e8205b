//! Vine Helper core
//!
//! Typed list managers with debounced durable persistence, settings stores
//! that converge across contexts sharing one storage area, and the
//! rate-limited Brenda announcement queue.

pub mod brenda;
pub mod collection;
pub mod config;
pub mod errors;
pub mod events;
pub mod feed;
pub mod list_manager;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod storage;
pub mod util;

pub use config::Config;
pub use errors::{AppError, AppResult};

#[cfg(test)]
mod tests;
