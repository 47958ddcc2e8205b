//! Single-object settings stores.
//!
//! A settings store loads its object once, merged over the schema defaults,
//! and keeps a frozen snapshot of it. Writes go to durable storage only; the
//! snapshot is refreshed when storage reports the key changed, for this
//! context's writes and every other context's alike.

mod factory;
mod schema;

pub use factory::*;
pub use schema::*;

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::errors::{AppError, AppResult};
use crate::events::{Event, EventHub, SubscriptionId};
use crate::storage::{Storage, StorageChange};
use crate::util::{
    deep_freeze, deep_merge, obj_property_get_deep, obj_property_set_deep, overlay, Frozen,
};

pub type GlobalSettings = Settings<GlobalSettingsData>;
pub type SidePanelSettings = Settings<SidePanelSettingsData>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsEventKind {
    Change,
}

/// Emitted whenever the snapshot is replaced.
#[derive(Debug, Clone)]
pub enum SettingsEvent<S> {
    Change(Frozen<S>),
}

impl<S> Event for SettingsEvent<S> {
    type Kind = SettingsEventKind;

    fn kind(&self) -> SettingsEventKind {
        SettingsEventKind::Change
    }
}

#[derive(Clone)]
struct Snapshot<S> {
    typed: Frozen<S>,
    value: Frozen<Value>,
}

pub struct Settings<S: SettingsSchema> {
    storage: Arc<dyn Storage>,
    snapshot: RwLock<Snapshot<S>>,
    events: EventHub<SettingsEvent<S>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SettingsSchema> Settings<S> {
    /// Load the settings object and start following storage changes.
    ///
    /// The returned store is ready; there is no partially loaded state.
    pub async fn load(storage: Arc<dyn Storage>) -> AppResult<Arc<Self>> {
        let name = S::NAME.as_str();
        tracing::info!(settings = name, "Initializing settings");

        // Subscribe before reading so no change can slip between the two.
        let changes = storage.subscribe();
        let stored = storage.get(name).await?;
        let snapshot = Self::materialize(stored)?;
        tracing::info!(settings = name, "Settings loaded");

        let settings = Arc::new(Self {
            storage,
            snapshot: RwLock::new(snapshot),
            events: EventHub::new(),
            listener: Mutex::new(None),
        });

        let task = tokio::spawn(listen(Arc::downgrade(&settings), changes));
        *settings.listener.lock() = Some(task);

        Ok(settings)
    }

    /// Merge a stored value over the defaults and freeze the result.
    fn materialize(stored: Option<Value>) -> AppResult<Snapshot<S>> {
        let defaults = serde_json::to_value(S::default())?;
        let merged = match stored {
            Some(value) if !value.is_null() => deep_merge(&defaults, &value),
            _ => defaults,
        };
        let typed: S = serde_json::from_value(merged.clone()).map_err(|err| {
            AppError::Validation(format!("Stored {} do not match the schema: {}", S::NAME, err))
        })?;

        Ok(Snapshot {
            typed: deep_freeze(typed),
            value: deep_freeze(merged),
        })
    }

    fn apply(&self, stored: Option<Value>) {
        match Self::materialize(stored) {
            Ok(snapshot) => {
                let typed = snapshot.typed.clone();
                *self.snapshot.write() = snapshot;
                self.events.emit(&SettingsEvent::Change(typed));
            }
            Err(err) => {
                tracing::error!(settings = %S::NAME, "Ignoring settings change: {}", err);
            }
        }
    }

    pub fn name(&self) -> SettingsName {
        S::NAME
    }

    /// The current snapshot. Immutable; use [`Settings::clone_settings`] to
    /// get a copy to edit.
    pub fn get(&self) -> Frozen<S> {
        self.snapshot.read().typed.clone()
    }

    /// The current snapshot as a JSON value.
    pub fn get_value(&self) -> Frozen<Value> {
        self.snapshot.read().value.clone()
    }

    /// A deep, mutable copy of the current snapshot.
    pub fn clone_settings(&self) -> S {
        self.snapshot.read().typed.thaw()
    }

    /// Persist a full replacement object.
    ///
    /// Every schema field is replaced; stored keys the schema does not know
    /// are carried over, as with [`Settings::set_properties`]. The snapshot
    /// is not touched here; it changes when storage reports the write back.
    pub async fn set(&self, settings: &S) -> AppResult<()> {
        tracing::info!(settings = %S::NAME, "Updating settings");
        let value = overlay(&self.get_value(), &serde_json::to_value(settings)?);
        self.storage.set(S::NAME.as_str(), value).await
    }

    async fn set_value(&self, value: Value) -> AppResult<()> {
        serde_json::from_value::<S>(value.clone()).map_err(|err| {
            AppError::Validation(format!("Invalid {} update: {}", S::NAME, err))
        })?;
        tracing::info!(settings = %S::NAME, "Updating settings");
        self.storage.set(S::NAME.as_str(), value).await
    }

    /// Read a property by dot path, `None` if any segment is missing.
    pub fn get_property(&self, key: &str) -> AppResult<Option<Value>> {
        let value = self.get_value();
        Ok(obj_property_get_deep(&value, key)?.cloned())
    }

    /// Read a property by dot path, falling back to `default`.
    pub fn get_property_or(&self, key: &str, default: Value) -> AppResult<Value> {
        Ok(self.get_property(key)?.unwrap_or(default))
    }

    /// Read several properties against the same snapshot.
    pub fn get_properties(&self, keys: &[&str]) -> AppResult<Vec<Option<Value>>> {
        let value = self.get_value();
        keys.iter()
            .map(|key| Ok(obj_property_get_deep(&value, key)?.cloned()))
            .collect()
    }

    /// Write one property by dot path, persisting the whole object.
    pub async fn set_property<V: Serialize>(&self, key: &str, value: V) -> AppResult<()> {
        self.set_properties(vec![(key, serde_json::to_value(value)?)])
            .await
    }

    /// Write several properties in one persisted update.
    pub async fn set_properties(&self, updates: Vec<(&str, Value)>) -> AppResult<()> {
        let mut draft = self.get_value().thaw();
        for (key, value) in updates {
            obj_property_set_deep(&mut draft, key, value, false)?;
        }
        self.set_value(draft).await
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Frozen<S>) + Send + Sync + 'static,
    {
        self.events
            .subscribe(SettingsEventKind::Change, move |event| match event {
                SettingsEvent::Change(settings) => handler(settings),
            })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

impl<S: SettingsSchema> Drop for Settings<S> {
    fn drop(&mut self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

async fn listen<S: SettingsSchema>(
    settings: Weak<Settings<S>>,
    mut changes: broadcast::Receiver<StorageChange>,
) {
    let name = S::NAME.as_str();
    loop {
        match changes.recv().await {
            Ok(change) if change.key == name => {
                let Some(settings) = settings.upgrade() else {
                    return;
                };
                tracing::info!(settings = name, origin = %change.origin, "Settings changed");
                settings.apply(change.new_value);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                let Some(settings) = settings.upgrade() else {
                    return;
                };
                tracing::warn!(settings = name, missed, "Missed storage changes, re-reading");
                match settings.storage.get(name).await {
                    Ok(stored) => settings.apply(stored),
                    Err(err) => tracing::error!(settings = name, "Re-read failed: {}", err),
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
