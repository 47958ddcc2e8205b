//! Per-name settings registry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{
    GlobalSettings, GlobalSettingsData, Settings, SettingsName, SettingsSchema, SidePanelSettings,
    SidePanelSettingsData,
};
use crate::errors::{AppError, AppResult};
use crate::storage::Storage;

type Instance = Arc<dyn Any + Send + Sync>;

/// A settings store resolved from its logical name.
#[derive(Clone)]
pub enum AnySettings {
    Global(Arc<GlobalSettings>),
    SidePanel(Arc<SidePanelSettings>),
}

/// Hands out one loaded settings store per name.
pub struct SettingsFactory {
    storage: Arc<dyn Storage>,
    instances: Mutex<HashMap<SettingsName, Arc<OnceCell<Instance>>>>,
}

impl SettingsFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Get or load the store for `S`. Concurrent callers share one load.
    pub async fn create<S: SettingsSchema>(&self) -> AppResult<Arc<Settings<S>>> {
        let cell = {
            let mut instances = self.instances.lock();
            Arc::clone(
                instances
                    .entry(S::NAME)
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let instance = cell
            .get_or_try_init(|| async {
                let settings: Instance = Settings::<S>::load(Arc::clone(&self.storage)).await?;
                Ok::<_, AppError>(settings)
            })
            .await?;

        Arc::clone(instance)
            .downcast::<Settings<S>>()
            .map_err(|_| AppError::Internal(format!("Settings {} have an unexpected type", S::NAME)))
    }

    /// Get or load a store by its logical name.
    pub async fn create_by_name(&self, name: &str) -> AppResult<AnySettings> {
        Ok(match name.parse::<SettingsName>()? {
            SettingsName::Global => AnySettings::Global(self.create::<GlobalSettingsData>().await?),
            SettingsName::SidePanel => {
                AnySettings::SidePanel(self.create::<SidePanelSettingsData>().await?)
            }
        })
    }
}
