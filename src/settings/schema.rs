//! Settings schemas and their defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;

/// Storage keys of the settings objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsName {
    Global,
    SidePanel,
}

impl SettingsName {
    /// Key the object is stored under.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsName::Global => "settings",
            SettingsName::SidePanel => "vhSidePanel",
        }
    }
}

impl fmt::Display for SettingsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingsName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "settings" | "GlobalSettings" => Ok(SettingsName::Global),
            "vhSidePanel" | "SidePanelSettings" => Ok(SettingsName::SidePanel),
            other => Err(AppError::Configuration(format!(
                "Settings {} not found",
                other
            ))),
        }
    }
}

/// A settings object type with its storage key and defaults.
pub trait SettingsSchema:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    const NAME: SettingsName;
}

// ---------------------------------------------------------------------------
// Global settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnavailableTabSettings {
    pub active: bool,
    pub voting_toolbar: bool,
    pub consensus_threshold: i64,
    pub unavailable_opacity: i64,
    pub self_discard: bool,
    pub consensus_discard: bool,
    pub compact_toolbar: bool,
}

impl Default for UnavailableTabSettings {
    fn default() -> Self {
        Self {
            active: true,
            voting_toolbar: true,
            consensus_threshold: 2,
            unavailable_opacity: 100,
            self_discard: true,
            consensus_discard: true,
            compact_toolbar: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub uuid: Option<String>,
    pub top_pagination: bool,
    pub display_first_seen: bool,
    pub bookmark: bool,
    pub bookmark_date: i64,
    pub hide_keywords: Vec<String>,
    pub highlight_keywords: Vec<String>,
    pub display_variant_icon: bool,
    pub version_info_popup: i64,
    #[serde(rename = "GDPRPopup")]
    pub gdpr_popup: bool,
    pub first_vote_popup: bool,
    pub new_item_notification: bool,
    pub display_new_item_notifications: bool,
    pub new_item_notification_image: bool,
    pub hidden_items_cache_size: i64,
    pub new_item_notification_sound: bool,
    pub new_item_monitor_notification_sound: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            uuid: None,
            top_pagination: true,
            display_first_seen: true,
            bookmark: false,
            bookmark_date: 0,
            hide_keywords: Vec::new(),
            highlight_keywords: Vec::new(),
            display_variant_icon: false,
            version_info_popup: 0,
            gdpr_popup: true,
            first_vote_popup: true,
            new_item_notification: false,
            display_new_item_notifications: false,
            new_item_notification_image: true,
            hidden_items_cache_size: 9,
            new_item_notification_sound: false,
            new_item_monitor_notification_sound: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyBindingSettings {
    pub active: bool,
    pub next_page: String,
    pub previous_page: String,
    #[serde(rename = "RFYPage")]
    pub rfy_page: String,
    #[serde(rename = "AFAPage")]
    pub afa_page: String,
    #[serde(rename = "AIPage")]
    pub ai_page: String,
    pub hide_all: String,
    pub show_all: String,
    pub debug: String,
}

impl Default for KeyBindingSettings {
    fn default() -> Self {
        Self {
            active: true,
            next_page: "n".to_string(),
            previous_page: "p".to_string(),
            rfy_page: "r".to_string(),
            afa_page: "a".to_string(),
            ai_page: "i".to_string(),
            hide_all: "h".to_string(),
            show_all: "s".to_string(),
            debug: "d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HiddenTabSettings {
    pub active: bool,
    pub remote: bool,
}

impl Default for HiddenTabSettings {
    fn default() -> Self {
        Self {
            active: true,
            remote: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordSettings {
    pub active: bool,
    /// Announcement token; announcing is disabled without one
    pub guid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThorvariumSettings {
    pub darktheme: bool,
    pub mobileios: bool,
    pub mobileandroid: bool,
    pub small_items: bool,
    pub remove_header: bool,
    pub remove_footer: bool,
    pub remove_associate_header: bool,
    pub more_description_text: bool,
    #[serde(rename = "ETVModalOnTop")]
    pub etv_modal_on_top: bool,
    pub categories_with_emojis: bool,
    pub pagination_on_top: bool,
    pub collapsable_categories: bool,
    pub striped_categories: bool,
    pub limited_quantity_icon: bool,
    #[serde(rename = "RFYAFAAITabs")]
    pub rfy_afa_ai_tabs: bool,
}

/// The global settings object, stored under `settings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettingsData {
    pub unavailable_tab: UnavailableTabSettings,
    pub general: GeneralSettings,
    pub key_bindings: KeyBindingSettings,
    pub hidden_tab: HiddenTabSettings,
    pub discord: DiscordSettings,
    pub thorvarium: ThorvariumSettings,
}

impl SettingsSchema for GlobalSettingsData {
    const NAME: SettingsName = SettingsName::Global;
}

// ---------------------------------------------------------------------------
// Side panel settings
// ---------------------------------------------------------------------------

/// One configurable option rendered by the side panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingOption {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingGroup {
    pub title: String,
    pub is_configurable: bool,
    pub options: BTreeMap<String, SettingOption>,
}

/// A user-defined feed tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidePanelTab {
    pub name: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub is_zero_etv: bool,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub notify: bool,
}

/// The side panel settings object, stored under `vhSidePanel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidePanelSettingsData {
    pub feed: SettingGroup,
    pub interface: SettingGroup,
    #[serde(default)]
    pub tabs: BTreeMap<String, SidePanelTab>,
}

/// Feed expiry used when the stored value cannot be read.
pub const DEFAULT_EXPIRE_MINUTES: u64 = 30;

impl SidePanelSettingsData {
    /// Minutes a product stays in the feed.
    ///
    /// Form inputs store numbers as strings, so both are accepted.
    pub fn expire_minutes(&self) -> u64 {
        self.feed
            .options
            .get("expire")
            .and_then(|option| match &option.value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_EXPIRE_MINUTES)
    }
}

fn option(value: Value) -> Option<SettingOption> {
    serde_json::from_value(value).ok()
}

impl Default for SidePanelSettingsData {
    fn default() -> Self {
        let feed_options = [
            (
                "expire",
                json!({ "label": "Expire Items", "type": "number", "value": 30, "units": "min" }),
            ),
            (
                "perRow",
                json!({ "label": "Per Row", "type": "number", "value": 4, "units": "items" }),
            ),
        ];
        let interface_options = [(
            "theme",
            json!({ "label": "Theme", "type": "select", "value": "light", "options": ["light", "dark"] }),
        )];

        let collect = |entries: &[(&str, Value)]| -> BTreeMap<String, SettingOption> {
            entries
                .iter()
                .filter_map(|(name, value)| option(value.clone()).map(|o| (name.to_string(), o)))
                .collect()
        };

        Self {
            feed: SettingGroup {
                title: "Feed Configuration".to_string(),
                is_configurable: true,
                options: collect(&feed_options),
            },
            interface: SettingGroup {
                title: "Interface Configuration".to_string(),
                is_configurable: true,
                options: collect(&interface_options),
            },
            tabs: BTreeMap::new(),
        }
    }
}

impl SettingsSchema for SidePanelSettingsData {
    const NAME: SettingsName = SettingsName::SidePanel;
}
