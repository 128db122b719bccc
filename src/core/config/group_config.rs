// Group configuration - the per-group security settings record.
//
// This is the externally queryable shape other tooling (the /config report)
// depends on, so the serde representation is pinned: "enabled"/"disabled",
// "yes"/"no", "no"/"image"/"web", and antiflood as "no" or an integer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),
}

/// Master switch for the whole feature set of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardyStatus {
    Enabled,
    Disabled,
}

/// Yes/no feature toggle, persisted as "yes"/"no".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    Yes,
    No,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::Yes
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            Toggle::Yes
        } else {
            Toggle::No
        }
    }
}

/// How new members prove they are human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    No,
    Image,
    Web,
}

/// Antiflood limit: off, or max messages per 20-second window.
///
/// Disabled antiflood is always this variant, never a zero limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntifloodSetting {
    Off,
    Limit(u32),
}

impl Serialize for AntifloodSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AntifloodSetting::Off => serializer.serialize_str("no"),
            AntifloodSetting::Limit(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for AntifloodSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Historical records stored the limit either as a number or as a
        // numeric string, so accept both.
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "no" => Ok(AntifloodSetting::Off),
            serde_json::Value::String(s) => s
                .parse::<u32>()
                .map(AntifloodSetting::Limit)
                .map_err(|_| D::Error::custom(format!("invalid antiflood value: {s}"))),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|n| AntifloodSetting::Limit(n as u32))
                .ok_or_else(|| D::Error::custom("invalid antiflood number")),
            other => Err(D::Error::custom(format!(
                "invalid antiflood value: {other}"
            ))),
        }
    }
}

/// One security configuration record per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub guardy_status: GuardyStatus,
    pub link_removal: Toggle,
    pub forwarded_removal: Toggle,
    pub human_verification: VerificationMode,
    pub bot_removal: Toggle,
    pub antiflood: AntifloodSetting,
}

impl GroupConfig {
    /// Everything off. Also the effective config of a group without a record.
    pub fn all_off() -> Self {
        Self {
            guardy_status: GuardyStatus::Disabled,
            link_removal: Toggle::No,
            forwarded_removal: Toggle::No,
            human_verification: VerificationMode::No,
            bot_removal: Toggle::No,
            antiflood: AntifloodSetting::Off,
        }
    }

    /// The maximal-protection preset applied by the one-shot shortcuts.
    pub fn full_security() -> Self {
        Self {
            guardy_status: GuardyStatus::Enabled,
            link_removal: Toggle::Yes,
            forwarded_removal: Toggle::Yes,
            human_verification: VerificationMode::Web,
            bot_removal: Toggle::Yes,
            antiflood: AntifloodSetting::Limit(10),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.guardy_status == GuardyStatus::Enabled
    }
}

/// Partial update merged into a group's config record (upsert-safe).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupConfigPatch {
    pub guardy_status: Option<GuardyStatus>,
    pub link_removal: Option<Toggle>,
    pub forwarded_removal: Option<Toggle>,
    pub human_verification: Option<VerificationMode>,
    pub bot_removal: Option<Toggle>,
    pub antiflood: Option<AntifloodSetting>,
}

impl GroupConfigPatch {
    /// A patch that sets every field, used by the wizard commit and the presets.
    pub fn full(config: GroupConfig) -> Self {
        Self {
            guardy_status: Some(config.guardy_status),
            link_removal: Some(config.link_removal),
            forwarded_removal: Some(config.forwarded_removal),
            human_verification: Some(config.human_verification),
            bot_removal: Some(config.bot_removal),
            antiflood: Some(config.antiflood),
        }
    }

    /// Merge this patch over an existing config.
    pub fn apply_to(&self, mut config: GroupConfig) -> GroupConfig {
        if let Some(v) = self.guardy_status {
            config.guardy_status = v;
        }
        if let Some(v) = self.link_removal {
            config.link_removal = v;
        }
        if let Some(v) = self.forwarded_removal {
            config.forwarded_removal = v;
        }
        if let Some(v) = self.human_verification {
            config.human_verification = v;
        }
        if let Some(v) = self.bot_removal {
            config.bot_removal = v;
        }
        if let Some(v) = self.antiflood {
            config.antiflood = v;
        }
        config
    }
}

/// Group directory entry, written when the bot is added to a new group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupProfile {
    pub group_id: i64,
    pub chat_title: String,
    pub chat_username: Option<String>,
    pub chat_type: String,
    pub added_by: i64,
    pub date_added: DateTime<Utc>,
}

/// Private-chat user entry, written on first /start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub date_added: DateTime<Utc>,
}

/// Persistence port for group configuration records.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, group_id: i64) -> Result<Option<GroupConfig>, StoreError>;

    /// Merge `patch` into the group's record, creating it if absent.
    async fn set_config(&self, group_id: i64, patch: GroupConfigPatch) -> Result<(), StoreError>;

    async fn delete_config(&self, group_id: i64) -> Result<(), StoreError>;
}

/// Persistence port for the group/user directory.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn group_exists(&self, group_id: i64) -> Result<bool, StoreError>;
    async fn add_group(&self, profile: GroupProfile) -> Result<(), StoreError>;
    async fn delete_group(&self, group_id: i64) -> Result<(), StoreError>;
    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError>;
    async fn add_user(&self, profile: UserProfile) -> Result<(), StoreError>;
}
