//! Operator-editable settings, persisted as JSON.
//!
//! Unlike [`Config`](crate::config::Config), which is read once at
//! startup, these values change while the daemon runs: the scheduler
//! re-reads the interval, the engine re-reads the auto-update flag on
//! every scan and the authenticator picks up new registry tokens.

use std::path::{Path, PathBuf};

use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::SettingsError;
use crate::exclusion::ExclusionList;
use crate::persist::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub check_interval_minutes: u64,
    pub auto_update_enabled: bool,
    pub cleanup_enabled: bool,
    pub excluded_containers: ExclusionList,

    pub dockerhub_username: Option<String>,
    pub dockerhub_token: Option<String>,
    pub ghcr_username: Option<String>,
    pub ghcr_token: Option<String>,

    /// Shared secret for the webhook trigger. Unset disables the webhook.
    pub webhook_token: Option<String>,

    pub notifications_enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_to: Option<String>,
    pub smtp_use_tls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_minutes: 60,
            auto_update_enabled: false,
            cleanup_enabled: false,
            excluded_containers: ExclusionList::new(),
            dockerhub_username: None,
            dockerhub_token: None,
            ghcr_username: None,
            ghcr_token: None,
            webhook_token: None,
            notifications_enabled: false,
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_to: None,
            smtp_use_tls: true,
        }
    }
}

/// Upper bound for `check_interval_minutes`: 30 days.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 30 * 24 * 60;

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=MAX_CHECK_INTERVAL_MINUTES).contains(&self.check_interval_minutes) {
            return Err(SettingsError::Invalid {
                field: "check_interval_minutes".into(),
                reason: format!("must be between 1 and {MAX_CHECK_INTERVAL_MINUTES}"),
            });
        }
        Ok(())
    }
}

/// Lock-guarded settings with write-through persistence.
pub struct SettingsStore {
    path: Option<PathBuf>,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads settings from `path`, writing defaults if the file is missing.
    /// A malformed file is logged and replaced in memory by defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
                Ok(settings) => match settings.validate() {
                    Ok(()) => settings,
                    Err(e) => {
                        error!("Rejected settings {}: {}", path.display(), e);
                        Settings::default()
                    }
                },
                Err(e) => {
                    error!("Failed to parse settings {}: {}", path.display(), e);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, writing defaults", path.display());
                let defaults = Settings::default();
                if let Err(e) = persist(&path, &defaults).await {
                    error!("Failed to save settings: {}", e);
                }
                defaults
            }
            Err(e) => {
                error!("Failed to read settings {}: {}", path.display(), e);
                Settings::default()
            }
        };

        Self {
            path: Some(path),
            inner: RwLock::new(settings),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            inner: RwLock::new(settings),
        }
    }

    pub async fn get_all(&self) -> Settings {
        self.inner.read().await.clone()
    }

    /// Single key lookup in the JSON representation.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let settings = self.inner.read().await;
        match serde_json::to_value(&*settings) {
            Ok(Value::Object(mut map)) => map.remove(key),
            _ => None,
        }
    }

    /// Merges a partial JSON object into the current settings.
    ///
    /// The merged result is validated before it replaces the current
    /// settings, so a rejected update leaves the store untouched.
    pub async fn update(&self, partial: Value) -> Result<Settings, SettingsError> {
        let Value::Object(changes) = partial else {
            return Err(SettingsError::Invalid {
                field: "settings".into(),
                reason: "expected a JSON object".into(),
            });
        };

        let mut settings = self.inner.write().await;
        let mut merged = match serde_json::to_value(&*settings)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in changes {
            merged.insert(key, value);
        }

        let next: Settings =
            serde_json::from_value(Value::Object(merged)).map_err(|e| SettingsError::Invalid {
                field: "settings".into(),
                reason: e.to_string(),
            })?;
        next.validate()?;

        self.save(&next).await?;
        *settings = next.clone();
        Ok(next)
    }

    pub async fn is_excluded(&self, name: &str) -> bool {
        self.inner.read().await.excluded_containers.is_excluded(name)
    }

    pub async fn get_exclusions(&self) -> Vec<String> {
        self.inner.read().await.excluded_containers.names().to_vec()
    }

    /// Adds or removes `name` and persists. Returns the resulting list.
    pub async fn set_excluded(
        &self,
        name: &str,
        excluded: bool,
    ) -> Result<Vec<String>, SettingsError> {
        let mut settings = self.inner.write().await;
        let mut next = settings.clone();
        next.excluded_containers.set(name, excluded);
        self.save(&next).await?;
        *settings = next;
        Ok(settings.excluded_containers.names().to_vec())
    }

    async fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        match &self.path {
            Some(path) => persist(path, settings).await,
            None => Ok(()),
        }
    }
}

async fn persist(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(settings)?;
    write_atomic(path, json.as_bytes()).await?;
    Ok(())
}
