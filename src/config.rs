use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::history::DEFAULT_MAX_ENTRIES;

/// Startup configuration. Operator-editable settings live in
/// [`SettingsStore`](crate::settings::SettingsStore) instead.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    pub settings_path: PathBuf,
    pub history_path: PathBuf,
    pub history_max_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
    pub stop_timeout_secs: i64,
    /// Overrides the webhook token held in settings when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: "settings.json".into(),
            history_path: "history.json".into(),
            history_max_entries: DEFAULT_MAX_ENTRIES,
            docker_socket: None,
            stop_timeout_secs: 10,
            webhook_token: None,
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("lighthouse.toml"))
            .merge(Json::file("lighthouse.json"))
            .merge(Env::prefixed("LIGHTHOUSE_"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("LIGHTHOUSE_WEBHOOK_TOKEN_FILE") {
            config.webhook_token = Some(read_secret(Path::new(&secret_file))?);
        }

        if config.history_max_entries == 0 {
            anyhow::bail!("history_max_entries must be at least 1");
        }

        Ok(config)
    }
}

fn read_secret(path: &Path) -> anyhow::Result<String> {
    let secret = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read secret {}: {}", path.display(), e))?
        .trim()
        .to_string();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_values_override_defaults() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                history_max_entries = 50
                docker_socket = "/run/docker.sock"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.history_max_entries, 50);
        assert_eq!(config.docker_socket.as_deref(), Some("/run/docker.sock"));
        assert_eq!(config.settings_path, PathBuf::from("settings.json"));
        assert_eq!(config.stop_timeout_secs, 10);
    }

    #[test]
    fn secret_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s3cret  ").unwrap();
        assert_eq!(read_secret(file.path()).unwrap(), "s3cret");
    }

    #[test]
    fn missing_secret_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_secret(&dir.path().join("absent")).is_err());
    }
}
