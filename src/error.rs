//! Error types shared by the update engine.
//!
//! [`RuntimeError`] comes out of the container runtime adapter.
//! [`UpdateError`] is what detection and replacement report back inside
//! their outcomes; it is never raised past the engine.

use std::fmt;

use thiserror::Error;

/// Failure reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no such container or image: {0}")]
    NotFound(String),

    #[error("docker api error: {0}")]
    Api(String),

    #[error("docker connection error: {0}")]
    Connection(String),

    #[error("registry rejected credentials: {0}")]
    Unauthorized(String),
}

/// The replacement step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStep {
    Stop,
    Rename,
    Recreate,
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ReplaceStep::Stop => "stop",
            ReplaceStep::Rename => "rename",
            ReplaceStep::Recreate => "recreate",
        };
        f.write_str(step)
    }
}

/// Why a check or an update did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// The container vanished between identification and action.
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Registry authentication failed: {0}")]
    Auth(String),

    #[error("Failed to pull image: {0}")]
    Pull(String),

    /// Stop, rename or recreate failed. The original container is left
    /// stopped, and once renamed it is found under `renamed_to`.
    #[error("Update failed during {step}: {reason}")]
    Replace {
        step: ReplaceStep,
        reason: String,
        renamed_to: Option<String>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The daemon could not be reached or answered with an unexpected error.
    #[error("Container runtime error: {0}")]
    Runtime(String),
}

impl UpdateError {
    pub(crate) fn from_lookup(container: &str, err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(_) => UpdateError::NotFound(container.to_string()),
            other => UpdateError::Runtime(other.to_string()),
        }
    }
}

/// Settings store failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Why a webhook trigger was refused or failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook trigger is disabled: no webhook token configured")]
    Disabled,

    #[error("invalid webhook token")]
    Unauthorized,

    #[error(transparent)]
    Update(#[from] UpdateError),
}

impl From<SettingsError> for UpdateError {
    fn from(err: SettingsError) -> Self {
        UpdateError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_error_message_keeps_detail() {
        let err = UpdateError::Pull("connection reset".into());
        assert_eq!(err.to_string(), "Failed to pull image: connection reset");
    }

    #[test]
    fn lookup_maps_missing_container_to_not_found() {
        let err = UpdateError::from_lookup("web", RuntimeError::NotFound("abc".into()));
        assert_eq!(err, UpdateError::NotFound("web".into()));

        let err = UpdateError::from_lookup("web", RuntimeError::Connection("refused".into()));
        assert!(matches!(err, UpdateError::Runtime(_)));
    }

    #[test]
    fn replace_error_names_the_step() {
        let err = UpdateError::Replace {
            step: ReplaceStep::Recreate,
            reason: "port is already allocated".into(),
            renamed_to: Some("web_old_abc".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("recreate"));
        assert!(msg.contains("port is already allocated"));
    }

    #[test]
    fn invalid_setting_becomes_config_error() {
        let err: UpdateError = SettingsError::Invalid {
            field: "check_interval_minutes".into(),
            reason: "must be at least 1".into(),
        }
        .into();
        assert!(matches!(err, UpdateError::Config(msg) if msg.contains("check_interval_minutes")));
    }
}
