//! In-place container replacement.
//!
//! Sequence: authenticate, pull, snapshot, stop, rename to
//! `<name>_old_<short id>`, create and start under the original name,
//! remove the renamed container.
//!
//! Failures before the stop leave the original untouched. A failure
//! during stop, rename or recreate leaves the original stopped (and, past
//! the rename, under its backup name) with no replacement running; this
//! is reported, not rolled back. Failing to remove the renamed container
//! after a successful recreate only produces a warning.

use std::sync::Arc;

use log::{error, info, warn};

use crate::error::{ReplaceStep, UpdateError};
use crate::registry::Authenticator;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::types::AppliedUpdate;

const BACKUP_MARKER: &str = "_old_";
const SHORT_ID_LEN: usize = 12;

fn backup_name(name: &str, short_id: &str) -> String {
    format!("{name}{BACKUP_MARKER}{short_id}")
}

/// Whether `name` looks like a container renamed aside by [`ContainerReplacer`].
pub fn is_backup_name(name: &str) -> bool {
    match name.rsplit_once(BACKUP_MARKER) {
        Some((base, id)) => {
            !base.is_empty()
                && id.len() == SHORT_ID_LEN
                && id.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

pub struct ContainerReplacer {
    runtime: Arc<dyn ContainerRuntime>,
    auth: Arc<Authenticator>,
}

impl ContainerReplacer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, auth: Arc<Authenticator>) -> Self {
        Self { runtime, auth }
    }

    /// Replace `container` with a fresh one on the latest pull of its image.
    ///
    /// With `cleanup` set, the previous image is removed afterwards when
    /// it differs from the new one; that removal is best-effort.
    pub async fn replace(
        &self,
        container: &str,
        cleanup: bool,
    ) -> Result<AppliedUpdate, UpdateError> {
        let old = self
            .runtime
            .inspect_container(container)
            .await
            .map_err(|e| UpdateError::from_lookup(container, e))?;
        let name = old.name.clone();

        let credentials = self.auth.authenticate(&old.image).await?;

        info!("Pulling latest image for {}...", name);
        let pulled = self
            .runtime
            .pull_image(&old.image, credentials.as_ref())
            .await
            .map_err(|e| UpdateError::Pull(e.to_string()))?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: old.image.clone(),
            config: old.config.clone(),
        };

        info!("Stopping {}...", name);
        self.runtime
            .stop_container(&old.id)
            .await
            .map_err(|e| step_failed(&name, ReplaceStep::Stop, e.to_string(), None))?;

        let backup_name = backup_name(&name, old.short_id());
        info!("Renaming old container {} to {}...", name, backup_name);
        self.runtime
            .rename_container(&old.id, &backup_name)
            .await
            .map_err(|e| step_failed(&name, ReplaceStep::Rename, e.to_string(), None))?;

        info!("Creating new container {}...", name);
        let new_id = self.runtime.create_and_start(&spec).await.map_err(|e| {
            step_failed(&name, ReplaceStep::Recreate, e.to_string(), Some(backup_name.clone()))
        })?;

        info!("Removing old container {}...", backup_name);
        let warning = match self.runtime.remove_container(&old.id).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to remove old container {}: {}", backup_name, e);
                Some(format!("Old container {backup_name} could not be removed: {e}"))
            }
        };

        if cleanup && !old.image_id.is_empty() && old.image_id != pulled.id {
            match self.runtime.remove_image(&old.image_id).await {
                Ok(()) => info!("Removed previous image {} of {}", old.image_id, name),
                Err(e) => warn!("Failed to remove previous image {}: {}", old.image_id, e),
            }
        }

        Ok(AppliedUpdate {
            new_id,
            image_id: pulled.id,
            image: old.image,
            old_image_id: Some(old.image_id).filter(|id| !id.is_empty()),
            message: format!("Successfully updated {name}"),
            warning,
        })
    }
}

fn step_failed(
    name: &str,
    step: ReplaceStep,
    reason: String,
    renamed_to: Option<String>,
) -> UpdateError {
    match &renamed_to {
        Some(backup) => error!(
            "Update of {} failed during {}: {}. Original stopped as {}, recover manually",
            name, step, reason, backup
        ),
        None => error!("Update of {} failed during {}: {}", name, step, reason),
    }
    UpdateError::Replace {
        step,
        reason,
        renamed_to,
    }
}
