//! Staleness detection by pulling the configured image reference and
//! comparing the resulting image id with the one the container runs.
//! Every check performs a full pull, so the id compared is the one a
//! replacement would run.

use std::sync::Arc;

use log::{error, info};

use crate::error::UpdateError;
use crate::registry::Authenticator;
use crate::runtime::ContainerRuntime;
use crate::types::{CheckOutcome, UpdateCheck};

pub struct UpdateDetector {
    runtime: Arc<dyn ContainerRuntime>,
    auth: Arc<Authenticator>,
}

impl UpdateDetector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, auth: Arc<Authenticator>) -> Self {
        Self { runtime, auth }
    }

    /// Never fails: every error is folded into [`CheckOutcome::Failed`].
    pub async fn check(&self, container: &str) -> CheckOutcome {
        match self.compare(container).await {
            Ok(check) => CheckOutcome::from_check(check),
            Err(e) => {
                error!("Update check for {} failed: {}", container, e);
                CheckOutcome::Failed(e)
            }
        }
    }

    async fn compare(&self, container: &str) -> Result<UpdateCheck, UpdateError> {
        let details = self
            .runtime
            .inspect_container(container)
            .await
            .map_err(|e| UpdateError::from_lookup(container, e))?;

        info!("Checking update for {} ({})...", details.name, details.image);
        let credentials = self.auth.authenticate(&details.image).await?;
        let pulled = self
            .runtime
            .pull_image(&details.image, credentials.as_ref())
            .await
            .map_err(|e| UpdateError::Pull(e.to_string()))?;

        Ok(UpdateCheck {
            current_id: details.image_id,
            latest_id: pulled.id,
            image: details.image,
            created: pulled.created,
        })
    }
}
