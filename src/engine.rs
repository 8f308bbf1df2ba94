//! The detect → replace → record pipeline shared by every trigger.
//!
//! Timer, manual and webhook triggers all end up in [`Engine`]. Work on a
//! single container always runs under that container's name lock, so two
//! triggers can never replace the same container at once. Cache writes and
//! history appends are each atomic on their own; a crash between the two
//! may leave one without the other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::StatusCache;
use crate::detector::UpdateDetector;
use crate::error::{UpdateError, WebhookError};
use crate::history::HistoryLog;
use crate::notify::Notifier;
use crate::registry::Authenticator;
use crate::replacer::{is_backup_name, ContainerReplacer};
use crate::runtime::{short_id, ContainerRuntime};
use crate::settings::SettingsStore;
use crate::types::{
    ApplyOutcome, BulkReport, CheckOutcome, ContainerRef, ContainerView, ExclusionChange,
    HistoryAction, HistoryStatus, ProcessResult, Trigger, UpdateApplyResult, UpdateCheck,
    UpdateCheckResult, EXCLUDED_REASON,
};

/// One mutex per container name. An entry lives while someone holds or
/// waits on it.
#[derive(Default)]
struct ContainerLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    async fn lock(&self, name: &str) -> NameGuard<'_> {
        let lock = self.table().entry(name.to_string()).or_default().clone();
        NameGuard {
            locks: self,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

struct NameGuard<'a> {
    locks: &'a ContainerLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.locks.table();
        if table
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.name);
        }
    }
}

/// How a bulk pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Timer: replacement only when auto-update is enabled.
    Scheduled,
    /// Manual or webhook: replacement whenever an update is available.
    Bulk(Trigger),
}

impl ScanMode {
    fn trigger(self) -> Trigger {
        match self {
            ScanMode::Scheduled => Trigger::Auto,
            ScanMode::Bulk(trigger) => trigger,
        }
    }

    fn scan_action(self) -> HistoryAction {
        match self {
            ScanMode::Scheduled => HistoryAction::AutoScan,
            ScanMode::Bulk(_) => HistoryAction::BulkUpdate,
        }
    }

    fn apply_action(self) -> HistoryAction {
        match self {
            ScanMode::Scheduled => HistoryAction::AutoUpdate,
            ScanMode::Bulk(_) => HistoryAction::BulkUpdate,
        }
    }
}

pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<SettingsStore>,
    cache: StatusCache,
    history: Arc<HistoryLog>,
    notifier: Arc<dyn Notifier>,
    detector: UpdateDetector,
    replacer: ContainerReplacer,
    locks: ContainerLocks,
}

impl Engine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: Arc<SettingsStore>,
        history: Arc<HistoryLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let auth = Arc::new(Authenticator::new(runtime.clone(), settings.clone()));
        Self {
            detector: UpdateDetector::new(runtime.clone(), auth.clone()),
            replacer: ContainerReplacer::new(runtime.clone(), auth.clone()),
            runtime,
            settings,
            cache: StatusCache::new(),
            history,
            notifier,
            locks: ContainerLocks::default(),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    /// Manual single-container check.
    pub async fn check(&self, container_id: &str) -> UpdateCheckResult {
        let target = match self.resolve(container_id).await {
            Ok(target) => target,
            Err(e) => return CheckOutcome::Failed(e).to_result(),
        };
        let _guard = self.locks.lock(&target.name).await;

        let outcome = if self.settings.is_excluded(&target.name).await {
            CheckOutcome::Skipped
        } else {
            self.detector.check(&target.name).await
        };
        let result = outcome.to_result();
        self.cache.set(&target.name, result.clone()).await;

        let (status, message) = match &outcome {
            CheckOutcome::Skipped => (HistoryStatus::Skipped, EXCLUDED_REASON.to_string()),
            CheckOutcome::UpToDate(_) => (HistoryStatus::UpToDate, "No updates found".to_string()),
            CheckOutcome::UpdateAvailable(_) => {
                (HistoryStatus::UpdateAvailable, "Update available".to_string())
            }
            CheckOutcome::Failed(e) => (HistoryStatus::Error, e.to_string()),
        };
        self.history
            .log_event(
                HistoryAction::CheckUpdate,
                status,
                message,
                Some(&target.name),
                Some(Trigger::Manual),
                check_details(&outcome),
            )
            .await;
        result
    }

    /// Manual single-container update. Runs regardless of the auto-update flag.
    pub async fn apply(&self, container_id: &str) -> UpdateApplyResult {
        self.apply_as(container_id, Trigger::Manual).await
    }

    /// Manual pass over every container. Fails only when the container
    /// list itself cannot be read; per-container failures are in the report.
    pub async fn process_all(&self) -> Result<BulkReport, UpdateError> {
        self.scan(ScanMode::Bulk(Trigger::Manual)).await
    }

    /// Timer pass over every container.
    pub async fn run_scheduled_scan(&self) -> Result<BulkReport, UpdateError> {
        self.scan(ScanMode::Scheduled).await
    }

    pub async fn webhook_apply(
        &self,
        token: &str,
        container_id: &str,
    ) -> Result<UpdateApplyResult, WebhookError> {
        self.verify_webhook(token).await?;
        Ok(self.apply_as(container_id, Trigger::Webhook).await)
    }

    pub async fn webhook_process_all(&self, token: &str) -> Result<BulkReport, WebhookError> {
        self.verify_webhook(token).await?;
        Ok(self.scan(ScanMode::Bulk(Trigger::Webhook)).await?)
    }

    /// Containers with their exclusion flag and cached status.
    pub async fn list_containers(&self) -> Result<Vec<ContainerView>, UpdateError> {
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| UpdateError::Runtime(e.to_string()))?;
        let statuses = self.cache.all().await;
        let settings = self.settings.get_all().await;

        Ok(containers
            .into_iter()
            .map(|c| ContainerView {
                short_id: short_id(&c.id).to_string(),
                excluded: settings.excluded_containers.is_excluded(&c.name),
                update_status: statuses.get(&c.name).cloned(),
                id: c.id,
                name: c.name,
                image: c.image,
                state: c.state,
            })
            .collect())
    }

    pub async fn set_exclusion(
        &self,
        container_id: &str,
        excluded: bool,
    ) -> Result<ExclusionChange, UpdateError> {
        let target = self.resolve(container_id).await?;
        let excluded_containers = self.settings.set_excluded(&target.name, excluded).await?;
        info!(
            "Container {} {} updates",
            target.name,
            if excluded { "excluded from" } else { "included in" }
        );
        Ok(ExclusionChange {
            excluded: excluded_containers.iter().any(|n| n == &target.name),
            id: target.id,
            name: target.name,
            excluded_containers,
        })
    }

    async fn resolve(&self, container_id: &str) -> Result<ContainerRef, UpdateError> {
        let details = self
            .runtime
            .inspect_container(container_id)
            .await
            .map_err(|e| UpdateError::from_lookup(container_id, e))?;
        Ok(ContainerRef {
            id: details.id,
            name: details.name,
        })
    }

    async fn apply_as(&self, container_id: &str, trigger: Trigger) -> UpdateApplyResult {
        let target = match self.resolve(container_id).await {
            Ok(target) => target,
            Err(e) => return ApplyOutcome::Failed(e).to_result(),
        };
        let _guard = self.locks.lock(&target.name).await;

        if self.settings.is_excluded(&target.name).await {
            self.history
                .log_event(
                    HistoryAction::Update,
                    HistoryStatus::Skipped,
                    EXCLUDED_REASON,
                    Some(&target.name),
                    Some(trigger),
                    json!({}),
                )
                .await;
            return ApplyOutcome::Skipped.to_result();
        }

        self.replace_and_record(&target.name, HistoryAction::Update, trigger)
            .await
            .to_result()
    }

    async fn scan(&self, mode: ScanMode) -> Result<BulkReport, UpdateError> {
        info!("Running {:?} scan...", mode);
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                let err = UpdateError::Runtime(e.to_string());
                error!("Scan failed: {}", err);
                self.history
                    .log_event(
                        mode.scan_action(),
                        HistoryStatus::Error,
                        format!("Failed to list containers: {e}"),
                        None,
                        Some(mode.trigger()),
                        json!({}),
                    )
                    .await;
                return Err(err);
            }
        };

        let mut results = Vec::with_capacity(containers.len());
        for container in containers {
            // Left behind by an interrupted replacement; an operator decides.
            if is_backup_name(&container.name) {
                warn!("Skipping backup container {}", container.name);
                continue;
            }
            let target = ContainerRef {
                id: container.id,
                name: container.name,
            };
            results.push(self.process_one(&target, mode).await);
        }

        let report = BulkReport::new(results);
        info!("Scan finished: {:?}", report.summary);
        Ok(report)
    }

    /// Gate, detect, record and (depending on `mode`) replace one container.
    async fn process_one(&self, target: &ContainerRef, mode: ScanMode) -> ProcessResult {
        let _guard = self.locks.lock(&target.name).await;
        let trigger = mode.trigger();
        let result = |status, message: String| ProcessResult {
            id: target.id.clone(),
            name: target.name.clone(),
            status,
            message,
        };

        if self.settings.is_excluded(&target.name).await {
            self.cache
                .set(&target.name, CheckOutcome::Skipped.to_result())
                .await;
            self.record(
                mode.scan_action(),
                HistoryStatus::Skipped,
                EXCLUDED_REASON,
                &target.name,
                trigger,
                json!({}),
            )
            .await;
            return result(HistoryStatus::Skipped, EXCLUDED_REASON.to_string());
        }

        let outcome = self.detector.check(&target.name).await;
        self.cache.set(&target.name, outcome.to_result()).await;

        let check = match outcome {
            CheckOutcome::Skipped => {
                return result(HistoryStatus::Skipped, EXCLUDED_REASON.to_string())
            }
            CheckOutcome::Failed(e) => {
                let message = e.to_string();
                self.record(
                    mode.scan_action(),
                    HistoryStatus::Error,
                    &message,
                    &target.name,
                    trigger,
                    json!({}),
                )
                .await;
                return result(HistoryStatus::Error, message);
            }
            CheckOutcome::UpToDate(check) => {
                self.record(
                    mode.scan_action(),
                    HistoryStatus::UpToDate,
                    "No updates found",
                    &target.name,
                    trigger,
                    json!({"image": check.image}),
                )
                .await;
                return result(HistoryStatus::UpToDate, "No updates found".to_string());
            }
            CheckOutcome::UpdateAvailable(check) => check,
        };

        info!("Update available for {}", target.name);
        if mode == ScanMode::Scheduled && !self.settings.get_all().await.auto_update_enabled {
            let message = "Update available; auto-update disabled";
            self.record(
                HistoryAction::AutoScan,
                HistoryStatus::UpdateAvailable,
                message,
                &target.name,
                trigger,
                available_details(&check),
            )
            .await;
            return result(HistoryStatus::UpdateAvailable, message.to_string());
        }

        match self
            .replace_and_record(&target.name, mode.apply_action(), trigger)
            .await
        {
            ApplyOutcome::Updated(applied) => result(HistoryStatus::Updated, applied.message),
            ApplyOutcome::Failed(e) => result(HistoryStatus::Error, e.to_string()),
            ApplyOutcome::Skipped => result(HistoryStatus::Skipped, EXCLUDED_REASON.to_string()),
        }
    }

    /// Replace, then write cache, history and notification.
    /// Callers hold the container's lock.
    async fn replace_and_record(
        &self,
        name: &str,
        action: HistoryAction,
        trigger: Trigger,
    ) -> ApplyOutcome {
        let cleanup = self.settings.get_all().await.cleanup_enabled;
        info!("Updating {} ({:?} trigger)...", name, trigger);
        let outcome = match self.replacer.replace(name, cleanup).await {
            Ok(applied) => ApplyOutcome::Updated(applied),
            Err(e) => ApplyOutcome::Failed(e),
        };

        match &outcome {
            ApplyOutcome::Updated(applied) => {
                self.cache
                    .set(
                        name,
                        UpdateCheckResult {
                            update_available: false,
                            current_id: Some(applied.image_id.clone()),
                            latest_id: Some(applied.image_id.clone()),
                            image: Some(applied.image.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                self.record(
                    action,
                    HistoryStatus::Updated,
                    &applied.message,
                    name,
                    trigger,
                    json!({
                        "image": applied.image,
                        "new_id": applied.new_id,
                        "image_id": applied.image_id,
                        "old_image_id": applied.old_image_id,
                        "warning": applied.warning,
                    }),
                )
                .await;
            }
            ApplyOutcome::Failed(e) => {
                let message = e.to_string();
                self.record(action, HistoryStatus::Error, &message, name, trigger, json!({}))
                    .await;
            }
            ApplyOutcome::Skipped => {}
        }

        let result = outcome.to_result();
        if let Err(e) = self.notifier.send_update_notification(name, &result).await {
            error!("Notification failed for {}: {}", name, e);
        }
        outcome
    }

    async fn record(
        &self,
        action: HistoryAction,
        status: HistoryStatus,
        message: &str,
        container: &str,
        trigger: Trigger,
        details: serde_json::Value,
    ) {
        self.history
            .log_event(action, status, message, Some(container), Some(trigger), details)
            .await;
    }

    async fn verify_webhook(&self, presented: &str) -> Result<(), WebhookError> {
        let expected = match self.settings.get_all().await.webhook_token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(WebhookError::Disabled),
        };
        let expected = Sha256::digest(expected.as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        let diff = expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            warn!(
                "Rejected webhook call with token fingerprint {}",
                &hex::encode(presented)[..8]
            );
            return Err(WebhookError::Unauthorized);
        }
        debug!("Webhook token accepted");
        Ok(())
    }
}

fn available_details(check: &UpdateCheck) -> serde_json::Value {
    json!({
        "image": check.image,
        "current_id": check.current_id,
        "latest_id": check.latest_id,
    })
}

fn check_details(outcome: &CheckOutcome) -> serde_json::Value {
    match outcome {
        CheckOutcome::UpToDate(check) | CheckOutcome::UpdateAvailable(check) => {
            available_details(check)
        }
        _ => json!({}),
    }
}
