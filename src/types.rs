//! Data structures passed between the triggers, the engine and the
//! outer HTTP layer.
//!
//! Outcomes are tagged enums internally ([`CheckOutcome`],
//! [`ApplyOutcome`]) and flattened into the serialisable
//! [`UpdateCheckResult`] / [`UpdateApplyResult`] shapes only at the
//! boundary.  That keeps "success and error both set" unrepresentable
//! inside the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Reason attached to every skipped outcome.
pub const EXCLUDED_REASON: &str = "Container excluded from updates";

/// Identity of a container as reported by the runtime.
///
/// `name` is the stable key for the cache, the exclusion list and the
/// history, because `id` changes every time the container is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// A successful comparison between the running image and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub current_id: String,
    pub latest_id: String,
    pub image: String,
    /// Creation time of the freshly pulled image, as reported by the daemon.
    pub created: Option<String>,
}

impl UpdateCheck {
    pub fn is_stale(&self) -> bool {
        self.current_id != self.latest_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Skipped,
    UpToDate(UpdateCheck),
    UpdateAvailable(UpdateCheck),
    Failed(UpdateError),
}

impl CheckOutcome {
    pub fn from_check(check: UpdateCheck) -> Self {
        if check.is_stale() {
            CheckOutcome::UpdateAvailable(check)
        } else {
            CheckOutcome::UpToDate(check)
        }
    }

    pub fn update_available(&self) -> bool {
        matches!(self, CheckOutcome::UpdateAvailable(_))
    }

    pub fn to_result(&self) -> UpdateCheckResult {
        match self {
            CheckOutcome::Skipped => UpdateCheckResult {
                skipped: true,
                reason: Some(EXCLUDED_REASON.to_string()),
                ..Default::default()
            },
            CheckOutcome::UpToDate(check) | CheckOutcome::UpdateAvailable(check) => {
                UpdateCheckResult {
                    update_available: check.is_stale(),
                    current_id: Some(check.current_id.clone()),
                    latest_id: Some(check.latest_id.clone()),
                    image: Some(check.image.clone()),
                    created: check.created.clone(),
                    ..Default::default()
                }
            }
            CheckOutcome::Failed(err) => UpdateCheckResult {
                error: Some(err.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Wire shape of a check, also what the status cache holds per container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckResult {
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A completed replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    /// Id of the replacement container.
    pub new_id: String,
    /// Image id the replacement runs.
    pub image_id: String,
    pub image: String,
    pub old_image_id: Option<String>,
    pub message: String,
    /// Set when the renamed old container could not be removed.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Skipped,
    Updated(AppliedUpdate),
    Failed(UpdateError),
}

impl ApplyOutcome {
    pub fn to_result(&self) -> UpdateApplyResult {
        match self {
            ApplyOutcome::Skipped => UpdateApplyResult {
                skipped: true,
                message: Some(EXCLUDED_REASON.to_string()),
                ..Default::default()
            },
            ApplyOutcome::Updated(applied) => UpdateApplyResult {
                success: true,
                new_id: Some(applied.new_id.clone()),
                image_id: Some(applied.image_id.clone()),
                image: Some(applied.image.clone()),
                old_image_id: applied.old_image_id.clone(),
                message: Some(applied.message.clone()),
                warning: applied.warning.clone(),
                ..Default::default()
            },
            ApplyOutcome::Failed(err) => UpdateApplyResult {
                error: Some(err.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Wire shape of an update, also what notifiers receive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateApplyResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Image the replaced container ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    CheckUpdate,
    Update,
    BulkUpdate,
    AutoScan,
    AutoUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Updated,
    UpToDate,
    Skipped,
    Error,
    UpdateAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Auto,
    Webhook,
}

/// One container's line in a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub id: String,
    pub name: String,
    pub status: HistoryStatus,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total: usize,
}

impl ProcessSummary {
    /// Results with status `update_available` only count towards `total`.
    pub fn tally(results: &[ProcessResult]) -> Self {
        let mut summary = ProcessSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                HistoryStatus::Updated => summary.updated += 1,
                HistoryStatus::UpToDate => summary.up_to_date += 1,
                HistoryStatus::Skipped => summary.skipped += 1,
                HistoryStatus::Error => summary.errors += 1,
                HistoryStatus::UpdateAvailable => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub results: Vec<ProcessResult>,
    pub summary: ProcessSummary,
}

impl BulkReport {
    pub fn new(results: Vec<ProcessResult>) -> Self {
        let summary = ProcessSummary::tally(&results);
        Self { results, summary }
    }
}

/// Timer bookkeeping, owned by the [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub last_check_time: Option<DateTime<Utc>>,
    pub next_check_time: Option<DateTime<Utc>>,
    pub interval_minutes: u64,
}

/// A container as shown to operators, with its cached status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerView {
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub excluded: bool,
    pub update_status: Option<UpdateCheckResult>,
}

/// Result of toggling a container's exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionChange {
    pub id: String,
    pub name: String,
    pub excluded: bool,
    pub excluded_containers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(current: &str, latest: &str) -> UpdateCheck {
        UpdateCheck {
            current_id: current.into(),
            latest_id: latest.into(),
            image: "app:v1".into(),
            created: None,
        }
    }

    #[test]
    fn differing_ids_mean_update_available() {
        let outcome = CheckOutcome::from_check(check("sha1", "sha2"));
        assert!(outcome.update_available());
        let result = outcome.to_result();
        assert!(result.update_available);
        assert_eq!(result.current_id.as_deref(), Some("sha1"));
        assert_eq!(result.latest_id.as_deref(), Some("sha2"));
        assert!(result.error.is_none());
    }

    #[test]
    fn failed_check_never_reports_update() {
        let result = CheckOutcome::Failed(UpdateError::Pull("timeout".into())).to_result();
        assert!(!result.update_available);
        assert_eq!(result.error.as_deref(), Some("Failed to pull image: timeout"));
        assert!(result.current_id.is_none());
    }

    #[test]
    fn skipped_check_carries_reason() {
        let result = CheckOutcome::Skipped.to_result();
        assert!(result.skipped);
        assert!(!result.update_available);
        assert_eq!(result.reason.as_deref(), Some(EXCLUDED_REASON));
    }

    #[test]
    fn check_result_serializes_without_empty_fields() {
        let json = serde_json::to_value(CheckOutcome::Skipped.to_result()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "update_available": false,
                "skipped": true,
                "reason": EXCLUDED_REASON,
            })
        );
    }

    #[test]
    fn history_enums_use_snake_case() {
        assert_eq!(
            serde_json::to_string(&HistoryAction::BulkUpdate).unwrap(),
            "\"bulk_update\""
        );
        assert_eq!(
            serde_json::to_string(&HistoryStatus::UpToDate).unwrap(),
            "\"up_to_date\""
        );
        assert_eq!(serde_json::to_string(&Trigger::Webhook).unwrap(), "\"webhook\"");
    }

    #[test]
    fn summary_tally_ignores_pending_updates_in_buckets() {
        let result = |status| ProcessResult {
            id: "id".into(),
            name: "n".into(),
            status,
            message: String::new(),
        };
        let summary = ProcessSummary::tally(&[
            result(HistoryStatus::Updated),
            result(HistoryStatus::Error),
            result(HistoryStatus::UpdateAvailable),
        ]);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total, 3);
    }
}
