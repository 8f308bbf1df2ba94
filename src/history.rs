//! Bounded, persisted audit log of checks and updates.
//!
//! Each append truncates the log to `max_entries` (oldest first) and
//! rewrites the JSON file while still holding the lock, so concurrent
//! writers never interleave a push with another writer's save.
//! Persistence failures are logged and swallowed.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::persist::write_atomic;
use crate::types::{HistoryAction, HistoryStatus, Trigger};

pub const DEFAULT_MAX_ENTRIES: usize = 500;
pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub status: HistoryStatus,
    pub message: String,
    pub container: Option<String>,
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub details: Value,
}

/// Filter for [`HistoryLog::entries`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub action: Option<HistoryAction>,
    pub status: Option<HistoryStatus>,
    /// Defaults to [`DEFAULT_QUERY_LIMIT`]; `Some(0)` means unlimited.
    pub limit: Option<usize>,
}

pub struct HistoryLog {
    path: Option<PathBuf>,
    max_entries: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl HistoryLog {
    /// Load the log from `path`. An unreadable file yields an empty log.
    pub async fn load(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let mut entries: VecDeque<HistoryEntry> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!("Failed to load history {}: {}", path.display(), e);
                VecDeque::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                error!("Failed to load history {}: {}", path.display(), e);
                VecDeque::new()
            }
        };
        truncate(&mut entries, max_entries);

        Self {
            path: Some(path),
            max_entries,
            entries: Mutex::new(entries),
        }
    }

    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            path: None,
            max_entries,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn log_event(
        &self,
        action: HistoryAction,
        status: HistoryStatus,
        message: impl Into<String>,
        container: Option<&str>,
        trigger: Option<Trigger>,
        details: Value,
    ) -> HistoryEntry {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            status,
            message: message.into(),
            container: container.map(str::to_string),
            trigger,
            details: if details.is_null() {
                Value::Object(Default::default())
            } else {
                details
            },
        };

        let mut entries = self.entries.lock().await;
        entries.push_back(entry.clone());
        truncate(&mut entries, self.max_entries);
        self.save(&entries).await;
        entry
    }

    /// Matching entries, newest first.
    pub async fn entries(&self, query: &HistoryQuery) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().await;
        let limit = match query.limit {
            Some(0) => usize::MAX,
            Some(n) => n,
            None => DEFAULT_QUERY_LIMIT,
        };
        entries
            .iter()
            .rev()
            .filter(|e| query.action.map_or(true, |a| e.action == a))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn save(&self, entries: &VecDeque<HistoryEntry>) {
        let Some(path) = &self.path else {
            return;
        };
        let json = match serde_json::to_string_pretty(entries) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize history: {}", e);
                return;
            }
        };
        if let Err(e) = write_atomic(path, json.as_bytes()).await {
            error!("Failed to save history {}: {}", path.display(), e);
        }
    }
}

fn truncate(entries: &mut VecDeque<HistoryEntry>, max: usize) {
    while entries.len() > max {
        entries.pop_front();
    }
}
