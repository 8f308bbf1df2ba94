//! Last known status per container name. Ephemeral: rebuilt by the next scan.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::UpdateCheckResult;

#[derive(Default)]
pub struct StatusCache {
    entries: RwLock<HashMap<String, UpdateCheckResult>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, name: &str, status: UpdateCheckResult) {
        self.entries.write().await.insert(name.to_string(), status);
    }

    pub async fn get(&self, name: &str) -> Option<UpdateCheckResult> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn all(&self) -> HashMap<String, UpdateCheckResult> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn later_writes_overwrite() {
        let cache = StatusCache::new();
        cache
            .set(
                "web",
                UpdateCheckResult {
                    update_available: true,
                    ..Default::default()
                },
            )
            .await;
        cache.set("web", UpdateCheckResult::default()).await;

        assert!(!cache.get("web").await.unwrap().update_available);
        assert!(cache.get("db").await.is_none());
        assert_eq!(cache.all().await.len(), 1);
    }
}
