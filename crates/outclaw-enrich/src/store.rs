//! JSON snapshot store for the resolver's pending queue + cooldown table.
//! Only written at loop boundaries, human-readable, survives restarts.

use crate::resolver::ResolverState;
use std::path::{Path, PathBuf};

/// File-backed resolver snapshot.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self { path }
    }

    /// Load the snapshot, falling back to an empty state on any problem.
    pub fn load(&self) -> ResolverState {
        if !self.path.exists() {
            return ResolverState::default();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse resolver snapshot: {e}");
                ResolverState::default()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read resolver snapshot: {e}");
                ResolverState::default()
            }
        }
    }

    /// Persist the snapshot.
    pub fn save(&self, state: &ResolverState) {
        match serde_json::to_string_pretty(state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("⚠️ Resolver snapshot write failed: {e}");
                }
            }
            Err(e) => tracing::warn!("⚠️ Resolver snapshot serialize failed: {e}"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outclaw_core::types::{EnrichmentRequest, PartialIdentity};

    #[test]
    fn test_roundtrip_and_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "outclaw-test-enrich-store-{}.json",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();

        let store = SnapshotStore::new(&path);
        assert!(store.load().queue.is_empty());

        let mut state = ResolverState::default();
        state.queue.push_back(EnrichmentRequest::new(
            "lead-1",
            "linkedin",
            PartialIdentity {
                name: Some("Ada Example".into()),
                ..Default::default()
            },
        ));
        state
            .cooldowns
            .insert("dropcontact".into(), chrono::Utc::now());
        store.save(&state);

        let loaded = store.load();
        assert_eq!(loaded.queue.len(), 1);
        assert_eq!(loaded.queue[0].identifier, "lead-1");
        assert!(loaded.cooldowns.contains_key("dropcontact"));
        std::fs::remove_file(&path).ok();
    }
}
