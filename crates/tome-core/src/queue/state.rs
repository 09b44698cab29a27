use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{read_record, write_record};
use crate::util::now_iso;

/// Last codebase revision a sweep fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub timestamp: String,
    pub commit_hash: String,
}

impl AnalysisState {
    pub fn new(commit_hash: impl Into<String>) -> Self {
        Self {
            timestamp: now_iso(),
            commit_hash: commit_hash.into(),
        }
    }

    /// Missing or unreadable state reads as `None`, which forces a sweep.
    pub async fn load(path: &Path) -> Option<Self> {
        read_record(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_record(path, self).await
    }

    pub fn matches(&self, revision: &str) -> bool {
        self.commit_hash.trim() == revision.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("analysis.json");
        assert!(AnalysisState::load(&path).await.is_none());

        AnalysisState::new("abc123").save(&path).await.expect("save");
        let loaded = AnalysisState::load(&path).await.expect("loaded");
        assert!(loaded.matches("abc123\n"));
        assert!(!loaded.matches("def456"));

        std::fs::write(&path, "garbage").expect("corrupt");
        assert!(AnalysisState::load(&path).await.is_none());
    }
}
