//! State store backed by one JSON file using tokio::fs.
//!
//! File layout: `{"appState": <LocalState>}`. Saves go to a sibling temp file
//! that is renamed over the target, so a reader never sees a half-written
//! blob.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sync_core::store::{Result, StateStore, StoreError};
use sync_core::LocalState;
use tokio::fs;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobRef<'a> {
    app_state: &'a LocalState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    app_state: Option<LocalState>,
}

/// Persisted store for the CLI
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LocalState>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let blob: Blob =
            serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(blob.app_state.map(|mut state| {
            state.normalize();
            state
        }))
    }

    async fn save(&self, state: &LocalState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let json = serde_json::to_vec(&BlobRef { app_state: state })
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let temp = self.temp_path();
        fs::write(&temp, json)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        debug!("Saved state to {:?}", self.path);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{Habit, Tag, Task};
    use tempfile::TempDir;

    fn sample() -> LocalState {
        let mut state = LocalState::new();
        state.daily_tasks.insert(
            "2024-01-01".into(),
            vec![Task::new("1", "Trip").with_subtask(Task::new("1-subtask-1", "Pack"))],
        );
        state.custom_tags.push(Tag::new("t1", "Work", "#ff0000"));
        state.habits.push(Habit::new("h1", "Meditate"));
        state.settings.dark_mode = true;
        state
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));

        store.save(&sample()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, sample());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_uses_app_state_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::new(&path);
        store.save(&sample()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["appState"]["dailyTasks"]["2024-01-01"].is_array());
        assert_eq!(raw["appState"]["darkMode"], true);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).await.unwrap();
        assert!(store.has_data().await.unwrap());

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        // Clearing twice is fine
        store.clear().await.unwrap();
    }
}
