//! Persisted store abstraction for the tracker's single state blob.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `JsonFileStore` (in sync-client) - One JSON file on disk

use crate::model::LocalState;
use async_trait::async_trait;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt state blob: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Load/save/clear of the one opaque state blob the tracker persists.
///
/// Saves replace the whole blob, so readers never observe a partial merge.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The stored state, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<LocalState>>;

    /// Replace the stored state.
    async fn save(&self, state: &LocalState) -> Result<()>;

    /// Remove the stored state.
    async fn clear(&self) -> Result<()>;

    async fn has_data(&self) -> Result<bool> {
        Ok(self.load().await?.is_some())
    }
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<Option<LocalState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LocalState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load(&self) -> Result<Option<LocalState>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn save(&self, state: &LocalState) -> Result<()> {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
