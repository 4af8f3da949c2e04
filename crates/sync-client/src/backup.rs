//! Backup files on disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use sync_core::{backup_file_name, export_backup, LocalState};
use tokio::fs;
use tracing::info;

/// Write today's backup of `state` into `dir`. Returns the file path.
pub async fn write_backup(dir: &Path, state: &LocalState, now: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create backup directory {:?}", dir))?;

    let path = dir.join(backup_file_name(now.date_naive()));
    fs::write(&path, export_backup(state, now))
        .await
        .with_context(|| format!("Failed to write backup {:?}", path))?;

    info!("Wrote backup to {:?}", path);
    Ok(path)
}

/// Read a backup or payload file as text.
pub async fn read_backup(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read backup {:?}", path))
}
