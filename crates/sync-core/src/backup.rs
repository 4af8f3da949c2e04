//! Manual backup and restore using the SyncPayload shape.
//!
//! A backup is the same JSON a peer would receive, pretty-printed. Restoring
//! replaces local collections wholesale rather than merging; use
//! [`crate::merge`] to fold a backup into existing data instead.

use crate::error::{Result, SyncError};
use crate::model::LocalState;
use crate::payload::SyncPayload;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::info;

/// Backup file name for the given day: `PrioSpace-backup-YYYY-MM-DD.json`.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("PrioSpace-backup-{}.json", date.format("%Y-%m-%d"))
}

/// Render the full local dataset as backup JSON.
pub fn export_backup(state: &LocalState, now: DateTime<Utc>) -> String {
    SyncPayload::from_state(state, now).to_json_pretty()
}

/// Restore from backup JSON.
///
/// Collections present in the file replace the local ones; absent ones keep
/// their local value. Settings are applied when present.
pub fn import_backup(local: &LocalState, text: &str) -> Result<LocalState> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SyncError::PayloadParse(e.to_string()))?;
    let present = |key: &str| value.get(key).is_some_and(|v| !v.is_null());
    let has_tasks = present("dailyTasks");
    let has_tags = present("customTags");
    let has_habits = present("habits");

    let payload = SyncPayload::from_value(value)?;
    let mut state = local.clone();

    if has_tasks {
        state.daily_tasks = payload.daily_tasks;
    }
    if has_tags {
        state.custom_tags = payload.custom_tags;
    }
    if has_habits {
        state.habits = payload.habits;
    }
    if let Some(dark) = payload.dark_mode {
        state.settings.dark_mode = dark;
    }
    if let Some(theme) = payload.theme.filter(|t| !t.is_empty()) {
        state.settings.theme = theme;
    }
    state.normalize();

    info!(
        "Imported backup: {} tasks, {} tags, {} habits",
        state.task_count(),
        state.custom_tags.len(),
        state.habits.len()
    );
    Ok(state)
}
