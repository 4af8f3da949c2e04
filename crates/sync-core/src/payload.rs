//! SyncPayload: the complete exportable snapshot exchanged during sync and
//! used for manual backup/restore.
//!
//! Wire format:
//! `{"dailyTasks":{..},"customTags":[..],"habits":[..],"darkMode":false,"theme":"default","exportDate":"..","version":"3.0"}`
//!
//! Payloads are built fresh for every transfer and consumed once. Decoding is
//! lenient: absent or `null` collections are empty, absent counters are zero.

use crate::error::{Result, SyncError};
use crate::model::{null_as_default, DateKey, Habit, LocalState, Tag, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload format version written by this implementation.
pub const PAYLOAD_VERSION: &str = "3.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub daily_tasks: BTreeMap<DateKey, Vec<Task>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_tags: Vec<Tag>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub habits: Vec<Habit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Counts shown to the user before they decide to apply a received payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadPreview {
    /// Number of date buckets
    pub days: usize,
    pub tasks: usize,
    pub tags: usize,
    pub habits: usize,
    pub theme: String,
}

impl SyncPayload {
    /// Snapshot the full local dataset.
    pub fn from_state(state: &LocalState, export_date: DateTime<Utc>) -> Self {
        Self {
            daily_tasks: state.daily_tasks.clone(),
            custom_tags: state.custom_tags.clone(),
            habits: state.habits.clone(),
            dark_mode: Some(state.settings.dark_mode),
            theme: Some(state.settings.theme.clone()),
            export_date: Some(export_date),
            version: Some(PAYLOAD_VERSION.to_string()),
        }
    }

    /// A payload carrying no data and no settings.
    pub fn empty() -> Self {
        Self {
            daily_tasks: BTreeMap::new(),
            custom_tags: Vec::new(),
            habits: Vec::new(),
            dark_mode: None,
            theme: None,
            export_date: None,
            version: None,
        }
    }

    /// Serialize to compact JSON, the form sent over the data channel.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("SyncPayload serialization should not fail")
    }

    /// Serialize to indented JSON, the form written to backup files.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("SyncPayload serialization should not fail")
    }

    /// Parse a payload received from a peer or read from a file.
    ///
    /// Malformed JSON is a [`SyncError::PayloadParse`]. Well-formed JSON that
    /// is not an object, or whose collections have the wrong shape, is a
    /// [`SyncError::MergeInput`]. Missing collections are not errors.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SyncError::PayloadParse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SyncError::MergeInput(
                "payload is not a JSON object".to_string(),
            ));
        }
        let mut payload: Self =
            serde_json::from_value(value).map_err(|e| SyncError::MergeInput(e.to_string()))?;
        payload.normalize();
        Ok(payload)
    }

    fn normalize(&mut self) {
        for task in self.daily_tasks.values_mut().flatten() {
            task.normalize();
        }
    }

    /// Whether the payload was written by a different format version.
    pub fn is_foreign_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| v != PAYLOAD_VERSION)
    }

    pub fn task_count(&self) -> usize {
        self.daily_tasks.values().map(Vec::len).sum()
    }

    pub fn preview(&self) -> PayloadPreview {
        PayloadPreview {
            days: self.daily_tasks.len(),
            tasks: self.task_count(),
            tags: self.custom_tags.len(),
            habits: self.habits.len(),
            theme: self.theme.clone().unwrap_or_else(|| "default".to_string()),
        }
    }
}
