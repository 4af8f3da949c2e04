//! Tracker data model: tasks, tags, habits, settings, and the local dataset.
//!
//! Field names serialize in camelCase so the same structs read and write the
//! tracker's persisted blob and the sync payload without translation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Date bucket key, formatted `YYYY-MM-DD`.
pub type DateKey = String;

/// Format a date the way task buckets and habit completions key it.
pub fn date_key(date: NaiveDate) -> DateKey {
    date.format("%Y-%m-%d").to_string()
}

/// Treat an explicit JSON `null` the same as an absent field.
pub(crate) fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// A to-do item. Top-level tasks own at most one level of subtasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within its date bucket (subtask ids are namespaced under the parent)
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed: bool,
    /// Minutes
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: f64,
    /// Seconds
    #[serde(default, deserialize_with = "null_as_default")]
    pub focus_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Tag id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subtasks: Vec<Task>,
    /// Back-reference, set on subtasks only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// True for the virtual daily projection of a habit
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_habit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habit_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subtasks_expanded: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Task {
    /// Create an uncompleted task with no tag and no subtasks.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completed: false,
            time_spent: 0.0,
            focus_time: 0.0,
            created_at: None,
            tag: None,
            subtasks: Vec::new(),
            parent_task_id: None,
            is_habit: false,
            habit_id: None,
            subtasks_expanded: false,
        }
    }

    /// Append a subtask, fixing up its back-reference.
    pub fn with_subtask(mut self, mut subtask: Task) -> Self {
        subtask.parent_task_id = Some(self.id.clone());
        subtask.subtasks.clear();
        self.subtasks.push(subtask);
        self
    }

    /// Restore structural invariants on a task decoded from outside input.
    ///
    /// Subtasks point back at this task, inherit its creation time when they
    /// have none, and never carry their own subtasks.
    pub fn normalize(&mut self) {
        let parent_id = self.id.clone();
        let created_at = self.created_at;
        for subtask in &mut self.subtasks {
            subtask.parent_task_id = Some(parent_id.clone());
            if subtask.created_at.is_none() {
                subtask.created_at = created_at;
            }
            subtask.subtasks.clear();
        }
    }
}

/// A user-defined label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
}

impl Tag {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}

/// A recurring habit and the days it was completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    /// ISO dates, no duplicates
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_dates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Habit {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed_dates: Vec::new(),
            tag: None,
        }
    }

    pub fn is_completed_on(&self, date: &str) -> bool {
        self.completed_dates.iter().any(|d| d == date)
    }

    /// Drop repeated dates, keeping first occurrences in order.
    pub fn dedup_dates(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.completed_dates.retain(|d| seen.insert(d.clone()));
    }

    /// The virtual task the tracker shows for this habit on `date`.
    ///
    /// Projections are never stored in `daily_tasks`; they are regenerated
    /// per day and toggling one edits `completed_dates` instead.
    pub fn project_for(&self, date: NaiveDate) -> Task {
        let key = date_key(date);
        let mut task = Task::new(format!("habit-{}-{}", self.id, key), self.name.clone());
        task.completed = self.is_completed_on(&key);
        task.created_at = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc));
        task.is_habit = true;
        task.habit_id = Some(self.id.clone());
        task.tag = self.tag.clone();
        task
    }
}

/// Appearance settings carried alongside the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub dark_mode: bool,
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            theme: "default".to_string(),
        }
    }
}

/// Everything the tracker persists: the one opaque state blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub daily_tasks: BTreeMap<DateKey, Vec<Task>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_tags: Vec<Tag>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub habits: Vec<Habit>,
    #[serde(flatten)]
    pub settings: Settings,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks stored for `date`, empty when the bucket does not exist.
    pub fn tasks_on(&self, date: &str) -> &[Task] {
        self.daily_tasks.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stored tasks for the day followed by each habit's projection.
    pub fn tasks_with_habits(&self, date: NaiveDate) -> Vec<Task> {
        let mut tasks = self.tasks_on(&date_key(date)).to_vec();
        tasks.extend(self.habits.iter().map(|h| h.project_for(date)));
        tasks
    }

    pub fn tag(&self, id: &str) -> Option<&Tag> {
        self.custom_tags.iter().find(|t| t.id == id)
    }

    pub fn task_count(&self) -> usize {
        self.daily_tasks.values().map(Vec::len).sum()
    }

    pub fn subtask_count(&self) -> usize {
        self.daily_tasks
            .values()
            .flatten()
            .map(|t| t.subtasks.len())
            .sum()
    }

    /// Restore structural invariants across every stored task and habit.
    pub fn normalize(&mut self) {
        for task in self.daily_tasks.values_mut().flatten() {
            task.normalize();
        }
        for habit in &mut self.habits {
            habit.dedup_dates();
        }
    }
}
