//! Reconciliation engine: merge one incoming [`SyncPayload`] into local state.
//!
//! Ids are device-local, so entities are matched by name:
//! - tags by case-insensitive name
//! - tasks and subtasks by trimmed, case-insensitive title within a date bucket
//! - habits by trimmed, case-insensitive name
//!
//! The merge only adds and updates. Nothing already present locally is ever
//! removed, and matched tasks only take the incoming `completed` flag.
//!
//! Merging is split in two steps. [`merge_incoming`] is pure and returns a
//! [`MergeResult`] holding the merged dataset plus any settings that differ.
//! [`MergeResult::finish`] then asks a caller-supplied confirmation whether to
//! apply those settings and produces the final state and [`MergeOutcome`].

use crate::ids::{IdMinter, RandomIds};
use crate::model::{Habit, LocalState, Tag, Task};
use crate::payload::SyncPayload;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

/// A setting that can be carried over from the incoming payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKind {
    DarkMode,
    Theme,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DarkMode => f.write_str("dark mode"),
            Self::Theme => f.write_str("theme"),
        }
    }
}

fn join_and(kinds: &[SettingKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Incoming settings that differ from the local ones. Never applied without
/// confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDiff {
    pub dark_mode: Option<bool>,
    pub theme: Option<String>,
}

impl SettingsDiff {
    fn compute(local: &LocalState, incoming: &SyncPayload) -> Self {
        let dark_mode = incoming
            .dark_mode
            .filter(|&dark| dark != local.settings.dark_mode);
        let theme = incoming
            .theme
            .as_ref()
            .filter(|t| !t.is_empty() && **t != local.settings.theme)
            .cloned();
        Self { dark_mode, theme }
    }

    pub fn is_empty(&self) -> bool {
        self.dark_mode.is_none() && self.theme.is_none()
    }

    pub fn kinds(&self) -> Vec<SettingKind> {
        let mut kinds = Vec::new();
        if self.dark_mode.is_some() {
            kinds.push(SettingKind::DarkMode);
        }
        if self.theme.is_some() {
            kinds.push(SettingKind::Theme);
        }
        kinds
    }

    /// Question to put to the user before applying.
    pub fn prompt(&self) -> String {
        format!(
            "Do you want to update your {} settings to match the imported data?",
            join_and(&self.kinds())
        )
    }

    fn apply(&self, state: &mut LocalState) -> Vec<SettingKind> {
        if let Some(dark) = self.dark_mode {
            state.settings.dark_mode = dark;
        }
        if let Some(theme) = &self.theme {
            state.settings.theme = theme.clone();
        }
        self.kinds()
    }
}

/// Change counters for one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub new_tasks: usize,
    pub new_subtasks: usize,
    pub new_tags: usize,
    pub new_habits: usize,
    pub updated_tasks: usize,
    /// Matched habits that gained completion dates or changed tag
    pub updated_habits: usize,
    pub updated_settings: Vec<SettingKind>,
}

impl MergeStats {
    pub fn entity_changes(&self) -> usize {
        self.new_tasks
            + self.new_subtasks
            + self.new_tags
            + self.new_habits
            + self.updated_tasks
            + self.updated_habits
    }

    pub fn is_empty(&self) -> bool {
        self.entity_changes() == 0 && self.updated_settings.is_empty()
    }

    /// One-line, user-facing description of what the merge did.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Sync completed! No new items were found - all data was already in sync."
                .to_string();
        }

        let counters = [
            (self.new_tasks, "new task(s)"),
            (self.updated_tasks, "updated task(s)"),
            (self.new_subtasks, "new subtask(s)"),
            (self.new_tags, "new tag(s)"),
            (self.new_habits, "new habit(s)"),
            (self.updated_habits, "updated habit(s)"),
        ];
        let mut parts: Vec<String> = counters
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, label)| format!("{n} {label}"))
            .collect();
        if !self.updated_settings.is_empty() {
            parts.push(format!("updated {}", join_and(&self.updated_settings)));
        }

        format!("Sync successful! Merged/Updated: {}.", parts.join(", "))
    }
}

/// Final result of a merge, after settings confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing changed: every incoming entity already existed and no settings
    /// were applied.
    NothingToMerge,
    Merged(MergeStats),
}

impl MergeOutcome {
    pub fn summary(&self) -> String {
        match self {
            Self::NothingToMerge => MergeStats::default().summary(),
            Self::Merged(stats) => stats.summary(),
        }
    }
}

/// Output of the pure merge step.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Merged dataset, settings not yet touched
    pub state: LocalState,
    pub stats: MergeStats,
    /// Incoming settings awaiting confirmation
    pub settings: SettingsDiff,
    /// Incoming tag id to local tag id
    pub tag_mapping: BTreeMap<String, String>,
}

impl MergeResult {
    /// Gate the settings diff on `confirm` and produce the final state.
    ///
    /// `confirm` is only called when some setting actually differs.
    pub fn finish(
        self,
        confirm: impl FnOnce(&SettingsDiff) -> bool,
    ) -> (LocalState, MergeOutcome) {
        let MergeResult {
            mut state,
            mut stats,
            settings,
            ..
        } = self;

        if !settings.is_empty() && confirm(&settings) {
            stats.updated_settings = settings.apply(&mut state);
        }

        let outcome = if stats.is_empty() {
            MergeOutcome::NothingToMerge
        } else {
            MergeOutcome::Merged(stats)
        };
        (state, outcome)
    }
}

/// Merge `incoming` into a copy of `local` using timestamp-random ids.
pub fn merge_incoming(local: &LocalState, incoming: &SyncPayload) -> MergeResult {
    merge_incoming_with(local, incoming, &RandomIds)
}

/// Merge `incoming` into a copy of `local`, minting new ids from `ids`.
pub fn merge_incoming_with(
    local: &LocalState,
    incoming: &SyncPayload,
    ids: &dyn IdMinter,
) -> MergeResult {
    let mut state = local.clone();
    let mut stats = MergeStats::default();

    let tag_mapping = merge_tags(&mut state.custom_tags, &incoming.custom_tags, ids, &mut stats);
    let remap = |tag: &Option<String>| -> Option<String> {
        tag.as_ref()
            .map(|t| tag_mapping.get(t).cloned().unwrap_or_else(|| t.clone()))
    };

    for (date, incoming_tasks) in &incoming.daily_tasks {
        if incoming_tasks.is_empty() {
            continue;
        }
        let bucket = state.daily_tasks.entry(date.clone()).or_default();
        for task in incoming_tasks.iter().filter(|t| !t.is_habit) {
            merge_task(bucket, task, &remap, ids, &mut stats);
        }
    }

    for habit in &incoming.habits {
        merge_habit(&mut state.habits, habit, &remap, ids, &mut stats);
    }

    let settings = SettingsDiff::compute(local, incoming);

    debug!(
        "Merged payload: {} new tasks, {} updated tasks, {} new subtasks, {} new tags, {} new habits, {} updated habits, settings pending: {:?}",
        stats.new_tasks,
        stats.updated_tasks,
        stats.new_subtasks,
        stats.new_tags,
        stats.new_habits,
        stats.updated_habits,
        settings.kinds()
    );

    MergeResult {
        state,
        stats,
        settings,
        tag_mapping,
    }
}

// ============================================================================
// Matching helpers
// ============================================================================

fn same_title(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Mint until the candidate is not already used in its scope.
fn fresh_id<'a>(
    mut mint: impl FnMut() -> String,
    taken: impl Iterator<Item = &'a str> + Clone,
) -> String {
    loop {
        let id = mint();
        if !taken.clone().any(|t| t == id) {
            return id;
        }
    }
}

// ============================================================================
// Tags
// ============================================================================

fn merge_tags(
    local: &mut Vec<Tag>,
    incoming: &[Tag],
    ids: &dyn IdMinter,
    stats: &mut MergeStats,
) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();

    for tag in incoming {
        let wanted = tag.name.to_lowercase();
        if let Some(existing) = local.iter().find(|t| t.name.to_lowercase() == wanted) {
            mapping.insert(tag.id.clone(), existing.id.clone());
            continue;
        }

        let id = fresh_id(|| ids.entity_id(), local.iter().map(|t| t.id.as_str()));
        mapping.insert(tag.id.clone(), id.clone());
        local.push(Tag {
            id,
            name: tag.name.clone(),
            color: tag.color.clone(),
        });
        stats.new_tags += 1;
    }

    mapping
}

// ============================================================================
// Tasks
// ============================================================================

fn adopt_subtask(
    incoming: &Task,
    parent: &Task,
    siblings: &[Task],
    remap: &impl Fn(&Option<String>) -> Option<String>,
    ids: &dyn IdMinter,
) -> Task {
    let id = fresh_id(
        || ids.subtask_id(&parent.id),
        siblings.iter().map(|s| s.id.as_str()),
    );
    let mut subtask = incoming.clone();
    subtask.id = id;
    subtask.parent_task_id = Some(parent.id.clone());
    subtask.tag = remap(&incoming.tag);
    subtask.subtasks.clear();
    subtask.is_habit = false;
    subtask.habit_id = None;
    if subtask.created_at.is_none() {
        subtask.created_at = parent.created_at;
    }
    subtask
}

fn merge_task(
    bucket: &mut Vec<Task>,
    incoming: &Task,
    remap: &impl Fn(&Option<String>) -> Option<String>,
    ids: &dyn IdMinter,
    stats: &mut MergeStats,
) {
    let existing = bucket
        .iter()
        .position(|t| !t.is_habit && same_title(&t.title, &incoming.title));

    let Some(index) = existing else {
        let id = fresh_id(|| ids.task_id(), bucket.iter().map(|t| t.id.as_str()));
        let mut task = incoming.clone();
        task.id = id;
        task.tag = remap(&incoming.tag);
        task.parent_task_id = None;
        task.subtasks = Vec::with_capacity(incoming.subtasks.len());
        for sub in &incoming.subtasks {
            let adopted = adopt_subtask(sub, &task, &task.subtasks, remap, ids);
            task.subtasks.push(adopted);
        }
        stats.new_tasks += 1;
        stats.new_subtasks += task.subtasks.len();
        bucket.push(task);
        return;
    };

    let task = &mut bucket[index];
    let mut changed = false;
    if task.completed != incoming.completed {
        task.completed = incoming.completed;
        changed = true;
    }

    for sub in &incoming.subtasks {
        match task
            .subtasks
            .iter()
            .position(|s| same_title(&s.title, &sub.title))
        {
            Some(i) => {
                let existing = &mut task.subtasks[i];
                if existing.completed != sub.completed {
                    existing.completed = sub.completed;
                    changed = true;
                }
            }
            None => {
                let adopted = adopt_subtask(sub, task, &task.subtasks, remap, ids);
                task.subtasks.push(adopted);
                stats.new_subtasks += 1;
                changed = true;
            }
        }
    }

    if changed {
        stats.updated_tasks += 1;
    }
}

// ============================================================================
// Habits
// ============================================================================

fn merge_habit(
    local: &mut Vec<Habit>,
    incoming: &Habit,
    remap: &impl Fn(&Option<String>) -> Option<String>,
    ids: &dyn IdMinter,
    stats: &mut MergeStats,
) {
    let tag = remap(&incoming.tag);

    let matched = local
        .iter()
        .position(|h| same_title(&h.name, &incoming.name));

    let Some(index) = matched else {
        let id = fresh_id(|| ids.entity_id(), local.iter().map(|h| h.id.as_str()));
        let mut habit = Habit {
            id,
            name: incoming.name.clone(),
            completed_dates: incoming.completed_dates.clone(),
            tag,
        };
        habit.dedup_dates();
        local.push(habit);
        stats.new_habits += 1;
        return;
    };

    let existing = &mut local[index];
    let mut known: HashSet<String> = existing.completed_dates.iter().cloned().collect();
    let before = existing.completed_dates.len();
    for date in &incoming.completed_dates {
        if known.insert(date.clone()) {
            existing.completed_dates.push(date.clone());
        }
    }
    let mut changed = existing.completed_dates.len() != before;

    if tag.is_some() && existing.tag != tag {
        existing.tag = tag;
        changed = true;
    }

    if changed {
        stats.updated_habits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use chrono::{NaiveDate, Utc};

    fn payload() -> SyncPayload {
        SyncPayload::empty()
    }

    fn merge(local: &LocalState, incoming: &SyncPayload) -> MergeResult {
        merge_incoming_with(local, incoming, &SequentialIds::new())
    }

    fn finish_declining(result: MergeResult) -> (LocalState, MergeOutcome) {
        result.finish(|_| false)
    }

    fn habit(id: &str, name: &str, dates: &[&str]) -> Habit {
        let mut h = Habit::new(id, name);
        h.completed_dates = dates.iter().map(|d| d.to_string()).collect();
        h
    }

    fn rich_state() -> LocalState {
        let mut state = LocalState::new();
        state.custom_tags.push(Tag::new("t1", "Work", "#3366ff"));
        state.custom_tags.push(Tag::new("t2", "Home", "#33ff66"));

        let mut walk = Task::new("1", "Walk dog");
        walk.tag = Some("t2".into());
        let trip = Task::new("2", "Plan trip")
            .with_subtask(Task::new("2-subtask-a", "Book hotel"))
            .with_subtask(Task::new("2-subtask-b", "Buy tickets"));
        state
            .daily_tasks
            .insert("2024-01-01".into(), vec![walk, trip]);
        state
            .daily_tasks
            .insert("2024-01-02".into(), vec![Task::new("3", "Write report")]);

        let mut meditate = habit("h1", "Meditate", &["2024-01-01"]);
        meditate.tag = Some("t1".into());
        state.habits.push(meditate);
        state
    }

    // ==================== Tags ====================

    #[test]
    fn test_tag_case_fold_maps_to_existing() {
        let mut local = LocalState::new();
        local.custom_tags.push(Tag::new("t1", "Work", "#ff0000"));
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("t9", "work", "#00ff00"));

        let result = merge(&local, &incoming);

        assert_eq!(result.tag_mapping.get("t9").map(String::as_str), Some("t1"));
        assert_eq!(result.stats.new_tags, 0);
        assert_eq!(result.state.custom_tags.len(), 1);
        // Existing tag keeps its local color
        assert_eq!(result.state.custom_tags[0].color, "#ff0000");
    }

    #[test]
    fn test_new_tag_gets_fresh_id() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("t9", "Errands", "#123456"));

        let result = merge(&local, &incoming);

        assert_eq!(result.stats.new_tags, 1);
        let tag = &result.state.custom_tags[0];
        assert_eq!(tag.id, "new-1");
        assert_eq!(tag.name, "Errands");
        assert_eq!(tag.color, "#123456");
        assert_eq!(result.tag_mapping["t9"], "new-1");
    }

    #[test]
    fn test_fresh_tag_id_avoids_existing_ids() {
        let mut local = LocalState::new();
        local.custom_tags.push(Tag::new("new-1", "Work", "#ff0000"));
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("x", "Play", "#00ff00"));

        let result = merge(&local, &incoming);

        assert_eq!(result.state.custom_tags[1].id, "new-2");
    }

    #[test]
    fn test_incoming_tags_differing_only_by_case_create_one_tag() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("a", "Gym", "#111111"));
        incoming.custom_tags.push(Tag::new("b", "gym", "#222222"));

        let result = merge(&local, &incoming);

        assert_eq!(result.stats.new_tags, 1);
        assert_eq!(result.tag_mapping["a"], result.tag_mapping["b"]);
    }

    #[test]
    fn test_task_tags_are_remapped() {
        let mut local = LocalState::new();
        local.custom_tags.push(Tag::new("t1", "Work", "#ff0000"));
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("t9", "work", "#ff0000"));
        let mut task = Task::new("x", "Report");
        task.tag = Some("t9".into());
        let mut sub = Task::new("y", "Draft");
        sub.tag = Some("t9".into());
        incoming
            .daily_tasks
            .insert("2024-01-01".into(), vec![task.with_subtask(sub)]);

        let result = merge(&local, &incoming);
        let merged = &result.state.daily_tasks["2024-01-01"][0];

        assert_eq!(merged.tag.as_deref(), Some("t1"));
        assert_eq!(merged.subtasks[0].tag.as_deref(), Some("t1"));
    }

    #[test]
    fn test_unknown_tag_reference_is_kept() {
        let local = LocalState::new();
        let mut incoming = payload();
        let mut task = Task::new("x", "Report");
        task.tag = Some("dangling".into());
        incoming.daily_tasks.insert("2024-01-01".into(), vec![task]);

        let result = merge(&local, &incoming);

        assert_eq!(
            result.state.daily_tasks["2024-01-01"][0].tag.as_deref(),
            Some("dangling")
        );
    }

    // ==================== Tasks ====================

    #[test]
    fn test_matched_task_updates_completion() {
        let mut local = LocalState::new();
        local
            .daily_tasks
            .insert("2024-01-01".into(), vec![Task::new("1", "Walk dog")]);
        let mut incoming = payload();
        let mut task = Task::new("x", "walk dog");
        task.completed = true;
        incoming.daily_tasks.insert("2024-01-01".into(), vec![task]);

        let result = merge(&local, &incoming);

        let bucket = &result.state.daily_tasks["2024-01-01"];
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].id, "1");
        assert!(bucket[0].completed);
        assert_eq!(result.stats.updated_tasks, 1);
        assert_eq!(result.stats.new_tasks, 0);
    }

    #[test]
    fn test_trimmed_case_insensitive_title_match() {
        let mut local = LocalState::new();
        local
            .daily_tasks
            .insert("2024-01-01".into(), vec![Task::new("1", "  buy milk ")]);
        let mut incoming = payload();
        let mut task = Task::new("x", "Buy Milk");
        task.completed = true;
        incoming.daily_tasks.insert("2024-01-01".into(), vec![task]);

        let result = merge(&local, &incoming);

        let bucket = &result.state.daily_tasks["2024-01-01"];
        assert_eq!(bucket.len(), 1);
        assert!(bucket[0].completed);
        // Local title is left as it was
        assert_eq!(bucket[0].title, "  buy milk ");
    }

    #[test]
    fn test_matched_task_only_takes_completion() {
        let mut local = LocalState::new();
        let mut mine = Task::new("1", "Walk dog");
        mine.time_spent = 10.0;
        local.daily_tasks.insert("2024-01-01".into(), vec![mine]);
        let mut incoming = payload();
        let mut theirs = Task::new("x", "Walk dog");
        theirs.time_spent = 99.0;
        theirs.tag = Some("t1".into());
        incoming.daily_tasks.insert("2024-01-01".into(), vec![theirs]);

        let result = merge(&local, &incoming);
        let task = &result.state.daily_tasks["2024-01-01"][0];

        assert_eq!(task.time_spent, 10.0);
        assert_eq!(task.tag, None);
        assert_eq!(result.stats.updated_tasks, 0);
    }

    #[test]
    fn test_new_task_gets_fresh_ids_and_namespaced_subtasks() {
        let local = LocalState::new();
        let mut incoming = payload();
        let task = Task::new("x", "Plan trip")
            .with_subtask(Task::new("x-1", "Book hotel"))
            .with_subtask(Task::new("x-2", "Buy tickets"));
        incoming.daily_tasks.insert("2024-01-01".into(), vec![task]);

        let result = merge(&local, &incoming);
        let task = &result.state.daily_tasks["2024-01-01"][0];

        assert_eq!(task.id, "new-1");
        assert_eq!(task.subtasks[0].id, "new-1-subtask-2");
        assert_eq!(task.subtasks[1].id, "new-1-subtask-3");
        for sub in &task.subtasks {
            assert_eq!(sub.parent_task_id.as_deref(), Some("new-1"));
        }
        assert_eq!(result.stats.new_tasks, 1);
        assert_eq!(result.stats.new_subtasks, 2);
    }

    #[test]
    fn test_matched_task_gains_missing_subtask() {
        let mut local = LocalState::new();
        let trip = Task::new("2", "Plan trip").with_subtask(Task::new("2-subtask-a", "Book hotel"));
        local.daily_tasks.insert("2024-01-01".into(), vec![trip]);
        let mut incoming = payload();
        let mut booked = Task::new("y-1", "book hotel ");
        booked.completed = true;
        let theirs = Task::new("y", "Plan trip")
            .with_subtask(booked)
            .with_subtask(Task::new("y-2", "Pack bags"));
        incoming.daily_tasks.insert("2024-01-01".into(), vec![theirs]);

        let result = merge(&local, &incoming);
        let trip = &result.state.daily_tasks["2024-01-01"][0];

        assert_eq!(trip.subtasks.len(), 2);
        assert!(trip.subtasks[0].completed);
        assert_eq!(trip.subtasks[1].title, "Pack bags");
        assert!(trip.subtasks[1].id.starts_with("2-subtask-"));
        assert_eq!(trip.subtasks[1].parent_task_id.as_deref(), Some("2"));
        assert_eq!(result.stats.new_subtasks, 1);
        // One updated task no matter how many subtasks changed
        assert_eq!(result.stats.updated_tasks, 1);
    }

    #[test]
    fn test_habit_projection_never_matches_plain_task() {
        let mut local = LocalState::new();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let projection = habit("h1", "Meditate", &[]).project_for(day);
        local
            .daily_tasks
            .insert("2024-01-01".into(), vec![projection]);
        let mut incoming = payload();
        let mut task = Task::new("x", "meditate");
        task.completed = true;
        incoming.daily_tasks.insert("2024-01-01".into(), vec![task]);

        let result = merge(&local, &incoming);
        let bucket = &result.state.daily_tasks["2024-01-01"];

        assert_eq!(bucket.len(), 2);
        assert!(!bucket[0].completed);
        assert_eq!(result.stats.new_tasks, 1);
    }

    #[test]
    fn test_incoming_habit_projections_are_skipped() {
        let local = LocalState::new();
        let mut incoming = payload();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        incoming.daily_tasks.insert(
            "2024-01-01".into(),
            vec![habit("h1", "Meditate", &["2024-01-01"]).project_for(day)],
        );

        let result = merge(&local, &incoming);

        assert_eq!(result.stats.new_tasks, 0);
        assert!(result.state.tasks_on("2024-01-01").is_empty());
    }

    #[test]
    fn test_empty_incoming_bucket_adds_nothing() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.daily_tasks.insert("2024-05-05".into(), Vec::new());

        let result = merge(&local, &incoming);

        assert!(!result.state.daily_tasks.contains_key("2024-05-05"));
    }

    #[test]
    fn test_local_only_data_is_preserved() {
        let local = rich_state();
        let mut incoming = payload();
        incoming
            .daily_tasks
            .insert("2024-03-03".into(), vec![Task::new("z", "Something new")]);

        let result = merge(&local, &incoming);

        for (date, tasks) in &local.daily_tasks {
            assert_eq!(&result.state.daily_tasks[date], tasks);
        }
        assert_eq!(result.state.habits, local.habits);
        assert_eq!(result.state.custom_tags, local.custom_tags);
    }

    #[test]
    fn test_merge_does_not_touch_inputs() {
        let local = rich_state();
        let local_before = local.clone();
        let mut incoming = SyncPayload::from_state(&rich_state(), Utc::now());
        incoming.daily_tasks.get_mut("2024-01-01").unwrap()[0].completed = true;
        let incoming_before = incoming.clone();

        let _ = merge(&local, &incoming);

        assert_eq!(local, local_before);
        assert_eq!(incoming, incoming_before);
    }

    // ==================== Habits ====================

    #[test]
    fn test_new_habit_created_with_dates() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming
            .habits
            .push(habit("h9", "Meditate", &["2024-01-01", "2024-01-02"]));

        let result = merge(&local, &incoming);

        assert_eq!(result.stats.new_habits, 1);
        let created = &result.state.habits[0];
        assert_eq!(created.id, "new-1");
        assert_eq!(created.completed_dates, vec!["2024-01-01", "2024-01-02"]);
    }

    #[test]
    fn test_matched_habit_unions_dates() {
        let mut local = LocalState::new();
        local
            .habits
            .push(habit("h1", "Meditate", &["2024-01-01", "2024-01-03"]));
        let mut incoming = payload();
        incoming
            .habits
            .push(habit("h9", " meditate", &["2024-01-02", "2024-01-03"]));

        let result = merge(&local, &incoming);
        let merged = &result.state.habits[0];

        assert_eq!(result.state.habits.len(), 1);
        assert_eq!(merged.id, "h1");
        assert_eq!(
            merged.completed_dates,
            vec!["2024-01-01", "2024-01-03", "2024-01-02"]
        );
        assert_eq!(result.stats.new_habits, 0);
        assert_eq!(result.stats.updated_habits, 1);
    }

    #[test]
    fn test_union_bound() {
        let cases: &[(&[&str], &[&str])] = &[
            (&["a", "b"], &["b", "c"]),
            (&["a", "b", "c"], &["a", "b", "c"]),
            (&[], &["x", "y"]),
            (&["x", "y"], &[]),
            (&["a"], &["b", "c", "d"]),
        ];

        for (mine, theirs) in cases {
            let mut local = LocalState::new();
            local.habits.push(habit("h1", "Run", mine));
            let mut incoming = payload();
            incoming.habits.push(habit("h2", "Run", theirs));

            let result = merge(&local, &incoming);
            let dates = &result.state.habits[0].completed_dates;

            let unique: HashSet<_> = dates.iter().collect();
            assert_eq!(unique.len(), dates.len(), "duplicates in {dates:?}");
            assert!(dates.len() >= mine.len().max(theirs.len()));
            assert!(dates.len() <= mine.len() + theirs.len());
            for d in mine.iter() {
                assert!(dates.iter().any(|x| x == d), "lost local date {d}");
            }
        }
    }

    #[test]
    fn test_matched_habit_tag_remapped() {
        let mut local = LocalState::new();
        local.custom_tags.push(Tag::new("t1", "Health", "#00ff00"));
        local.habits.push(habit("h1", "Meditate", &[]));
        let mut incoming = payload();
        incoming.custom_tags.push(Tag::new("t9", "health", "#00ff00"));
        let mut theirs = habit("h9", "Meditate", &[]);
        theirs.tag = Some("t9".into());
        incoming.habits.push(theirs);

        let result = merge(&local, &incoming);

        assert_eq!(result.state.habits[0].tag.as_deref(), Some("t1"));
        assert_eq!(result.stats.updated_habits, 1);
    }

    #[test]
    fn test_matched_habit_keeps_tag_when_incoming_has_none() {
        let mut local = LocalState::new();
        let mut mine = habit("h1", "Meditate", &[]);
        mine.tag = Some("t1".into());
        local.habits.push(mine);
        let mut incoming = payload();
        incoming.habits.push(habit("h9", "Meditate", &[]));

        let result = merge(&local, &incoming);

        assert_eq!(result.state.habits[0].tag.as_deref(), Some("t1"));
        assert_eq!(result.stats.updated_habits, 0);
    }

    #[test]
    fn test_new_habit_dates_deduplicated() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming
            .habits
            .push(habit("h9", "Read", &["2024-01-01", "2024-01-01"]));

        let result = merge(&local, &incoming);

        assert_eq!(result.state.habits[0].completed_dates, vec!["2024-01-01"]);
    }

    // ==================== Settings ====================

    #[test]
    fn test_settings_not_applied_without_confirmation() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.dark_mode = Some(true);
        incoming.theme = Some("ocean".into());

        let result = merge(&local, &incoming);
        assert_eq!(result.state.settings, local.settings);
        assert_eq!(
            result.settings.kinds(),
            vec![SettingKind::DarkMode, SettingKind::Theme]
        );
        assert_eq!(
            result.settings.prompt(),
            "Do you want to update your dark mode and theme settings to match the imported data?"
        );

        let (state, outcome) = finish_declining(result);
        assert!(!state.settings.dark_mode);
        assert_eq!(outcome, MergeOutcome::NothingToMerge);
    }

    #[test]
    fn test_settings_applied_on_confirmation() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.theme = Some("ocean".into());
        incoming.dark_mode = Some(false);

        let mut asked = None;
        let (state, outcome) = merge(&local, &incoming).finish(|diff| {
            asked = Some(diff.prompt());
            true
        });

        assert_eq!(
            asked.as_deref(),
            Some("Do you want to update your theme settings to match the imported data?")
        );
        assert_eq!(state.settings.theme, "ocean");
        let MergeOutcome::Merged(stats) = outcome else {
            panic!("expected merged outcome");
        };
        assert_eq!(stats.updated_settings, vec![SettingKind::Theme]);
    }

    #[test]
    fn test_confirmation_skipped_when_settings_match() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.dark_mode = Some(false);
        incoming.theme = Some("default".into());

        let (_, outcome) = merge(&local, &incoming).finish(|_| panic!("should not ask"));

        assert_eq!(outcome, MergeOutcome::NothingToMerge);
    }

    #[test]
    fn test_empty_theme_is_not_a_change() {
        let local = LocalState::new();
        let mut incoming = payload();
        incoming.theme = Some(String::new());

        let result = merge(&local, &incoming);

        assert!(result.settings.is_empty());
    }

    // ==================== Properties ====================

    #[test]
    fn test_idempotence() {
        let local = rich_state();
        let mut other = rich_state();
        other.daily_tasks.get_mut("2024-01-01").unwrap()[0].completed = true;
        other
            .daily_tasks
            .insert("2024-02-02".into(), vec![Task::new("9", "Dentist")]);
        other.custom_tags.push(Tag::new("t3", "Health", "#ff00ff"));
        other.habits.push(habit("h2", "Stretch", &["2024-01-05"]));
        other.settings.theme = "ocean".into();
        let incoming = SyncPayload::from_state(&other, Utc::now());

        let (once, first) = merge(&local, &incoming).finish(|_| true);
        assert!(matches!(first, MergeOutcome::Merged(_)));

        let (twice, second) = merge(&once, &incoming).finish(|_| true);
        assert_eq!(second, MergeOutcome::NothingToMerge);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_round_trip_into_empty_local() {
        let original = rich_state();
        let export = SyncPayload::from_state(&original, Utc::now());

        let result = merge(&LocalState::new(), &export);
        let (merged, _) = result.clone().finish(|_| true);

        assert_eq!(merged.task_count(), original.task_count());
        assert_eq!(merged.subtask_count(), original.subtask_count());
        assert_eq!(merged.custom_tags.len(), original.custom_tags.len());
        assert_eq!(merged.habits.len(), original.habits.len());

        for (date, tasks) in &original.daily_tasks {
            let got = &merged.daily_tasks[date];
            let titles: Vec<_> = got.iter().map(|t| &t.title).collect();
            let expected: Vec<_> = tasks.iter().map(|t| &t.title).collect();
            assert_eq!(titles, expected);
        }

        let walk = &merged.daily_tasks["2024-01-01"][0];
        let home = merged.tag(walk.tag.as_deref().unwrap()).unwrap();
        assert_eq!(home.name, "Home");
        assert_eq!(result.tag_mapping["t2"], home.id);

        assert_eq!(merged.habits[0].completed_dates, vec!["2024-01-01"]);
        assert_eq!(merged.settings, original.settings);
    }

    // ==================== Summary ====================

    #[test]
    fn test_summary_lists_nonzero_counters() {
        let stats = MergeStats {
            new_tasks: 2,
            new_tags: 1,
            ..Default::default()
        };
        assert_eq!(
            stats.summary(),
            "Sync successful! Merged/Updated: 2 new task(s), 1 new tag(s)."
        );
    }

    #[test]
    fn test_summary_with_settings() {
        let stats = MergeStats {
            updated_tasks: 1,
            updated_settings: vec![SettingKind::DarkMode, SettingKind::Theme],
            ..Default::default()
        };
        assert_eq!(
            stats.summary(),
            "Sync successful! Merged/Updated: 1 updated task(s), updated dark mode and theme."
        );
    }

    #[test]
    fn test_summary_nothing_to_merge() {
        assert_eq!(
            MergeOutcome::NothingToMerge.summary(),
            "Sync completed! No new items were found - all data was already in sync."
        );
    }
}
