//! Id minting for entities created by a merge.
//!
//! Ids are not shared across devices, so every entity the reconciliation
//! engine adds gets a fresh local id. Minting sits behind [`IdMinter`] so
//! merges can be made deterministic in tests.

use chrono::Utc;
use rand::Rng;
use std::cell::Cell;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Source of fresh entity ids.
///
/// Implementations only need to produce ids that are unlikely to collide; the
/// merge engine re-mints if a candidate is already taken in its scope.
pub trait IdMinter {
    /// Id for a new tag or habit.
    fn entity_id(&self) -> String;

    /// Id for a new top-level task.
    fn task_id(&self) -> String {
        self.entity_id()
    }

    /// Id for a new subtask, namespaced under its parent.
    fn subtask_id(&self, parent_id: &str) -> String;
}

/// Timestamp-plus-random ids, the format the tracker itself uses.
///
/// - tags and habits: `"<millis>-<6 base36>"`
/// - tasks: `"<millis>-<6 base36>-<2 base36>"`
/// - subtasks: `"<parent>-subtask-<millis>-<6 base36>"`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

fn base36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}

fn millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl IdMinter for RandomIds {
    fn entity_id(&self) -> String {
        format!("{}-{}", millis(), base36(6))
    }

    fn task_id(&self) -> String {
        format!("{}-{}-{}", millis(), base36(6), base36(2))
    }

    fn subtask_id(&self, parent_id: &str) -> String {
        format!("{}-subtask-{}-{}", parent_id, millis(), base36(6))
    }
}

/// Predictable ids (`new-1`, `new-2`, ...) for tests and reproducible merges.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: Cell<u64>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        let n = self.next.get() + 1;
        self.next.set(n);
        n
    }
}

impl IdMinter for SequentialIds {
    fn entity_id(&self) -> String {
        format!("new-{}", self.bump())
    }

    fn subtask_id(&self, parent_id: &str) -> String {
        format!("{}-subtask-{}", parent_id, self.bump())
    }
}
