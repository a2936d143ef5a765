use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a speculative branch spawned to try an alternative
/// approach without mutating the parent task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Discarded,
}

/// A forked attempt on a task, tracked against its parent for later merge
/// or discard (spec.md §3, §4.9 ownership/branch table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub task_id: String,
    pub parent_task_id: String,
    pub description: String,
    pub status: BranchStatus,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(
        task_id: impl Into<String>,
        parent_task_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            parent_task_id: parent_task_id.into(),
            description: description.into(),
            status: BranchStatus::Active,
            created_at: Utc::now(),
        }
    }
}
