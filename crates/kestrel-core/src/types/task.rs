use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::approval::ApprovalRequest;
use super::plan::Plan;
use crate::types::tool::RiskLevel;

/// Lifecycle status of a `Task`. Terminal states (`Complete`, `Failed`,
/// `Cancelled`) never transition further — enforced by `Task::transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planning,
    Executing,
    Observing,
    Reflecting,
    WaitingApproval,
    Paused,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Per-task guardrail budgets, defaulting from `config::GuardrailDefaults`
/// but overridable per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub max_iterations: u32,
    pub max_tool_calls: u32,
    pub max_tokens: u64,
    pub auto_approve_risk: RiskLevel,
    /// Tool names that always require human approval regardless of risk.
    #[serde(default)]
    pub always_approve: Vec<String>,
    /// Extra blocklist patterns beyond the built-in set, per workspace.
    #[serde(default)]
    pub extra_blocked_patterns: Vec<String>,
}

impl From<&crate::config::GuardrailDefaults> for GuardrailConfig {
    fn from(d: &crate::config::GuardrailDefaults) -> Self {
        Self {
            max_iterations: d.max_iterations,
            max_tool_calls: d.max_tool_calls,
            max_tokens: d.max_tokens,
            auto_approve_risk: d.auto_approve_risk,
            always_approve: Vec::new(),
            extra_blocked_patterns: Vec::new(),
        }
    }
}

/// Running counters the loop increments as a task progresses; checked
/// against `GuardrailConfig` on every iteration (spec.md §4.7 step 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounters {
    pub iterations: u32,
    pub tool_calls: u32,
    pub tokens_used: u64,
}

/// The atomic unit of autonomous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub conversation_id: Option<String>,

    pub goal: String,
    pub plan: Option<Plan>,
    pub guardrails: GuardrailConfig,
    pub counters: TaskCounters,
    pub result: Option<String>,
    pub error: Option<String>,

    pub status: TaskStatus,

    pub parent_task_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Runtime-only: not persisted verbatim, rehydrated from
    /// `agent_session_messages` on resume.
    #[serde(skip)]
    pub pending_approval: Option<ApprovalRequest>,
}

impl Task {
    pub fn new(
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        goal: impl Into<String>,
        guardrails: GuardrailConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            conversation_id: None,
            goal: goal.into(),
            plan: None,
            guardrails,
            counters: TaskCounters::default(),
            result: None,
            error: None,
            status: TaskStatus::Planning,
            parent_task_id: None,
            created_at: now,
            updated_at: now,
            pending_approval: None,
        }
    }

    /// Move to a new status, rejecting any transition out of a terminal
    /// status (testable property in spec.md §8).
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "task {} is terminal ({:?}); cannot transition to {:?}",
                self.id, self.status, next
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.error = Some(reason);
        self.status = TaskStatus::Failed;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
        self.status = TaskStatus::Complete;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardrails() -> GuardrailConfig {
        GuardrailConfig {
            max_iterations: 10,
            max_tool_calls: 10,
            max_tokens: 1000,
            auto_approve_risk: RiskLevel::Low,
            always_approve: Vec::new(),
            extra_blocked_patterns: Vec::new(),
        }
    }

    #[test]
    fn terminal_status_never_transitions() {
        let mut task = Task::new("u", "w", "goal", guardrails());
        task.fail("boom");
        assert!(task.status.is_terminal());
        assert!(task.transition(TaskStatus::Executing).is_err());
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn non_terminal_transition_succeeds() {
        let mut task = Task::new("u", "w", "goal", guardrails());
        assert!(task.transition(TaskStatus::Executing).is_ok());
        assert_eq!(task.status, TaskStatus::Executing);
    }
}
