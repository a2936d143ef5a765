use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::tool::RiskLevel;

/// Canonical event protocol for the task loop. Transport layers (event bus
/// subscribers, CLI demo runner) consume these and project them however
/// they like; persistence stores the `EventEnvelope` wrapper verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated { goal: String },
    PlanCreated { step_count: usize },
    PlanRevised { step_count: usize, revision: u32 },

    StepStarted { step_id: String, description: String },
    StepCompleted { step_id: String, result: String },
    StepFailed { step_id: String, error: String },

    ToolCallStarted { call_id: String, tool_name: String },
    ToolCallCompleted { call_id: String, success: bool },

    ApprovalRequested {
        approval_id: String,
        tool_name: String,
        arguments: Value,
        risk: RiskLevel,
    },
    ApprovalResolved { approval_id: String, approved: bool },

    TaskCompacted { messages_summarized: usize },
    TaskEscalated { reason: String },

    TaskCompleted { result: String },
    TaskFailed { error: String },
    TaskCancelled,

    /// Compact snapshot of a task's running cost/usage, emitted after each
    /// meaningful transition (spec.md §4.12).
    MetricsUpdate {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        estimated_cost_usd: f64,
        llm_calls: u64,
        tool_executions: u64,
        average_tool_duration_ms: f64,
        wall_time_secs: f64,
        compactions: u64,
        failovers: u64,
        verifier_runs: u64,
    },
}

/// Wire/persisted projection of an `Event`: the bus and `agent_sessions`
/// both key off `task_id` and an ordered `seq` (spec.md §4.10, §6).
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub task_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(task_id: impl Into<String>, seq: u64, event: Event) -> Self {
        Self {
            task_id: task_id.into(),
            seq,
            timestamp: Utc::now(),
            event,
        }
    }
}
