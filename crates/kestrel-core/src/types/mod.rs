//! Core data model: Task, Plan/Step, Tool definitions, Approvals, Events,
//! Branches. Grounded on the shapes the teacher uses for its own agent
//! state (`agent/loop_events.rs`, `agent/subagent/types.rs`,
//! `plan/manager.rs`, `tools/registry.rs`), generalized from a single
//! chat session to an autonomous task.

pub mod approval;
pub mod automation;
pub mod branch;
pub mod event;
pub mod plan;
pub mod task;
pub mod tool;

pub use approval::{ApprovalPattern, ApprovalRequest, ApprovalStatus};
pub use automation::{
    AutomationStatus, CronJob, DaemonConfig, DaemonState, DaemonType, InterruptSeverity,
    InterruptSignal, Observation, WebhookEndpoint,
};
pub use branch::{Branch, BranchStatus};
pub use event::{Event, EventEnvelope};
pub use plan::{Plan, Step, StepStatus};
pub use task::{GuardrailConfig, Task, TaskCounters, TaskStatus};
pub use tool::{RiskLevel, ToolCall, ToolCategory, ToolDefinition, ToolResult};
