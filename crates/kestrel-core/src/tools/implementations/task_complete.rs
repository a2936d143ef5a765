//! task_complete / step_complete - control tools the model calls to signal
//! it believes the current step or the whole task is finished (spec.md
//! §4.7 step 9). The loop intercepts these before dispatch the same way it
//! intercepts `ask_human`; they never reach Guardrails.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{ToolContext, ToolResult};
use crate::types::tool::RiskLevel;

pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Signal that the overall goal has been achieved and provide the final result."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Summary of what was accomplished"
                }
            },
            "required": ["result"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error_with_code(
            "blocked_by_policy",
            "task_complete must be intercepted by the task loop before execution",
        )
    }
}

pub struct StepCompleteTool;

#[async_trait]
impl Tool for StepCompleteTool {
    fn name(&self) -> &str {
        "step_complete"
    }

    fn description(&self) -> &str {
        "Signal that the current plan step is finished and provide its result."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Summary of what this step produced"
                }
            },
            "required": ["result"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error_with_code(
            "blocked_by_policy",
            "step_complete must be intercepted by the task loop before execution",
        )
    }
}
