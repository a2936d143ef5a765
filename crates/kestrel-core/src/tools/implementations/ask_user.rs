//! ask_human - pause the task and request input from a person.
//!
//! This is a control tool: the loop (C8) intercepts calls to it before
//! they reach the registry and raises an `ApprovalRequest`-shaped pause
//! instead of executing it directly. If a call reaches `execute` here,
//! the loop failed to intercept it.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{ToolContext, ToolResult};
use crate::types::tool::RiskLevel;

pub struct AskUserQuestionTool;

#[async_trait]
impl Tool for AskUserQuestionTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the operator a clarifying question and pause until they respond. \
         Use sparingly, only when the goal genuinely cannot proceed without input."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to show the operator"
                },
                "options": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional list of suggested answers"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error_with_code(
            "blocked_by_policy",
            "ask_human must be intercepted by the task loop before execution",
        )
    }
}
