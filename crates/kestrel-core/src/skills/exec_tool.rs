//! Wraps a stored executable skill as a dynamic `Tool`, dispatching
//! execution to the external sandbox RPC (spec.md §4.11).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::sandbox::{ResourceLimits, SandboxClient, SandboxRunRequest};
use super::skill::SkillRecord;
use crate::tools::registry::{Tool, ToolContext, ToolResult};
use crate::types::tool::RiskLevel;

pub struct SkillExecTool {
    record: SkillRecord,
    sandbox: Arc<dyn SandboxClient>,
}

impl SkillExecTool {
    pub fn new(record: SkillRecord, sandbox: Arc<dyn SandboxClient>) -> Self {
        Self { record, sandbox }
    }
}

#[async_trait]
impl Tool for SkillExecTool {
    fn name(&self) -> &str {
        &self.record.name
    }

    fn description(&self) -> &str {
        &self.record.description
    }

    fn parameters_schema(&self) -> Value {
        self.record.parameters_schema.clone()
    }

    fn risk(&self) -> RiskLevel {
        self.record.risk()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let request = SandboxRunRequest {
            skill_path: self.record.name.clone(),
            function: "run".to_string(),
            args: params,
            resource_limits: ResourceLimits::default(),
            allowed_domains: Vec::new(),
            allowed_paths: Vec::new(),
        };

        match self.sandbox.run(request, &|_status| {}).await {
            Ok(result) if result.ok => ToolResult {
                output: result.output,
                is_error: false,
            },
            Ok(result) => ToolResult {
                output: result.error.unwrap_or_else(|| "skill execution failed".to_string()),
                is_error: true,
            },
            Err(e) => ToolResult {
                output: format!("sandbox dispatch failed: {e}"),
                is_error: true,
            },
        }
    }
}

/// Register every persisted executable skill for a workspace as a tool.
pub async fn register_skill_tools(
    records: Vec<SkillRecord>,
    sandbox: Arc<dyn SandboxClient>,
    registry: &crate::tools::ToolRegistry,
) {
    for record in records {
        let tool = Arc::new(SkillExecTool::new(record, sandbox.clone()));
        registry.register(tool).await;
    }
}
