use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Risk classification used throughout Guardrails (C6). Unknown tools
/// default to `High` (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Broad category used by the Tool Selector (C5) to match step
/// descriptions against plausible tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Control,
    ReadOnly,
    Write,
    Execute,
    Network,
    Skill,
    Mcp,
    Delegate,
}

/// Name, description, schema and policy metadata for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub risk: RiskLevel,
    pub requires_approval: bool,
    pub timeout_secs: u64,
    pub category: ToolCategory,
}

/// An LLM-requested invocation of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Character limit before output is truncated with a marker (spec.md §3).
pub const MAX_TOOL_OUTPUT_CHARS: usize = 10_000;

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: truncate(output.into()),
            error: None,
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn err(call_id: impl Into<String>, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms: elapsed_ms,
        }
    }
}

/// Truncate output exceeding `MAX_TOOL_OUTPUT_CHARS`, appending a marker.
fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_TOOL_OUTPUT_CHARS {
        return text;
    }
    let truncated: String = text.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
    format!("{truncated}\n[truncated: output exceeded {MAX_TOOL_OUTPUT_CHARS} characters]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        let r = ToolResult::ok("1", "hello", 5);
        assert_eq!(r.output, "hello");
    }

    #[test]
    fn long_output_truncated_with_marker() {
        let long = "x".repeat(MAX_TOOL_OUTPUT_CHARS + 500);
        let r = ToolResult::ok("1", long, 5);
        assert!(r.output.contains("[truncated"));
        assert!(r.output.chars().count() < MAX_TOOL_OUTPUT_CHARS + 500);
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }
}
