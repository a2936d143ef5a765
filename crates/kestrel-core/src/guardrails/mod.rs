//! Multi-layer safety system for agent tool execution (spec.md §4.6).
//!
//! Layers, checked in order:
//!   1. Budget enforcement — iterations, tool calls, tokens
//!   2. Blocklist — destructive patterns always rejected
//!   3. Approval gate — risk level vs. the task's auto-approve threshold,
//!      with a per-tool always-approve override and pattern memory
//!   4. Rate limiting — same tool called too fast, likely a loop; forces
//!      approval rather than an outright block so a human can still let
//!      a fast-but-legitimate sequence through

pub mod approval_memory;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::task::{GuardrailConfig, TaskCounters};
use crate::types::tool::RiskLevel;

pub use approval_memory::ApprovalMemory;

/// Patterns that are always rejected, independent of risk level or config.
static BLOCKED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+-rf\s+/",
        r"rm\s+-rf\s+\*",
        r"rmdir\s+/s\s+/q",
        r"del\s+/f\s+/s\s+/q",
        r"format\s+[a-zA-Z]:",
        r"DROP\s+DATABASE",
        r"DROP\s+SCHEMA.*CASCADE",
        r"TRUNCATE\s+.*CASCADE",
        r"shutdown\s+(-h|/s)",
        r"mkfs\.",
        r"dd\s+if=.*of=/dev/",
        r":\(\)\s*\{\s*:\|:&\s*\}",
        r"curl.*-d.*password",
        r"wget.*password",
        r"cat\s+/etc/(passwd|shadow)",
        r"cat\s+.*\.env",
        r"nc\s+-e",
        r"ncat\s+-e",
        r"bash\s+-i\s+>&\s+/dev/tcp",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("valid blocklist regex"))
    .collect()
});

/// Fallback risk lookup for tools the registry can't be consulted for
/// synchronously. Unknown tools default to `High` (spec.md §4.1).
fn fallback_risk(tool_name: &str) -> RiskLevel {
    match tool_name {
        "code_execute" => RiskLevel::High,
        "web_search" | "file_read" | "list_files" | "memory_search" | "ask_human"
        | "task_complete" | "step_complete" => RiskLevel::Low,
        "file_write" | "api_call" | "database_query" => RiskLevel::Medium,
        "database_mutate" => RiskLevel::Critical,
        _ => RiskLevel::High,
    }
}

/// Outcome of a guardrail check against a prospective tool call.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Proceed without human involvement.
    AutoApprove,
    /// Reject outright; never reaches a human.
    Blocked { reason: String },
    /// Proceed, but only after a human approves (spec.md §4.6).
    RequiresApproval { reason: String, risk: RiskLevel },
}

pub struct Guardrails {
    approval_memory: Arc<ApprovalMemory>,
    /// task_id -> tool_name -> recent call timestamps, for rate limiting.
    call_timestamps: DashMap<(String, String), Vec<Instant>>,
}

impl Guardrails {
    pub fn new(approval_memory: Arc<ApprovalMemory>) -> Self {
        Self {
            approval_memory,
            call_timestamps: DashMap::new(),
        }
    }

    /// Returns an error message if the task has exceeded its resource
    /// budget, `None` if it still has headroom.
    pub fn check_budget(&self, counters: &TaskCounters, config: &GuardrailConfig) -> Option<String> {
        if counters.iterations >= config.max_iterations {
            return Some(format!(
                "Iteration limit reached ({}/{}); the task has been running too long",
                counters.iterations, config.max_iterations
            ));
        }
        if counters.tool_calls >= config.max_tool_calls {
            return Some(format!(
                "Tool call limit reached ({}/{}); too many tools invoked",
                counters.tool_calls, config.max_tool_calls
            ));
        }
        if counters.tokens_used >= config.max_tokens {
            return Some(format!(
                "Token budget exhausted ({}/{})",
                counters.tokens_used, config.max_tokens
            ));
        }
        None
    }

    /// Unconditional blocklist check, used as a fast pre-hook rejection
    /// independent of risk/approval state.
    pub fn check_blocklist(&self, _tool_name: &str, params: &Value) -> Option<String> {
        let args_str = params.to_string();
        BLOCKED_PATTERNS
            .iter()
            .find(|p| p.is_match(&args_str))
            .map(|p| format!("Dangerous pattern detected: {}", p.as_str()))
    }

    fn check_rate_limit(&self, task_id: &str, tool_name: &str) -> Option<String> {
        let key = (task_id.to_string(), tool_name.to_string());
        let now = Instant::now();
        let mut entry = self.call_timestamps.entry(key).or_default();
        entry.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        entry.push(now);

        if entry.len() > 20 {
            Some(format!(
                "Rate limit: '{tool_name}' called {} times in 60s; possible infinite loop",
                entry.len()
            ))
        } else {
            None
        }
    }

    /// Full approval decision for a prospective call: blocklist, then
    /// always-approve override, then risk threshold with pattern-memory
    /// auto-approval, then rate limiting.
    pub fn evaluate(
        &self,
        task_id: &str,
        workspace_id: &str,
        tool_name: &str,
        params: &Value,
        risk: RiskLevel,
        config: &GuardrailConfig,
    ) -> Decision {
        if let Some(reason) = self.check_blocklist(tool_name, params) {
            return Decision::Blocked { reason };
        }

        if config
            .always_approve
            .iter()
            .any(|name| name == tool_name)
        {
            return Decision::RequiresApproval {
                reason: format!("Tool '{tool_name}' is configured to always require approval"),
                risk,
            };
        }

        if risk == RiskLevel::Critical {
            return Decision::RequiresApproval {
                reason: format!("Tool '{tool_name}' has critical risk; always requires approval"),
                risk,
            };
        }

        if risk > config.auto_approve_risk {
            return if self
                .approval_memory
                .should_auto_approve(workspace_id, tool_name, params)
                .is_some()
            {
                Decision::AutoApprove
            } else {
                Decision::RequiresApproval {
                    reason: format!(
                        "Tool '{tool_name}' risk ({risk:?}) exceeds auto-approve threshold ({:?})",
                        config.auto_approve_risk
                    ),
                    risk,
                }
            };
        }

        if let Some(reason) = self.check_rate_limit(task_id, tool_name) {
            return Decision::RequiresApproval { reason, risk };
        }

        Decision::AutoApprove
    }

    /// Risk lookup used when the tool registry isn't consulted directly.
    pub fn risk_for(tool_name: &str) -> RiskLevel {
        fallback_risk(tool_name)
    }

    pub fn approval_memory(&self) -> &Arc<ApprovalMemory> {
        &self.approval_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> GuardrailConfig {
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
    fn blocklist_rejects_destructive_command() {
        let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));
        let reason = guardrails.check_blocklist("code_execute", &json!({"command": "rm -rf /"}));
        assert!(reason.is_some());
    }

    #[test]
    fn budget_flags_iteration_limit() {
        let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));
        let counters = TaskCounters {
            iterations: 10,
            tool_calls: 0,
            tokens_used: 0,
        };
        assert!(guardrails.check_budget(&counters, &config()).is_some());
    }

    #[test]
    fn medium_risk_requires_approval_under_low_threshold() {
        let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));
        let decision = guardrails.evaluate(
            "t1",
            "ws1",
            "file_write",
            &json!({"file_path": "/tmp/x"}),
            RiskLevel::Medium,
            &config(),
        );
        assert!(matches!(decision, Decision::RequiresApproval { .. }));
    }

    #[test]
    fn critical_risk_always_requires_approval_even_with_high_threshold() {
        let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));
        let mut cfg = config();
        cfg.auto_approve_risk = RiskLevel::Critical;
        let decision = guardrails.evaluate(
            "t1",
            "ws1",
            "database_mutate",
            &json!({}),
            RiskLevel::Critical,
            &cfg,
        );
        assert!(matches!(decision, Decision::RequiresApproval { .. }));
    }

    #[test]
    fn rate_limit_requires_approval_after_twenty_calls_in_a_minute() {
        let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));
        let cfg = config();
        for _ in 0..20 {
            guardrails.evaluate(
                "t1", "ws1", "file_read", &json!({}), RiskLevel::Low, &cfg,
            );
        }
        let decision = guardrails.evaluate("t1", "ws1", "file_read", &json!({}), RiskLevel::Low, &cfg);
        assert!(matches!(decision, Decision::RequiresApproval { .. }));
    }
}
