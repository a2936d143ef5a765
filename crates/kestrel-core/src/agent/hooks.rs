//! Hook system for tool execution.
//!
//! Allows intercepting tool calls before and after execution for logging
//! and safety. The blocklist/approval logic itself lives in `guardrails`
//! (C6); `SafetyHook` here is the thin pre-hook adapter the registry calls
//! into, and `LoggingHook` is unconditional instrumentation.

use crate::tools::registry::{ToolContext, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Result of a hook execution.
#[derive(Debug)]
pub enum HookResult {
    Continue,
    Block { reason: String },
}

#[async_trait]
pub trait PreToolHook: Send + Sync {
    async fn before_execute(&self, name: &str, params: &Value, ctx: &ToolContext) -> HookResult;
}

#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_execute(
        &self,
        name: &str,
        params: &Value,
        result: &ToolResult,
        duration: Duration,
    ) -> HookResult;
}

/// Pre-hook adapter that consults Guardrails before every tool call.
/// Approval prompts are raised by the loop itself (C8), not here; this
/// hook only rejects calls Guardrails classifies as denied outright.
pub struct SafetyHook {
    guardrails: Arc<crate::guardrails::Guardrails>,
}

impl SafetyHook {
    pub fn new(guardrails: Arc<crate::guardrails::Guardrails>) -> Self {
        Self { guardrails }
    }
}

#[async_trait]
impl PreToolHook for SafetyHook {
    async fn before_execute(&self, name: &str, params: &Value, _ctx: &ToolContext) -> HookResult {
        match self.guardrails.check_blocklist(name, params) {
            Some(reason) => HookResult::Block { reason },
            None => HookResult::Continue,
        }
    }
}

/// Logging hook that logs all tool executions.
#[derive(Default)]
pub struct LoggingHook;

impl LoggingHook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PostToolHook for LoggingHook {
    async fn after_execute(
        &self,
        name: &str,
        _params: &Value,
        result: &ToolResult,
        duration: Duration,
    ) -> HookResult {
        tracing::info!(
            tool = name,
            duration_ms = duration.as_millis() as u64,
            is_error = result.is_error,
            output_len = result.output.len(),
            "Tool execution completed"
        );
        HookResult::Continue
    }
}
