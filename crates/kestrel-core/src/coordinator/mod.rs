//! Coordinator (spec.md §4.8): named specialists, fractional-budget
//! delegation, and bounded parallel fan-out that never raises.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::tools::ToolRegistry;
use crate::types::task::Task;
use crate::types::tool::RiskLevel;

/// Maximum children a single `delegate_parallel` call will launch; excess
/// requests are dropped and logged rather than silently truncating the
/// count the caller sees.
pub const MAX_PARALLEL_DELEGATES: usize = 5;

/// Parent wall-time is halved for a child, capped at this ceiling.
pub const MAX_CHILD_WALL_TIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialistKind {
    Researcher,
    Coder,
    Analyst,
    Reviewer,
    Explorer,
}

impl SpecialistKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Coder => "coder",
            Self::Analyst => "analyst",
            Self::Reviewer => "reviewer",
            Self::Explorer => "explorer",
        }
    }

    /// Tool names this specialist is allowed, used to build a filtered
    /// registry view via `ToolRegistry::filter`.
    pub fn allowed_tools(self) -> &'static [&'static str] {
        match self {
            Self::Researcher => &["file_read", "list_files", "web_search", "web_fetch", "task_complete"],
            Self::Coder => &["file_read", "file_write", "list_files", "bash", "task_complete", "step_complete"],
            Self::Analyst => &["file_read", "list_files", "bash", "task_complete"],
            Self::Reviewer => &["file_read", "list_files", "task_complete"],
            Self::Explorer => &["file_read", "list_files", "task_complete"],
        }
    }

    pub fn persona_preamble(self) -> &'static str {
        match self {
            Self::Researcher => "You are a research specialist. Gather and synthesize information; do not modify files.",
            Self::Coder => "You are a coding specialist. Implement the requested change directly and verify it.",
            Self::Analyst => "You are an analysis specialist. Investigate the codebase and report findings precisely.",
            Self::Reviewer => "You are a review specialist. Critically evaluate the given work for correctness and risk.",
            Self::Explorer => "You are an exploration specialist. Map out unfamiliar parts of the codebase systematically.",
        }
    }
}

/// Everything a child task needs to run independently of its parent's
/// in-memory state.
pub struct ChildTaskSpec {
    pub parent_task_id: String,
    pub goal: String,
    pub specialist: SpecialistKind,
    pub token_budget: u64,
    pub wall_time: Duration,
    pub registry: ToolRegistry,
    pub auto_approve_risk: RiskLevel,
}

/// Result of a delegated child task. Always constructed, never a
/// `Result` — per spec.md §4.8, child failures become a structured
/// string here rather than propagating as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub specialist: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl SubAgentResult {
    fn failed(specialist: SpecialistKind, message: impl Into<String>) -> Self {
        Self {
            specialist: specialist.name().to_string(),
            success: false,
            output: String::new(),
            error: Some(message.into()),
        }
    }
}

/// Runs one child task to completion. Implemented by the agent loop (C8);
/// the coordinator depends only on this trait so it can be built and
/// tested before the loop exists.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, spec: ChildTaskSpec) -> SubAgentResult;
}

pub struct Coordinator;

impl Coordinator {
    pub fn new() -> Self {
        Self
    }

    fn child_spec(
        &self,
        parent: &Task,
        goal: String,
        specialist: SpecialistKind,
        base_registry: &ToolRegistry,
    ) -> ChildTaskSpec {
        let token_budget = parent.guardrails.max_tokens / 3;
        let wall_time = (MAX_CHILD_WALL_TIME / 2).min(MAX_CHILD_WALL_TIME);
        ChildTaskSpec {
            parent_task_id: parent.id.clone(),
            goal,
            specialist,
            token_budget,
            wall_time,
            registry: base_registry.filter(specialist.allowed_tools().iter().copied()),
            auto_approve_risk: parent.guardrails.auto_approve_risk,
        }
    }

    /// Delegates a single goal to a specialist, running it via `runner`.
    pub async fn delegate(
        &self,
        parent: &Task,
        goal: impl Into<String>,
        specialist: SpecialistKind,
        base_registry: &ToolRegistry,
        runner: &dyn TaskRunner,
    ) -> SubAgentResult {
        let spec = self.child_spec(parent, goal.into(), specialist, base_registry);
        run_guarded(runner, spec).await
    }

    /// Runs up to `MAX_PARALLEL_DELEGATES` children concurrently. Extra
    /// requests beyond the cap are dropped with a logged warning rather
    /// than silently running more than the bound allows. Never raises:
    /// every child, including ones that panic, yields a `SubAgentResult`.
    pub async fn delegate_parallel(
        &self,
        parent: &Task,
        children: Vec<(String, SpecialistKind)>,
        base_registry: &ToolRegistry,
        runner: &dyn TaskRunner,
    ) -> Vec<SubAgentResult> {
        let total = children.len();
        if total > MAX_PARALLEL_DELEGATES {
            tracing::warn!(
                requested = total,
                cap = MAX_PARALLEL_DELEGATES,
                "delegate_parallel: dropping requests beyond the fan-out cap"
            );
        }

        let specs: Vec<ChildTaskSpec> = children
            .into_iter()
            .take(MAX_PARALLEL_DELEGATES)
            .map(|(goal, specialist)| self.child_spec(parent, goal, specialist, base_registry))
            .collect();

        let futures = specs.into_iter().map(|spec| run_guarded(runner, spec));
        futures::future::join_all(futures).await
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a child through `runner`, converting a panic into a structured
/// failure result instead of unwinding into the caller.
async fn run_guarded(runner: &dyn TaskRunner, spec: ChildTaskSpec) -> SubAgentResult {
    let specialist = spec.specialist;
    match AssertUnwindSafe(runner.run(spec)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => SubAgentResult::failed(specialist, "sub-agent task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::GuardrailConfig;

    struct AlwaysSucceeds;

    #[async_trait]
    impl TaskRunner for AlwaysSucceeds {
        async fn run(&self, spec: ChildTaskSpec) -> SubAgentResult {
            SubAgentResult {
                specialist: spec.specialist.name().to_string(),
                success: true,
                output: format!("did: {}", spec.goal),
                error: None,
            }
        }
    }

    struct AlwaysPanics;

    #[async_trait]
    impl TaskRunner for AlwaysPanics {
        async fn run(&self, _spec: ChildTaskSpec) -> SubAgentResult {
            panic!("boom");
        }
    }

    fn parent_task() -> Task {
        Task::new(
            "u1",
            "w1",
            "parent goal",
            GuardrailConfig {
                max_iterations: 10,
                max_tool_calls: 10,
                max_tokens: 3000,
                auto_approve_risk: RiskLevel::Low,
                always_approve: Vec::new(),
                extra_blocked_patterns: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn delegate_applies_fractional_budget() {
        let parent = parent_task();
        let registry = ToolRegistry::new();
        let coordinator = Coordinator::new();
        let runner = AlwaysSucceeds;

        let result = coordinator
            .delegate(&parent, "investigate", SpecialistKind::Researcher, &registry, &runner)
            .await;
        assert!(result.success);
        assert_eq!(result.output, "did: investigate");
    }

    #[tokio::test]
    async fn delegate_parallel_caps_fan_out() {
        let parent = parent_task();
        let registry = ToolRegistry::new();
        let coordinator = Coordinator::new();
        let runner = AlwaysSucceeds;

        let children: Vec<_> = (0..8)
            .map(|i| (format!("task {i}"), SpecialistKind::Explorer))
            .collect();
        let results = coordinator
            .delegate_parallel(&parent, children, &registry, &runner)
            .await;
        assert_eq!(results.len(), MAX_PARALLEL_DELEGATES);
    }

    #[tokio::test]
    async fn panicking_child_becomes_structured_failure() {
        let parent = parent_task();
        let registry = ToolRegistry::new();
        let coordinator = Coordinator::new();
        let runner = AlwaysPanics;

        let result = coordinator
            .delegate(&parent, "goal", SpecialistKind::Coder, &registry, &runner)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("panicked"));
    }
}
