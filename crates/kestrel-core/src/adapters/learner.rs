//! Post-task lesson extraction (spec.md §4.13).
//!
//! After a task finishes, an LLM call turns the execution trace into a
//! handful of structured lessons, handed to an external knowledge
//! collaborator (vector store; out of this core's scope per spec.md §1).
//! Before a future task's planning, the same collaborator is queried for
//! lessons relevant to the new goal.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::{GenerationRequest, LlmProvider, Message, ToolGenerationRequest};
use crate::types::plan::StepStatus;
use crate::types::task::{Task, TaskStatus};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// A structured lesson extracted from one completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// "pattern", "pitfall", "shortcut", or "tool_usage".
    pub category: String,
    pub summary: String,
    pub details: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source_task_id: String,
}

fn default_true() -> bool {
    true
}

fn default_confidence() -> f32 {
    0.8
}

#[derive(Debug, Deserialize)]
struct RawLesson {
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    tools_used: Vec<String>,
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_category() -> String {
    "pattern".to_string()
}

/// Seam to the external knowledge store. A real implementation is a
/// vector store keyed by workspace; this core only calls through it.
#[async_trait::async_trait]
pub trait KnowledgeCollaborator: Send + Sync {
    async fn store(&self, workspace_id: &str, task_id: &str, lesson: &Lesson) -> anyhow::Result<()>;

    /// Top-`top_k` lessons (already-serialized `Lesson` JSON) relevant to
    /// `query`, most relevant first.
    async fn search(&self, workspace_id: &str, query: &str, top_k: usize) -> anyhow::Result<Vec<String>>;
}

pub struct TaskLearner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    knowledge: Arc<dyn KnowledgeCollaborator>,
}

impl TaskLearner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, knowledge: Arc<dyn KnowledgeCollaborator>) -> Self {
        Self { provider, model: model.into(), knowledge }
    }

    /// Analyzes a completed or failed task and stores the extracted
    /// lessons in the knowledge collaborator. No-op for any other status.
    pub async fn extract_lessons(&self, task: &Task) -> Vec<Lesson> {
        if !matches!(task.status, TaskStatus::Complete | TaskStatus::Failed) {
            return Vec::new();
        }

        let prompt = extraction_prompt(task);
        let raw = self.ask(&prompt).await;
        let lessons = parse_lessons(&raw, &task.id);

        for lesson in &lessons {
            if let Err(e) = self.knowledge.store(&task.workspace_id, &task.id, lesson).await {
                tracing::warn!(task_id = %task.id, error = %e, "learner: failed to store lesson");
            }
        }

        lessons
    }

    /// Formats past lessons relevant to `goal` as a prompt section, or an
    /// empty string if none are found.
    pub async fn enrich_context(&self, workspace_id: &str, goal: &str, max_lessons: usize) -> String {
        let query = format!("agent lessons for: {goal}");
        let results = match self.knowledge.search(workspace_id, &query, max_lessons).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(workspace_id = %workspace_id, error = %e, "learner: failed to retrieve lessons");
                return String::new();
            }
        };

        if results.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Lessons from Past Tasks".to_string(), String::new()];
        for content in &results {
            match serde_json::from_str::<Lesson>(content) {
                Ok(lesson) => {
                    let marker = if lesson.success { "+" } else { "!" };
                    lines.push(format!("{marker} {}", lesson.summary));
                    lines.push(format!("  {}", lesson.details));
                }
                Err(_) => lines.push(format!("- {}", truncate(content, 200))),
            }
        }
        lines.join("\n")
    }

    async fn ask(&self, prompt: &str) -> String {
        let request = ToolGenerationRequest {
            base: GenerationRequest {
                messages: vec![
                    Message::system("You extract structured lessons from agent task executions."),
                    Message::user(prompt.to_string()),
                ],
                model: self.model.clone(),
                temperature: 0.3,
                max_tokens: 2048,
            },
            tools: Vec::new(),
        };
        match self.provider.generate_with_tools(request).await {
            Ok(result) => result.content,
            Err(e) => {
                tracing::warn!(error = %e, "learner: provider call failed");
                String::new()
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn strip_fences(raw: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
    } else {
        raw.trim().to_string()
    }
}

fn extraction_prompt(task: &Task) -> String {
    let mut step_lines = Vec::new();
    let mut tool_calls = 0usize;
    if let Some(plan) = &task.plan {
        for step in &plan.steps {
            let icon = if step.status == StepStatus::Complete { "[ok]" } else { "[x]" };
            step_lines.push(format!("  {icon} {}", step.description));
            if let Some(result) = &step.result {
                step_lines.push(format!("     Result: {}", truncate(result, 200)));
            }
            if let Some(error) = &step.error {
                step_lines.push(format!("     Error: {}", truncate(error, 200)));
            }
            tool_calls += step.tool_calls.len();
        }
    }

    let error_section = task
        .error
        .as_ref()
        .map(|e| format!("\nTask Error: {e}"))
        .unwrap_or_default();

    format!(
        "You are analyzing a completed agent task to extract reusable lessons.\n\n\
         Task Goal: {goal}\n\
         Task Status: {status:?}\n\
         Total Steps: {total_steps}\n\
         Tool Calls Made: {tool_calls}\n\
         {error_section}\n\n\
         Step Execution Summary:\n{step_summary}\n\n\
         Extract 1-5 structured lessons from this execution. Focus on:\n\
         - Patterns that worked well and should be reused\n\
         - Pitfalls or mistakes to avoid in the future\n\
         - Shortcuts discovered (faster ways to accomplish things)\n\
         - Tool usage insights (which tools work best for what)\n\n\
         Respond with a JSON array of lesson objects, each with fields \
         category (pattern|pitfall|shortcut|tool_usage), summary, details, \
         tools_used, success, confidence, tags. Only output the JSON array, \
         no other text.",
        goal = task.goal,
        status = task.status,
        total_steps = task.plan.as_ref().map(|p| p.steps.len()).unwrap_or(0),
        tool_calls = tool_calls,
        error_section = error_section,
        step_summary = if step_lines.is_empty() {
            "(no steps recorded)".to_string()
        } else {
            step_lines.join("\n")
        },
    )
}

fn parse_lessons(raw: &str, task_id: &str) -> Vec<Lesson> {
    let cleaned = strip_fences(raw);
    let parsed: Result<Vec<RawLesson>, _> = serde_json::from_str(&cleaned);
    match parsed {
        Ok(raw_lessons) => raw_lessons
            .into_iter()
            .map(|r| Lesson {
                category: r.category,
                summary: r.summary,
                details: r.details,
                tools_used: r.tools_used,
                success: r.success,
                confidence: r.confidence,
                tags: r.tags,
                source_task_id: task_id.to_string(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "learner: failed to parse extracted lessons");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResult, StreamChunk, ToolGenerationResult};
    use crate::types::task::GuardrailConfig;
    use crate::types::tool::RiskLevel;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct StubProvider;

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn stream(&self, _request: GenerationRequest) -> LlmResult<mpsc::Receiver<StreamChunk>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn generate_with_tools(&self, _request: ToolGenerationRequest) -> LlmResult<ToolGenerationResult> {
            Ok(ToolGenerationResult { content: "[]".to_string(), tool_calls: Vec::new() })
        }
    }

    struct RecordingKnowledge {
        stored: Mutex<Vec<(String, String)>>,
        search_results: Vec<String>,
    }

    #[async_trait::async_trait]
    impl KnowledgeCollaborator for RecordingKnowledge {
        async fn store(&self, workspace_id: &str, task_id: &str, _lesson: &Lesson) -> anyhow::Result<()> {
            self.stored.lock().unwrap().push((workspace_id.to_string(), task_id.to_string()));
            Ok(())
        }

        async fn search(&self, _workspace_id: &str, _query: &str, top_k: usize) -> anyhow::Result<Vec<String>> {
            Ok(self.search_results.iter().take(top_k).cloned().collect())
        }
    }

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
    fn parses_fenced_lesson_array() {
        let raw = "```json\n[{\"category\":\"pitfall\",\"summary\":\"watch out\",\"details\":\"details here\",\"tools_used\":[\"bash\"],\"success\":false,\"confidence\":0.7,\"tags\":[\"t\"]}]\n```";
        let lessons = parse_lessons(raw, "task-1");
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].category, "pitfall");
        assert_eq!(lessons[0].source_task_id, "task-1");
    }

    #[test]
    fn unparseable_output_yields_no_lessons() {
        assert!(parse_lessons("not json", "task-1").is_empty());
    }

    #[tokio::test]
    async fn extract_lessons_skips_non_terminal_tasks() {
        let task = Task::new("u", "w", "goal", guardrails());
        let knowledge = Arc::new(RecordingKnowledge { stored: Mutex::new(Vec::new()), search_results: Vec::new() });
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider);
        let learner = TaskLearner::new(provider, "test-model", knowledge.clone());

        let lessons = learner.extract_lessons(&task).await;
        assert!(lessons.is_empty());
        assert!(knowledge.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn enrich_context_formats_retrieved_lessons() {
        let lesson = Lesson {
            category: "pattern".to_string(),
            summary: "use rg over grep".to_string(),
            details: "ripgrep respects gitignore".to_string(),
            tools_used: vec!["rg".to_string()],
            success: true,
            confidence: 0.9,
            tags: vec!["search".to_string()],
            source_task_id: "task-1".to_string(),
        };
        let knowledge = Arc::new(RecordingKnowledge {
            stored: Mutex::new(Vec::new()),
            search_results: vec![serde_json::to_string(&lesson).unwrap()],
        });
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider);
        let learner = TaskLearner::new(provider, "test-model", knowledge);

        let formatted = learner.enrich_context("w1", "fix search perf", 5).await;
        assert!(formatted.contains("use rg over grep"));
    }
}
