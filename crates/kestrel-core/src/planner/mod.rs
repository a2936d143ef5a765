//! Planner (spec.md §4.3): `create_plan`/`revise_plan` over an LLM JSON
//! contract, with fenced-code tolerance and a never-fail single-step
//! fallback on unparseable output.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::llm::{GenerationRequest, LlmProvider, Message, ToolGenerationRequest};
use crate::types::plan::{Plan, Step};
use crate::types::tool::ToolDefinition;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

#[derive(Debug, Deserialize)]
struct RawStep {
    id: String,
    description: String,
    #[serde(default)]
    expected_tools: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    steps: Vec<RawStep>,
    #[serde(default)]
    reasoning: String,
}

pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn create_plan(
        &self,
        goal: &str,
        available_tools: &[ToolDefinition],
        context: Option<&str>,
    ) -> Plan {
        let prompt = plan_prompt(goal, available_tools, context);
        let raw = self.ask(&prompt).await;
        parse_plan(goal, &raw)
    }

    /// Revises an existing plan given freeform observations from the
    /// steps executed so far. Completed step ids/status survive via
    /// `Plan::revise` regardless of what the model returns for them.
    pub async fn revise_plan(
        &self,
        plan: &Plan,
        observations: &str,
        available_tools: &[ToolDefinition],
    ) -> Plan {
        let prompt = revise_prompt(plan, observations, available_tools);
        let raw = self.ask(&prompt).await;

        let mut revised = plan.clone();
        match parse_raw_plan(&raw) {
            Some(parsed) => {
                revised.revise(to_steps(parsed.steps), parsed.reasoning);
            }
            None => {
                // Unparseable revision: keep the plan as-is rather than
                // failing the task, incrementing revision_count so callers
                // can see an attempt happened.
                revised.revision_count += 1;
            }
        }
        revised
    }

    async fn ask(&self, prompt: &str) -> String {
        let request = ToolGenerationRequest {
            base: GenerationRequest {
                messages: vec![
                    Message::system(SYSTEM_PROMPT),
                    Message::user(prompt.to_string()),
                ],
                model: self.model.clone(),
                temperature: 0.2,
                max_tokens: 2048,
            },
            tools: Vec::new(),
        };
        match self.provider.generate_with_tools(request).await {
            Ok(result) => result.content,
            Err(e) => {
                tracing::warn!(error = %e, "planner: provider call failed");
                String::new()
            }
        }
    }
}

const SYSTEM_PROMPT: &str = "You are a planning assistant for an autonomous coding agent. \
Respond with a single JSON object: {\"steps\": [{\"id\": string, \"description\": string, \
\"expected_tools\": [string], \"depends_on\": [string]}], \"reasoning\": string}. \
No prose outside the JSON object.";

fn plan_prompt(goal: &str, available_tools: &[ToolDefinition], context: Option<&str>) -> String {
    let tool_names: Vec<&str> = available_tools.iter().map(|t| t.name.as_str()).collect();
    let mut prompt = format!(
        "Goal: {goal}\nAvailable tools: {}\n",
        tool_names.join(", ")
    );
    if let Some(context) = context {
        prompt.push_str(&format!("Context:\n{context}\n"));
    }
    prompt.push_str("Produce a step-by-step plan as JSON.");
    prompt
}

fn revise_prompt(plan: &Plan, observations: &str, available_tools: &[ToolDefinition]) -> String {
    let tool_names: Vec<&str> = available_tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "Current plan:\n{}\nObservations since last step:\n{observations}\n\
         Available tools: {}\nRevise the plan as JSON, keeping completed step ids unchanged.",
        serde_json::to_string_pretty(plan).unwrap_or_default(),
        tool_names.join(", "),
    )
}

fn strip_fences(raw: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
    } else {
        raw.trim().to_string()
    }
}

fn parse_raw_plan(raw: &str) -> Option<RawPlan> {
    let cleaned = strip_fences(raw);
    serde_json::from_str(&cleaned).ok()
}

fn to_steps(raw_steps: Vec<RawStep>) -> Vec<Step> {
    raw_steps
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut step = Step::new(raw.id, index, raw.description);
            step.expected_tools = raw.expected_tools;
            step.depends_on = raw.depends_on;
            step
        })
        .collect()
}

fn parse_plan(goal: &str, raw: &str) -> Plan {
    match parse_raw_plan(raw) {
        Some(parsed) if !parsed.steps.is_empty() => Plan {
            steps: to_steps(parsed.steps),
            reasoning: parsed.reasoning,
            revision_count: 0,
        },
        _ => {
            tracing::warn!("planner: unparseable plan output, falling back to single step");
            Plan::single_step(goal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_plan() {
        let raw = "```json\n{\"steps\":[{\"id\":\"s1\",\"description\":\"do thing\",\"expected_tools\":[\"bash\"],\"depends_on\":[]}],\"reasoning\":\"because\"}\n```";
        let plan = parse_plan("goal", raw);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "s1");
        assert_eq!(plan.reasoning, "because");
    }

    #[test]
    fn falls_back_to_single_step_on_garbage() {
        let plan = parse_plan("fix the bug", "not json at all");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "fix the bug");
    }

    #[test]
    fn parses_unfenced_json() {
        let raw = "{\"steps\":[{\"id\":\"a\",\"description\":\"x\"}],\"reasoning\":\"r\"}";
        let plan = parse_plan("goal", raw);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "a");
    }
}
