use serde::{Deserialize, Serialize};

use super::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub index: usize,
    pub description: String,
    #[serde(default)]
    pub expected_tools: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl Step {
    pub fn new(id: impl Into<String>, index: usize, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            description: description.into(),
            expected_tools: Vec::new(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            tool_calls: Vec::new(),
            result: None,
            error: None,
            attempt_count: 0,
        }
    }
}

/// Ordered step DAG plus free-text reasoning, produced by the Planner (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub reasoning: String,
    #[serde(default)]
    pub revision_count: u32,
}

impl Plan {
    pub fn single_step(goal: &str) -> Self {
        Self {
            steps: vec![Step::new(uuid::Uuid::new_v4().to_string(), 0, goal)],
            reasoning: String::new(),
            revision_count: 0,
        }
    }

    /// The topologically-first pending step whose dependencies are all
    /// complete (spec.md §4.7 step 3), or `None` if the plan is done.
    pub fn next_eligible_step(&self) -> Option<&Step> {
        self.steps.iter().find(|step| {
            step.status == StepStatus::Pending
                && step.depends_on.iter().all(|dep| {
                    self.steps
                        .iter()
                        .find(|s| &s.id == dep)
                        .map(|s| s.status == StepStatus::Complete)
                        .unwrap_or(false)
                })
        })
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_done())
    }

    /// Replace `self` with a revised plan, preserving the id and status of
    /// every already-complete step (spec.md §3 invariant, §4.3 revision
    /// rules).
    pub fn revise(&mut self, mut new_steps: Vec<Step>, reasoning: String) {
        for new_step in &mut new_steps {
            if let Some(old) = self.steps.iter().find(|s| s.id == new_step.id) {
                if old.status == StepStatus::Complete {
                    new_step.status = StepStatus::Complete;
                    new_step.result = old.result.clone();
                }
            }
        }
        self.steps = new_steps;
        self.reasoning = reasoning;
        self.revision_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_eligible_respects_dependencies() {
        let mut plan = Plan {
            steps: vec![
                Step::new("a", 0, "first"),
                Step::new("b", 1, "second"),
            ],
            reasoning: String::new(),
            revision_count: 0,
        };
        plan.steps[1].depends_on.push("a".to_string());

        assert_eq!(plan.next_eligible_step().unwrap().id, "a");

        plan.steps[0].status = StepStatus::Complete;
        assert_eq!(plan.next_eligible_step().unwrap().id, "b");
    }

    #[test]
    fn revise_preserves_completed_step_ids_and_status() {
        let mut plan = Plan {
            steps: vec![Step::new("a", 0, "first"), Step::new("b", 1, "second")],
            reasoning: "orig".to_string(),
            revision_count: 0,
        };
        plan.steps[0].status = StepStatus::Complete;
        plan.steps[0].result = Some("done".to_string());

        let mut revised_a = Step::new("a", 0, "first (revised description)");
        revised_a.status = StepStatus::Pending; // should be overridden back to Complete
        let revised_c = Step::new("c", 1, "new step");

        plan.revise(vec![revised_a, revised_c], "replanned".to_string());

        assert_eq!(plan.revision_count, 1);
        let a = plan.steps.iter().find(|s| s.id == "a").unwrap();
        assert_eq!(a.status, StepStatus::Complete);
        assert_eq!(a.result.as_deref(), Some("done"));
    }

    #[test]
    fn plan_complete_iff_all_steps_done() {
        let mut plan = Plan {
            steps: vec![Step::new("a", 0, "x"), Step::new("b", 1, "y")],
            reasoning: String::new(),
            revision_count: 0,
        };
        assert!(!plan.is_complete());
        plan.steps[0].status = StepStatus::Complete;
        plan.steps[1].status = StepStatus::Skipped;
        assert!(plan.is_complete());
    }
}
