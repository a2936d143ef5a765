//! Tool selector (spec.md §4.4): picks a bounded subset of tools for a
//! step so the prompt stays small enough for constrained-context models.

use std::collections::HashSet;

use crate::types::tool::{ToolCategory, ToolDefinition};

/// Which budget applies; spec.md §4.4 names 8 for local models, 20 for
/// cloud models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Local,
    Cloud,
}

impl ModelTier {
    pub fn budget(self) -> usize {
        match self {
            Self::Local => 8,
            Self::Cloud => 20,
        }
    }
}

/// Keywords a step description is checked against to decide whether a
/// tool's category is plausibly relevant.
fn category_keywords(category: ToolCategory) -> &'static [&'static str] {
    match category {
        ToolCategory::Control => &[],
        ToolCategory::ReadOnly => &["read", "view", "show", "list", "inspect", "search", "find", "check", "look"],
        ToolCategory::Write => &["write", "edit", "create", "modify", "update", "save", "generate"],
        ToolCategory::Execute => &["run", "execute", "build", "test", "compile", "install", "deploy"],
        ToolCategory::Network => &["fetch", "download", "http", "api", "request", "call", "web"],
        ToolCategory::Skill => &["skill"],
        ToolCategory::Mcp => &["mcp"],
        ToolCategory::Delegate => &["delegate", "subagent", "specialist", "coordinate"],
    }
}

/// Selects a bounded subset of `available` tool names for `step_description`,
/// in priority order: (1) control tools, (2) the planner's
/// `expected_tools`, (3) category-keyword matches, (4) name-token matches.
pub fn select_tools(
    step_description: &str,
    expected_tools: &[String],
    available: &[ToolDefinition],
    tier: ModelTier,
) -> Vec<String> {
    let description_lower = step_description.to_lowercase();
    let budget = tier.budget();
    let mut chosen = Vec::with_capacity(budget);
    let mut seen = HashSet::new();

    let mut push = |name: &str, chosen: &mut Vec<String>, seen: &mut HashSet<String>| -> bool {
        if seen.contains(name) {
            return true;
        }
        if chosen.len() >= budget {
            return false;
        }
        seen.insert(name.to_string());
        chosen.push(name.to_string());
        true
    };

    for def in available.iter().filter(|d| d.category == ToolCategory::Control) {
        if !push(&def.name, &mut chosen, &mut seen) {
            return chosen;
        }
    }

    for name in expected_tools {
        if available.iter().any(|d| &d.name == name) && !push(name, &mut chosen, &mut seen) {
            return chosen;
        }
    }

    for def in available {
        let keywords = category_keywords(def.category);
        if keywords.iter().any(|kw| description_lower.contains(kw))
            && !push(&def.name, &mut chosen, &mut seen)
        {
            return chosen;
        }
    }

    for def in available {
        let name_lower = def.name.to_lowercase();
        let tokens: Vec<&str> = name_lower.split(['_', '-']).collect();
        if tokens.iter().any(|t| !t.is_empty() && description_lower.contains(t))
            && !push(&def.name, &mut chosen, &mut seen)
        {
            return chosen;
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tool::RiskLevel;
    use serde_json::json;

    fn def(name: &str, category: ToolCategory) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            parameters_schema: json!({}),
            risk: RiskLevel::Low,
            requires_approval: false,
            timeout_secs: 30,
            category,
        }
    }

    #[test]
    fn control_tools_always_included() {
        let tools = vec![
            def("task_complete", ToolCategory::Control),
            def("bash", ToolCategory::Execute),
        ];
        let selected = select_tools("do nothing relevant", &[], &tools, ModelTier::Local);
        assert!(selected.contains(&"task_complete".to_string()));
    }

    #[test]
    fn expected_tools_outrank_keyword_matches() {
        let tools = vec![def("web_fetch", ToolCategory::Network), def("bash", ToolCategory::Execute)];
        let selected = select_tools(
            "run the build",
            &["web_fetch".to_string()],
            &tools,
            ModelTier::Local,
        );
        assert_eq!(selected[0], "web_fetch");
    }

    #[test]
    fn respects_local_budget_of_eight() {
        let tools: Vec<ToolDefinition> = (0..20)
            .map(|i| def(&format!("tool_{i}"), ToolCategory::Write))
            .collect();
        let selected = select_tools("write something", &[], &tools, ModelTier::Local);
        assert_eq!(selected.len(), 8);
    }

    #[test]
    fn category_keyword_match_selects_relevant_tool() {
        let tools = vec![def("file_read", ToolCategory::ReadOnly), def("bash", ToolCategory::Execute)];
        let selected = select_tools("please read the config file", &[], &tools, ModelTier::Local);
        assert!(selected.contains(&"file_read".to_string()));
    }
}
