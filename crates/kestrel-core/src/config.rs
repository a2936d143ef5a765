//! Runtime configuration, loaded from TOML with `${VAR}` environment
//! overrides (same convention the MCP server manifest uses, see
//! `mcp::config`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_event_ring_size() -> usize {
    300
}

fn default_event_ttl_secs() -> u64 {
    3600
}

fn default_max_iterations() -> u32 {
    50
}

fn default_max_tool_calls() -> u32 {
    100
}

fn default_max_tokens() -> u64 {
    200_000
}

/// Top-level runtime configuration for a Kestrel deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root working directory tools resolve relative paths against.
    pub workspace_root: PathBuf,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Ordered model failover chain (first entry is primary).
    pub model_chain: Vec<String>,
    #[serde(default)]
    pub guardrails: GuardrailDefaults,
    #[serde(default = "default_event_ring_size")]
    pub event_ring_size: usize,
    #[serde(default = "default_event_ttl_secs")]
    pub event_ttl_secs: u64,
    /// Directory scanned for `SKILL.md` skill definitions.
    pub skills_dir: PathBuf,
}

/// Default guardrail budgets, overridable per-task via `GuardrailConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailDefaults {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Risk level, at or below which a tool call auto-approves.
    #[serde(default)]
    pub auto_approve_risk: crate::types::tool::RiskLevel,
}

impl Default for GuardrailDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls: default_max_tool_calls(),
            max_tokens: default_max_tokens(),
            auto_approve_risk: crate::types::tool::RiskLevel::Low,
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file, expanding `${VAR}` references against the
    /// process environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let expanded = expand_env(&raw);
        let config: Self = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// A reasonable local default, rooted in the OS per-user config dir.
    pub fn local_default() -> Self {
        let home = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let root = home.join("kestrel");
        Self {
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            database_path: root.join("kestrel.sqlite3"),
            model_chain: vec!["primary".to_string()],
            guardrails: GuardrailDefaults::default(),
            event_ring_size: default_event_ring_size(),
            event_ttl_secs: default_event_ttl_secs(),
            skills_dir: root.join("skills"),
        }
    }
}

/// Expand `${NAME}` references in config text from the process environment,
/// leaving unresolved references untouched (matching `mcp::config`'s
/// manifest-style expansion behavior).
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            let mut name = String::new();
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match std::env::var(&name) {
                Ok(val) => out.push_str(&val),
                Err(_) => {
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_var() {
        std::env::set_var("KESTREL_TEST_VAR", "hello");
        assert_eq!(expand_env("value = \"${KESTREL_TEST_VAR}\""), "value = \"hello\"");
    }

    #[test]
    fn leaves_unknown_var_untouched() {
        assert_eq!(
            expand_env("value = \"${KESTREL_DOES_NOT_EXIST}\""),
            "value = \"${KESTREL_DOES_NOT_EXIST}\""
        );
    }
}
