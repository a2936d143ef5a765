//! Diagnostics tracker (spec.md §4.6): classifies failing tool attempts,
//! detects repetition, and formats a compact advisory fragment for the
//! next LLM call. Adapted from the teacher's repeated-failure detector
//! (`agent/failure.rs`) to this core's `types::tool::{ToolCall, ToolResult}`
//! and to spec.md's richer error-category taxonomy.

pub mod failover;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::types::tool::{ToolCall, ToolResult};

/// After this many failures in a single step, the advisory instructs the
/// model to stop and diagnose rather than keep retrying.
pub const STOP_AND_DIAGNOSE_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transient,
    Auth,
    NotFound,
    Dependency,
    Semantic,
    ServerCrash,
    Impossible,
    Unknown,
}

impl ErrorCategory {
    /// Ordered pattern list (spec.md §4.6): first match wins.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("503")
            || lower.contains("502")
        {
            Self::Transient
        } else if lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("permission denied")
        {
            Self::Auth
        } else if lower.contains("not found") || lower.contains("404") || lower.contains("no such file") {
            Self::NotFound
        } else if lower.contains("missing dependency")
            || lower.contains("command not found")
            || lower.contains("module not found")
        {
            Self::Dependency
        } else if lower.contains("invalid parameters")
            || lower.contains("missing field")
            || lower.contains("unknown field")
            || lower.contains("malformed")
        {
            Self::Semantic
        } else if lower.contains("broken pipe") || lower.contains("process exited") || lower.contains("connection reset") {
            Self::ServerCrash
        } else if lower.is_empty() {
            Self::Unknown
        } else {
            Self::Impossible
        }
    }

    pub fn guidance(self) -> &'static str {
        match self {
            Self::Transient => "This looks transient; a retry or brief backoff may succeed.",
            Self::Auth => "This is an authentication/authorization failure; do not retry blindly, check credentials or scope.",
            Self::NotFound => "The referenced resource doesn't exist; verify the path or identifier before retrying.",
            Self::Dependency => "A dependency appears to be missing; consider installing it or choosing a different approach.",
            Self::Semantic => "The arguments were malformed; fix them before calling again.",
            Self::ServerCrash => "The tool's backing process died; one reconnect was attempted automatically.",
            Self::Impossible => "This failure doesn't fit a known category; consider a different strategy or ask for help.",
            Self::Unknown => "No error detail was available.",
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    tool_name: String,
    category: ErrorCategory,
    summary: String,
}

/// Per-step tracker: one instance per step, discarded when the step ends.
#[derive(Debug, Default)]
pub struct DiagnosticTracker {
    failures: Vec<FailureRecord>,
    repetition_counts: HashMap<String, usize>,
}

impl DiagnosticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one tool attempt's outcome. No-op on success.
    pub fn record(&mut self, call: &ToolCall, result: &ToolResult) {
        if result.success {
            return;
        }
        let message = result.error.clone().unwrap_or_default();
        let category = ErrorCategory::classify(&message);
        self.failures.push(FailureRecord {
            tool_name: call.name.clone(),
            category,
            summary: message.chars().take(200).collect(),
        });

        let signature = format!("{}|{}", call.name, hash_arguments(&call.arguments));
        *self.repetition_counts.entry(signature).or_insert(0) += 1;
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn should_stop_and_diagnose(&self) -> bool {
        self.failures.len() >= STOP_AND_DIAGNOSE_THRESHOLD
    }

    /// Compact advisory fragment: category histogram, dominant-category
    /// guidance, a repetition warning, and the last five failure
    /// summaries. `None` if nothing has failed yet.
    pub fn advisory(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }

        let mut histogram: HashMap<ErrorCategory, usize> = HashMap::new();
        for f in &self.failures {
            *histogram.entry(f.category).or_insert(0) += 1;
        }
        let dominant = histogram
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(cat, _)| *cat)
            .unwrap_or(ErrorCategory::Unknown);

        let mut out = String::from("[diagnostic advisory]\n");
        out.push_str("Failure categories: ");
        let mut parts: Vec<String> = histogram
            .iter()
            .map(|(cat, count)| format!("{cat:?}={count}"))
            .collect();
        parts.sort();
        out.push_str(&parts.join(", "));
        out.push('\n');
        out.push_str(dominant.guidance());
        out.push('\n');

        if self.repetition_counts.values().any(|c| *c > 1) {
            out.push_str("Warning: the same tool+arguments have been retried more than once.\n");
        }

        out.push_str("Recent failures:\n");
        for f in self.failures.iter().rev().take(5) {
            out.push_str(&format!("- {} [{:?}]: {}\n", f.tool_name, f.category, f.summary));
        }

        if self.should_stop_and_diagnose() {
            out.push_str("Stop retrying this approach and diagnose before continuing.\n");
        }

        Some(out)
    }
}

fn hash_arguments(arguments: &serde_json::Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    arguments.to_string().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: name.to_string(),
            arguments: json!({"x": 1}),
        }
    }

    #[test]
    fn classifies_known_patterns() {
        assert_eq!(ErrorCategory::classify("request timed out"), ErrorCategory::Transient);
        assert_eq!(ErrorCategory::classify("401 unauthorized"), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::classify("file not found"), ErrorCategory::NotFound);
        assert_eq!(ErrorCategory::classify("invalid parameters: bad"), ErrorCategory::Semantic);
        assert_eq!(ErrorCategory::classify("broken pipe"), ErrorCategory::ServerCrash);
    }

    #[test]
    fn stops_after_threshold_failures() {
        let mut tracker = DiagnosticTracker::new();
        for _ in 0..3 {
            tracker.record(&call("bash"), &ToolResult::err("c1", "timed out", 10));
        }
        assert!(tracker.should_stop_and_diagnose());
        let advisory = tracker.advisory().unwrap();
        assert!(advisory.contains("Stop retrying"));
    }

    #[test]
    fn success_does_not_record() {
        let mut tracker = DiagnosticTracker::new();
        tracker.record(&call("bash"), &ToolResult::ok("c1", "ok", 5));
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.advisory().is_none());
    }
}
