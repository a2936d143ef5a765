//! Learn from operator approval decisions to reduce future interruptions.
//!
//! Tool arguments are generalized into a pattern (file paths collapse to a
//! directory wildcard, UUIDs and long strings become placeholders) and
//! hashed; once a pattern accumulates three clean approvals with zero
//! denials it auto-approves future matching calls (spec.md §4.6).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::approval::ApprovalPattern;

const AUTO_APPROVE_THRESHOLD: u32 = 3;

/// Collapse tool arguments into a generalized JSON pattern string.
pub fn generalize_args(args: &Value) -> String {
    let generalized = generalize_value(args);
    serde_json::to_string(&sort_object(generalized)).unwrap_or_default()
}

fn generalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), generalize_scalar(v));
            }
            Value::Object(out)
        }
        other => generalize_scalar(other),
    }
}

fn generalize_scalar(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            if is_uuid(s) {
                Value::String("<UUID>".to_string())
            } else if s.contains('/') && s.len() > 5 {
                let dir = s.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
                Value::String(format!("{dir}/*"))
            } else if s.len() > 50 {
                Value::String("<CONTENT>".to_string())
            } else {
                Value::String(s.clone())
            }
        }
        Value::Number(n) => {
            if n.as_f64().map(|f| f.abs() > 100.0).unwrap_or(false) {
                Value::String("<N>".to_string())
            } else {
                value.clone()
            }
        }
        Value::Bool(_) | Value::Null => value.clone(),
        Value::Object(_) => Value::String("<OBJECT>".to_string()),
        Value::Array(a) => Value::String(format!("<LIST:{}>", a.len())),
    }
}

/// Sort object keys for a stable serialization (matches `sort_keys=True`).
fn sort_object(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map.into_iter().collect();
            Value::Object(sorted.into_iter().collect())
        }
        other => other,
    }
}

fn is_uuid(s: &str) -> bool {
    s.len() >= 9
        && s.as_bytes()[8] == b'-'
        && s.chars().take(8).all(|c| c.is_ascii_hexdigit())
}

/// `sha256(f"{tool}:{pattern}")` truncated to 16 hex chars.
pub fn pattern_hash(tool_name: &str, args_pattern: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{tool_name}:{args_pattern}").as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes[..n].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Storage hook the memory persists through; `storage::approval_patterns`
/// implements this against the `approval_patterns` table.
#[async_trait::async_trait]
pub trait PatternStore: Send + Sync {
    async fn load(&self, workspace_id: &str) -> anyhow::Result<Vec<ApprovalPattern>>;
    async fn record(&self, workspace_id: &str, pattern: &ApprovalPattern) -> anyhow::Result<()>;
}

/// In-memory cache of pattern approval/denial counts per workspace, backed
/// by `PatternStore` for durability.
pub struct ApprovalMemory {
    cache: DashMap<(String, String), ApprovalPattern>,
    store: Option<Arc<dyn PatternStore>>,
}

impl ApprovalMemory {
    pub fn new(store: Option<Arc<dyn PatternStore>>) -> Self {
        Self {
            cache: DashMap::new(),
            store,
        }
    }

    pub async fn load_workspace(&self, workspace_id: &str) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for pattern in store.load(workspace_id).await? {
            self.cache
                .insert((workspace_id.to_string(), pattern.fingerprint.clone()), pattern);
        }
        Ok(())
    }

    /// Returns `Some(reason)` if this exact pattern has already earned
    /// auto-approval, `None` otherwise.
    pub fn should_auto_approve(
        &self,
        workspace_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> Option<String> {
        let fingerprint = pattern_hash(tool_name, &generalize_args(args));
        let entry = self
            .cache
            .get(&(workspace_id.to_string(), fingerprint))?;
        if entry.auto_approves() {
            Some(format!(
                "Auto-approved: '{tool_name}' pattern approved {} times previously",
                entry.approvals
            ))
        } else {
            None
        }
    }

    /// Record an approval/denial decision, updating the cache and
    /// persisting through `store` if configured. A denial permanently
    /// blocks auto-approval for that fingerprint going forward.
    pub async fn record(
        &self,
        workspace_id: &str,
        tool_name: &str,
        args: &Value,
        approved: bool,
    ) -> anyhow::Result<()> {
        let fingerprint = pattern_hash(tool_name, &generalize_args(args));
        let key = (workspace_id.to_string(), fingerprint.clone());

        let mut entry = self
            .cache
            .get(&key)
            .map(|e| e.clone())
            .unwrap_or_else(|| ApprovalPattern {
                fingerprint: fingerprint.clone(),
                tool_name: tool_name.to_string(),
                approvals: 0,
                denials: 0,
                last_seen: chrono::Utc::now(),
            });

        if approved {
            entry.approvals += 1;
        } else {
            entry.denials += 1;
        }
        entry.last_seen = chrono::Utc::now();

        self.cache.insert(key, entry.clone());

        if let Some(store) = &self.store {
            store.record(workspace_id, &entry).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generalizes_file_paths_to_directory_wildcard() {
        let pattern = generalize_args(&json!({"file_path": "/project/src/utils.rs"}));
        assert!(pattern.contains("/project/src/*"));
    }

    #[test]
    fn generalizes_long_content_and_large_numbers() {
        let pattern = generalize_args(&json!({
            "content": "x".repeat(60),
            "count": 500,
            "flag": true
        }));
        assert!(pattern.contains("<CONTENT>"));
        assert!(pattern.contains("<N>"));
        assert!(pattern.contains("true"));
    }

    #[tokio::test]
    async fn auto_approves_after_three_clean_approvals() {
        let memory = ApprovalMemory::new(None);
        let args = json!({"file_path": "/w/a.rs"});

        for _ in 0..3 {
            memory.record("ws1", "file_write", &args, true).await.unwrap();
        }

        assert!(memory.should_auto_approve("ws1", "file_write", &args).is_some());
    }

    #[tokio::test]
    async fn a_single_denial_blocks_auto_approval_forever() {
        let memory = ApprovalMemory::new(None);
        let args = json!({"file_path": "/w/a.rs"});

        for _ in 0..3 {
            memory.record("ws1", "file_write", &args, true).await.unwrap();
        }
        memory.record("ws1", "file_write", &args, false).await.unwrap();

        assert!(memory.should_auto_approve("ws1", "file_write", &args).is_none());
    }
}
