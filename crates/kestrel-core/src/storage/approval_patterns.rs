//! `approval_patterns` storage, implementing `guardrails::approval_memory::PatternStore`.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::guardrails::approval_memory::PatternStore;
use crate::types::approval::ApprovalPattern;

pub struct ApprovalPatternStore {
    db: Arc<Database>,
}

impl ApprovalPatternStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl PatternStore for ApprovalPatternStore {
    async fn load(&self, workspace_id: &str) -> Result<Vec<ApprovalPattern>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, tool_name, approvals, denials, last_seen
             FROM approval_patterns WHERE workspace_id = ?1",
        )?;
        let rows = stmt.query_map([workspace_id], |row| {
            let last_seen: String = row.get(4)?;
            Ok(ApprovalPattern {
                fingerprint: row.get(0)?,
                tool_name: row.get(1)?,
                approvals: row.get(2)?,
                denials: row.get(3)?,
                last_seen: chrono::DateTime::parse_from_rfc3339(&last_seen)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn record(&self, workspace_id: &str, pattern: &ApprovalPattern) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO approval_patterns (workspace_id, fingerprint, tool_name, approvals, denials, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(workspace_id, fingerprint) DO UPDATE SET
                approvals = excluded.approvals,
                denials = excluded.denials,
                last_seen = excluded.last_seen",
            params![
                workspace_id,
                pattern.fingerprint,
                pattern.tool_name,
                pattern.approvals,
                pattern.denials,
                pattern.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_load_roundtrips() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = ApprovalPatternStore::new(db);
        let pattern = ApprovalPattern {
            fingerprint: "abc123".to_string(),
            tool_name: "file_write".to_string(),
            approvals: 3,
            denials: 0,
            last_seen: chrono::Utc::now(),
        };
        store.record("ws1", &pattern).await.unwrap();

        let loaded = store.load("ws1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fingerprint, "abc123");
    }
}
