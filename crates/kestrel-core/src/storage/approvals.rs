//! `agent_approvals` storage.

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::types::approval::{ApprovalRequest, ApprovalStatus};

pub struct ApprovalStore<'a> {
    db: &'a Database,
}

impl<'a> ApprovalStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, request: &ApprovalRequest) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO agent_approvals (id, task_id, tool_name, arguments, risk, reason, status, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request.id,
                request.task_id,
                request.tool_name,
                serde_json::to_string(&request.arguments)?,
                serde_json::to_string(&request.risk)?,
                request.reason,
                serde_json::to_string(&request.status)?,
                request.created_at.to_rfc3339(),
                request.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE agent_approvals SET status = ?1, resolved_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&status)?,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    pub fn pending_for_task(&self, task_id: &str) -> Result<Vec<ApprovalRequest>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, tool_name, arguments, risk, reason, status, created_at, resolved_at
             FROM agent_approvals WHERE task_id = ?1 AND status = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt.query_map([task_id], row_to_request)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<ApprovalRequest> {
    let arguments: String = row.get(3)?;
    let risk: String = row.get(4)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let resolved_at: Option<String> = row.get(8)?;

    Ok(ApprovalRequest {
        id: row.get(0)?,
        task_id: row.get(1)?,
        tool_name: row.get(2)?,
        arguments: serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null),
        risk: serde_json::from_str(&risk).unwrap_or_default(),
        reason: row.get(5)?,
        status: serde_json::from_str(&status).unwrap_or(crate::types::approval::ApprovalStatus::Pending),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        resolved_at: resolved_at.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&chrono::Utc))
                .ok()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tool::RiskLevel;
    use serde_json::json;

    #[test]
    fn insert_and_resolve_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = ApprovalStore::new(&db);
        let request = ApprovalRequest::new(
            "t1",
            "file_write",
            json!({"file_path": "/tmp/x"}),
            RiskLevel::Medium,
            "writes outside sandbox",
        );
        store.insert(&request).unwrap();

        let pending = store.pending_for_task("t1").unwrap();
        assert_eq!(pending.len(), 1);

        store.resolve(&request.id, ApprovalStatus::Approved).unwrap();
        assert!(store.pending_for_task("t1").unwrap().is_empty());
    }
}
