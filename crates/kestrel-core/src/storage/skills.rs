//! `agent_skills` storage, implementing `skills::SkillStore`.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::skills::{SkillRecord, SkillStore};

pub struct SkillRecordStore {
    db: Arc<Database>,
}

impl SkillRecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl SkillStore for SkillRecordStore {
    async fn upsert(&self, record: &SkillRecord) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO agent_skills (workspace_id, name, description, parameters_schema, code, capabilities, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(workspace_id, name) DO UPDATE SET
                description = excluded.description,
                parameters_schema = excluded.parameters_schema,
                code = excluded.code,
                capabilities = excluded.capabilities",
            params![
                record.workspace_id,
                record.name,
                record.description,
                serde_json::to_string(&record.parameters_schema)?,
                record.code,
                serde_json::to_string(&record.capabilities)?,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, workspace_id: &str, name: &str) -> Result<Option<SkillRecord>> {
        let result = self.db.conn().query_row(
            "SELECT description, parameters_schema, code, capabilities, created_at
             FROM agent_skills WHERE workspace_id = ?1 AND name = ?2",
            params![workspace_id, name],
            row_to_fields,
        );
        match result {
            Ok(fields) => Ok(Some(build_record(workspace_id, name, fields)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<SkillRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT name, description, parameters_schema, code, capabilities, created_at
             FROM agent_skills WHERE workspace_id = ?1",
        )?;
        let rows = stmt.query_map([workspace_id], |row| {
            let name: String = row.get(0)?;
            let fields = (
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            );
            Ok((name, fields))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (name, fields) = row?;
            records.push(build_record(workspace_id, &name, fields)?);
        }
        Ok(records)
    }
}

type Fields = (String, String, String, String, String);

fn row_to_fields(row: &rusqlite::Row) -> rusqlite::Result<Fields> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn build_record(workspace_id: &str, name: &str, fields: Fields) -> Result<SkillRecord> {
    let (description, parameters_schema, code, capabilities, created_at) = fields;
    Ok(SkillRecord {
        workspace_id: workspace_id.to_string(),
        name: name.to_string(),
        description,
        parameters_schema: serde_json::from_str(&parameters_schema)?,
        code,
        capabilities: serde_json::from_str(&capabilities)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SkillRecordStore::new(db);
        let record = SkillRecord {
            workspace_id: "ws1".to_string(),
            name: "deploy".to_string(),
            description: "deploys the thing".to_string(),
            parameters_schema: serde_json::json!({"type": "object"}),
            code: "def run(args): return args".to_string(),
            capabilities: vec!["network".to_string()],
            created_at: chrono::Utc::now(),
        };
        store.upsert(&record).await.unwrap();

        let fetched = store.get("ws1", "deploy").await.unwrap().unwrap();
        assert_eq!(fetched.description, "deploys the thing");

        let listed = store.list("ws1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
