//! `agent_tasks` storage: the task record is kept as a JSON blob (plan,
//! guardrails, counters) alongside indexed columns used for range queries
//! by workspace (spec.md §4.9).

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::types::task::Task;

pub struct TaskStore<'a> {
    db: &'a Database,
}

impl<'a> TaskStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn upsert(&self, task: &Task) -> Result<()> {
        let data = serde_json::to_string(task)?;
        self.db.conn().execute(
            "INSERT INTO agent_tasks (id, user_id, workspace_id, parent_task_id, status, goal, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                task.id,
                task.user_id,
                task.workspace_id,
                task.parent_task_id,
                serde_json::to_string(&task.status)?,
                task.goal,
                data,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let result = self.db.conn().query_row(
            "SELECT data FROM agent_tasks WHERE id = ?1",
            [task_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_by_workspace(&self, workspace_id: &str, limit: usize) -> Result<Vec<Task>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT data FROM agent_tasks WHERE workspace_id = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![workspace_id, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(serde_json::from_str(&row?)?);
        }
        Ok(tasks)
    }

    pub fn delete(&self, task_id: &str) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM agent_tasks WHERE id = ?1", [task_id])?;
        Ok(())
    }

    /// Children of `task_id`, most recent first - used by the Coordinator
    /// (C9) to enumerate prior delegations.
    pub fn list_children(&self, task_id: &str) -> Result<Vec<Task>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT data FROM agent_tasks WHERE parent_task_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([task_id], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(serde_json::from_str(&row?)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::GuardrailConfig;
    use crate::types::tool::RiskLevel;

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
    fn upsert_then_get_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(&db);
        let task = Task::new("u1", "w1", "do the thing", guardrails());
        store.upsert(&task).unwrap();

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.goal, "do the thing");
    }

    #[test]
    fn list_by_workspace_filters_and_orders() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(&db);
        let t1 = Task::new("u1", "w1", "first", guardrails());
        let t2 = Task::new("u1", "w2", "other workspace", guardrails());
        store.upsert(&t1).unwrap();
        store.upsert(&t2).unwrap();

        let tasks = store.list_by_workspace("w1", 10).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].goal, "first");
    }
}
