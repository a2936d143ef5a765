//! `task_branches` storage: alternate explorations spawned from a task,
//! merged or discarded independently (spec.md §4.9).

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::types::branch::{Branch, BranchStatus};

pub struct BranchStore<'a> {
    db: &'a Database,
}

impl<'a> BranchStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, branch: &Branch) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO task_branches (id, task_id, parent_task_id, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                branch.id,
                branch.task_id,
                branch.parent_task_id,
                branch.description,
                serde_json::to_string(&branch.status)?,
                branch.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_status(&self, id: &str, status: BranchStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE task_branches SET status = ?1 WHERE id = ?2",
            params![serde_json::to_string(&status)?, id],
        )?;
        Ok(())
    }

    pub fn list_for_task(&self, task_id: &str) -> Result<Vec<Branch>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, parent_task_id, description, status, created_at
             FROM task_branches WHERE task_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            let status: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(Branch {
                id: row.get(0)?,
                task_id: row.get(1)?,
                parent_task_id: row.get::<_, String>(2)?,
                description: row.get(3)?,
                status: serde_json::from_str(&status).unwrap_or(BranchStatus::Active),
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_list_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = BranchStore::new(&db);
        let branch = Branch::new("t1", "parent1", "try the alternate approach");
        store.insert(&branch).unwrap();

        let listed = store.list_for_task("t1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, BranchStatus::Active);

        store.set_status(&branch.id, BranchStatus::Merged).unwrap();
        let listed = store.list_for_task("t1").unwrap();
        assert_eq!(listed[0].status, BranchStatus::Merged);
    }
}
