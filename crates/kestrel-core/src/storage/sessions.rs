//! `agent_sessions` / `agent_session_messages` storage: conversational
//! context a task is attached to, kept separate from task state so a
//! session can span multiple tasks (spec.md §4.9).

use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::database::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub workspace_id: String,
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub seq: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct SessionStore<'a> {
    db: &'a Database,
}

impl<'a> SessionStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, workspace_id: &str, title: Option<&str>) -> Result<SessionInfo> {
        let now = chrono::Utc::now();
        let session = SessionInfo {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            title: title.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.db.conn().execute(
            "INSERT INTO agent_sessions (id, workspace_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.workspace_id,
                session.title,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    pub fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<SessionMessage> {
        let next_seq: i64 = self.db.conn().query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM agent_session_messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        let message = SessionMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            seq: next_seq,
            created_at: chrono::Utc::now(),
        };
        self.db.conn().execute(
            "INSERT INTO agent_session_messages (id, session_id, role, content, seq, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.session_id,
                message.role,
                message.content,
                message.seq,
                message.created_at.to_rfc3339(),
            ],
        )?;
        self.db.conn().execute(
            "UPDATE agent_sessions SET updated_at = ?1 WHERE id = ?2",
            params![message.created_at.to_rfc3339(), session_id],
        )?;
        Ok(message)
    }

    pub fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, seq, created_at
             FROM agent_session_messages WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            let created_at: String = row.get(5)?;
            Ok(SessionMessage {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                seq: row.get(4)?,
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
    fn append_assigns_increasing_sequence_numbers() {
        let db = Database::open_in_memory().unwrap();
        let store = SessionStore::new(&db);
        let session = store.create("ws1", Some("debugging session")).unwrap();

        store.append_message(&session.id, "user", "hello").unwrap();
        store.append_message(&session.id, "assistant", "hi").unwrap();

        let messages = store.messages(&session.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].seq, 0);
        assert_eq!(messages[1].seq, 1);
    }
}
