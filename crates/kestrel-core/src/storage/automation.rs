//! `automation_cron_jobs`, `automation_webhooks`, `daemon_agents` storage
//! (spec.md §4.10, §6). Each table keeps a handful of indexed columns used
//! for the supervisor's own range queries (workspace, enabled, schedule)
//! alongside a `data` JSON blob holding the full record, the same idiom
//! `agent_tasks.data` uses for `Task`.

use anyhow::Result;
use rusqlite::params;

use super::database::Database;
use crate::types::automation::{AutomationStatus, CronJob, DaemonConfig, WebhookEndpoint};

pub struct CronJobStore<'a> {
    db: &'a Database,
}

impl<'a> CronJobStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn upsert(&self, job: &CronJob) -> Result<()> {
        let data = serde_json::to_string(job)?;
        self.db.conn().execute(
            "INSERT INTO automation_cron_jobs (id, workspace_id, schedule, goal_template, enabled, last_run_at, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                schedule = excluded.schedule,
                goal_template = excluded.goal_template,
                enabled = excluded.enabled,
                last_run_at = excluded.last_run_at,
                data = excluded.data",
            params![
                job.id,
                job.workspace_id,
                job.cron_expression,
                job.goal,
                job.status == AutomationStatus::Active,
                job.last_run.map(|t| t.to_rfc3339()),
                job.created_at.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<CronJob>> {
        let result = self.db.conn().query_row(
            "SELECT data FROM automation_cron_jobs WHERE id = ?1",
            [id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM automation_cron_jobs WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<CronJob>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT data FROM automation_cron_jobs WHERE workspace_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([workspace_id], |row| row.get::<_, String>(0))?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(serde_json::from_str(&row?)?);
        }
        Ok(jobs)
    }

    /// All enabled jobs, across every workspace, for the scheduler's own
    /// in-memory cache load at start.
    pub fn list_active(&self) -> Result<Vec<CronJob>> {
        let conn = self.db.conn();
        let mut stmt =
            conn.prepare("SELECT data FROM automation_cron_jobs WHERE enabled = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(serde_json::from_str(&row?)?);
        }
        Ok(jobs)
    }
}

pub struct WebhookStore<'a> {
    db: &'a Database,
}

impl<'a> WebhookStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn upsert(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        let data = serde_json::to_string(endpoint)?;
        let allowed_ips = serde_json::to_string(&endpoint.allowed_sources)?;
        self.db.conn().execute(
            "INSERT INTO automation_webhooks (id, workspace_id, secret, goal_template, allowed_ips, enabled, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                secret = excluded.secret,
                goal_template = excluded.goal_template,
                allowed_ips = excluded.allowed_ips,
                enabled = excluded.enabled,
                data = excluded.data",
            params![
                endpoint.id,
                endpoint.workspace_id,
                endpoint.secret,
                endpoint.goal_template,
                allowed_ips,
                endpoint.status == AutomationStatus::Active,
                endpoint.created_at.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<WebhookEndpoint>> {
        let result = self.db.conn().query_row(
            "SELECT data FROM automation_webhooks WHERE id = ?1",
            [id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM automation_webhooks WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<WebhookEndpoint>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT data FROM automation_webhooks WHERE workspace_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([workspace_id], |row| row.get::<_, String>(0))?;
        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(serde_json::from_str(&row?)?);
        }
        Ok(endpoints)
    }
}

pub struct DaemonStore<'a> {
    db: &'a Database,
}

impl<'a> DaemonStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn upsert(&self, daemon: &DaemonConfig) -> Result<()> {
        let data = serde_json::to_string(daemon)?;
        self.db.conn().execute(
            "INSERT INTO daemon_agents (id, workspace_id, name, interval_secs, sensitivity, enabled, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                interval_secs = excluded.interval_secs,
                sensitivity = excluded.sensitivity,
                enabled = excluded.enabled,
                data = excluded.data",
            params![
                daemon.id,
                daemon.workspace_id,
                daemon.name,
                daemon.poll_interval_seconds as i64,
                daemon.sensitivity,
                !matches!(
                    daemon.state,
                    crate::types::automation::DaemonState::Stopped
                ),
                daemon.created_at.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<DaemonConfig>> {
        let result = self.db.conn().query_row(
            "SELECT data FROM daemon_agents WHERE id = ?1",
            [id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM daemon_agents WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<DaemonConfig>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT data FROM daemon_agents WHERE workspace_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map([workspace_id], |row| row.get::<_, String>(0))?;
        let mut daemons = Vec::new();
        for row in rows {
            daemons.push(serde_json::from_str(&row?)?);
        }
        Ok(daemons)
    }

    pub fn list_active(&self) -> Result<Vec<DaemonConfig>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT data FROM daemon_agents WHERE enabled = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut daemons = Vec::new();
        for row in rows {
            daemons.push(serde_json::from_str(&row?)?);
        }
        Ok(daemons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::automation::DaemonType;

    #[test]
    fn cron_job_upsert_then_get_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = CronJobStore::new(&db);
        let job = CronJob::new("w1", "u1", "nightly", "desc", "0 2 * * *", "summarize the day");
        store.upsert(&job).unwrap();

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.cron_expression, "0 2 * * *");
        assert_eq!(store.list_active().unwrap().len(), 1);
    }

    #[test]
    fn webhook_upsert_then_get_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = WebhookStore::new(&db);
        let mut endpoint = WebhookEndpoint::new("w1", "u1", "ci-trigger", "desc", "handle {payload}");
        endpoint.secret = Some("s3cr3t".to_string());
        store.upsert(&endpoint).unwrap();

        let fetched = store.get(&endpoint.id).unwrap().unwrap();
        assert_eq!(fetched.secret.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn daemon_upsert_then_get_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let store = DaemonStore::new(&db);
        let daemon = DaemonConfig::new("w1", "u1", "repo-watcher", "desc", DaemonType::RepoWatcher, "main");
        store.upsert(&daemon).unwrap();

        let fetched = store.get(&daemon.id).unwrap().unwrap();
        assert_eq!(fetched.poll_interval_seconds, 300);
        assert_eq!(store.list_active().unwrap().len(), 1);
    }
}
