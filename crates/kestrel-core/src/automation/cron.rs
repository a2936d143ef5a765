//! Minute-aligned cron scheduler (spec.md §4.10).
//!
//! Each field of a 5-field expression (minute hour day month weekday) is
//! parsed independently and a match requires every field's parsed set to
//! contain the corresponding component of the current time - a plain
//! AND-of-all-fields, not POSIX cron's day-of-month/day-of-week OR
//! carve-out. Kept that way deliberately: the simpler rule is what this
//! supervisor's jobs were authored against and changing it would silently
//! change which minute existing jobs fire on.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::TaskLauncher;
use crate::storage::{CronJobStore, SharedDatabase};
use crate::types::automation::CronJob;

fn parse_cron_field(field: &str, min: u32, max: u32) -> HashSet<u32> {
    let mut values = HashSet::new();
    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().unwrap_or(1).max(1)),
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (
                a.parse::<u32>().unwrap_or(min).max(min),
                b.parse::<u32>().unwrap_or(max).min(max),
            )
        } else {
            match range_part.parse::<u32>() {
                Ok(v) => (v, if part.contains('/') { max } else { v }),
                Err(_) => continue,
            }
        };

        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step;
        }
    }
    values
}

/// Whether `expr` (5 whitespace-separated fields) matches the minute `now`
/// falls in.
pub fn cron_matches_now(expr: &str, now: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }

    let minute = parse_cron_field(fields[0], 0, 59);
    let hour = parse_cron_field(fields[1], 0, 23);
    let day = parse_cron_field(fields[2], 1, 31);
    let month = parse_cron_field(fields[3], 1, 12);
    let weekday = parse_cron_field(fields[4], 0, 6);

    minute.contains(&now.minute())
        && hour.contains(&now.hour())
        && day.contains(&now.day())
        && month.contains(&now.month())
        && weekday.contains(&now.weekday().num_days_from_sunday())
}

/// In-memory cache of active jobs, ticked once a minute, backed by
/// `CronJobStore` for durability.
pub struct CronScheduler {
    store: SharedDatabase,
    jobs: DashMap<String, CronJob>,
    launcher: Arc<dyn TaskLauncher>,
    shutdown_tx: std::sync::Mutex<Option<mpsc::Sender<()>>>,
}

impl CronScheduler {
    pub fn new(store: SharedDatabase, launcher: Arc<dyn TaskLauncher>) -> Self {
        Self {
            store,
            jobs: DashMap::new(),
            launcher,
            shutdown_tx: std::sync::Mutex::new(None),
        }
    }

    fn load_jobs(&self) -> anyhow::Result<()> {
        let store = CronJobStore::new(&self.store);
        self.jobs.clear();
        for job in store.list_active()? {
            self.jobs.insert(job.id.clone(), job);
        }
        Ok(())
    }

    /// Loads active jobs and spawns the background tick loop. Call at most
    /// once per scheduler instance.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.load_jobs()?;

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock().expect("shutdown_tx mutex poisoned") = Some(tx);

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = 60u64.saturating_sub(Utc::now().second() as u64).max(1);
                tokio::select! {
                    _ = rx.recv() => {
                        tracing::debug!("cron scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {
                        scheduler.tick().await;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().expect("shutdown_tx mutex poisoned").take() {
            let _ = tx.try_send(());
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_runnable() && cron_matches_now(&entry.value().cron_expression, now))
            .map(|entry| entry.key().clone())
            .collect();

        for id in due {
            self.trigger(&id, now).await;
        }
    }

    async fn trigger(&self, id: &str, now: DateTime<Utc>) {
        let Some(mut job) = self.jobs.get(id).map(|e| e.value().clone()) else {
            return;
        };
        job.run_count += 1;
        job.last_run = Some(now);
        self.jobs.insert(id.to_string(), job.clone());

        if let Err(e) = CronJobStore::new(&self.store).upsert(&job) {
            tracing::warn!(job_id = %id, error = %e, "cron: failed to persist run count");
        }

        let source = format!("cron:{}", job.name);
        if let Err(e) = self
            .launcher
            .launch(&job.workspace_id, &job.user_id, &job.goal, &source)
            .await
        {
            tracing::warn!(job_id = %id, error = %e, "cron: task launch failed");
        }
    }

    pub fn create_job(&self, job: CronJob) -> anyhow::Result<()> {
        CronJobStore::new(&self.store).upsert(&job)?;
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn delete_job(&self, id: &str) -> anyhow::Result<()> {
        CronJobStore::new(&self.store).delete(id)?;
        self.jobs.remove(id);
        Ok(())
    }

    pub fn list_jobs(&self, workspace_id: &str) -> Vec<CronJob> {
        self.jobs
            .iter()
            .filter(|e| e.value().workspace_id == workspace_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[test]
    fn wildcard_field_matches_every_value() {
        let field = parse_cron_field("*", 0, 59);
        assert_eq!(field.len(), 60);
    }

    #[test]
    fn step_field_matches_multiples() {
        let field = parse_cron_field("*/15", 0, 59);
        assert_eq!(field, HashSet::from([0, 15, 30, 45]));
    }

    #[test]
    fn list_and_range_fields_combine() {
        let field = parse_cron_field("1,3,5-7", 0, 23);
        assert_eq!(field, HashSet::from([1, 3, 5, 6, 7]));
    }

    #[test]
    fn matches_now_requires_every_field() {
        // 2026-07-29 is a Wednesday (weekday 3).
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 2, 30, 0).unwrap();
        assert!(cron_matches_now("30 2 * * 3", now));
        assert!(!cron_matches_now("30 2 * * 4", now));
        assert!(!cron_matches_now("31 2 * * 3", now));
    }

    struct RecordingLauncher {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl TaskLauncher for RecordingLauncher {
        async fn launch(&self, workspace_id: &str, _user_id: &str, goal: &str, source: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((workspace_id.to_string(), format!("{source}:{goal}")));
            Ok(())
        }
    }

    #[tokio::test]
    async fn tick_triggers_due_job_and_increments_run_count() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let launcher = Arc::new(RecordingLauncher { calls: Mutex::new(Vec::new()) });
        let scheduler = Arc::new(CronScheduler::new(db, launcher.clone()));

        let mut job = CronJob::new("w1", "u1", "every-minute", "desc", "* * * * *", "do the thing");
        job.max_runs = Some(1);
        scheduler.create_job(job.clone()).unwrap();

        scheduler.tick().await;
        assert_eq!(launcher.calls.lock().unwrap().len(), 1);

        let updated = scheduler.list_jobs("w1");
        assert_eq!(updated[0].run_count, 1);

        // Second tick: job has exhausted max_runs and must not fire again.
        scheduler.tick().await;
        assert_eq!(launcher.calls.lock().unwrap().len(), 1);
    }
}
