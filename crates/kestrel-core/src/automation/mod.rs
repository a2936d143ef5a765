//! Automation Supervisor (spec.md §4.10): schedules, webhooks, and daemon
//! agents that launch tasks without a human driving the loop directly.
//!
//! All three subsystems launch tasks through the same seam, `TaskLauncher`,
//! the automation analogue of `coordinator::TaskRunner`: depending on a
//! trait rather than `agent::loop_::AgentLoop` directly lets each
//! subsystem be built and tested standalone, with the concrete launcher
//! (constructing a fresh `Task` + `AgentLoop` and running it in the
//! background) wired in by whatever owns the runtime.

pub mod cron;
pub mod daemon;
pub mod webhook;

pub use cron::{cron_matches_now, CronScheduler};
pub use daemon::DaemonManager;
pub use webhook::{WebhookHandler, WebhookResponse};

use async_trait::async_trait;

/// Launches a new top-level task from an automation trigger and returns
/// once the task has been accepted for execution - it does not wait for
/// the task to finish. `source` identifies the trigger for observability,
/// e.g. `"cron:nightly-summary"`, `"webhook:ci-trigger"`,
/// `"daemon:repo-watcher"`.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(
        &self,
        workspace_id: &str,
        user_id: &str,
        goal: &str,
        source: &str,
    ) -> anyhow::Result<()>;
}
