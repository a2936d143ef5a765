//! Types backing the Automation Supervisor (spec.md §4.10): cron jobs,
//! webhook endpoints, and daemon agents, plus the daemon's observation and
//! interrupt-signal shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle shared by cron jobs and webhook endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Active,
    Paused,
    Disabled,
}

/// A scheduled goal, re-triggered whenever its cron expression matches the
/// current minute (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    pub goal: String,
    pub status: AutomationStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    /// `None` means unlimited.
    pub max_runs: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    pub fn new(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        cron_expression: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: description.into(),
            cron_expression: cron_expression.into(),
            goal: goal.into(),
            status: AutomationStatus::Active,
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this job is still eligible to fire: active and, if bounded,
    /// under its run cap.
    pub fn is_runnable(&self) -> bool {
        self.status == AutomationStatus::Active
            && self.max_runs.is_none_or(|max| self.run_count < max)
    }
}

/// An inbound webhook that launches a task from an external trigger
/// (spec.md §4.10). `secret` is the HMAC-SHA256 key used to verify the
/// `x-signature-256`/`x-hub-signature-256` header; `None` means signature
/// verification is disabled for this endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    /// May reference `{payload}` and `{headers}` placeholders.
    pub goal_template: String,
    pub secret: Option<String>,
    pub status: AutomationStatus,
    pub trigger_count: u64,
    /// IP allowlist; empty means unrestricted.
    pub allowed_sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        goal_template: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: description.into(),
            goal_template: goal_template.into(),
            secret: None,
            status: AutomationStatus::Active,
            trigger_count: 0,
            allowed_sources: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Coarse-grained state machine a daemon agent cycles through each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Idle,
    Observing,
    Analyzing,
    Acting,
    Paused,
    Stopped,
}

/// What a daemon watches, used to pick its observer/analyzer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonType {
    RepoWatcher,
    CiMonitor,
    InboxMonitor,
    DataMonitor,
    SystemMonitor,
    Custom,
}

/// A long-running watcher that observes something on an interval and
/// escalates to a task only when it judges the change worth a human or an
/// agent's attention (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub daemon_type: DaemonType,
    pub watch_target: String,
    pub poll_interval_seconds: u64,
    /// "low" | "medium" | "high"; gates which severities interrupt.
    pub sensitivity: String,
    pub escalation_rules: serde_json::Value,
    pub state: DaemonState,
    pub created_at: DateTime<Utc>,
    pub last_observation_at: Option<DateTime<Utc>>,
    pub observation_count: u64,
    pub interrupt_count: u64,
}

impl DaemonConfig {
    pub fn new(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        daemon_type: DaemonType,
        watch_target: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: description.into(),
            daemon_type,
            watch_target: watch_target.into(),
            poll_interval_seconds: 300,
            sensitivity: "medium".to_string(),
            escalation_rules: serde_json::Value::Null,
            state: DaemonState::Idle,
            created_at: Utc::now(),
            last_observation_at: None,
            observation_count: 0,
            interrupt_count: 0,
        }
    }
}

/// One sample pulled by a daemon's observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub is_anomaly: bool,
}

impl Observation {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            is_anomaly: false,
        }
    }
}

/// Severity a daemon's analyzer assigns to a candidate interrupt; gates
/// whether it actually reaches a human via the sensitivity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptSeverity {
    Info,
    Warning,
    Critical,
}

/// A candidate interrupt produced by a daemon's analyzer from recent
/// observations. Only escalated to a human/task if `DaemonConfig`'s
/// sensitivity threshold allows this severity through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptSignal {
    pub daemon_id: String,
    pub title: String,
    pub body: String,
    pub severity: InterruptSeverity,
    pub hypothesis: Option<String>,
    pub recommendation: Option<String>,
    /// If true and `goal_template` is set, a task is launched automatically
    /// instead of only notifying.
    pub auto_actionable: bool,
    pub goal_template: Option<String>,
}
