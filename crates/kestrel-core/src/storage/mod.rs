//! Persistence layer (spec.md §4.9).
//!
//! SQLite-backed storage for the durable objects named in spec.md §6:
//! tasks, approvals, branches, skills, approval patterns, session
//! metadata, and the automation supervisor's cron jobs/webhooks/daemons.
//! `plans.rs` is retained on disk as reference for plan markdown
//! rendering but is not part of the compiled module tree; plan state now
//! lives embedded in `agent_tasks.data` via `types::task::Task`.

pub mod approval_patterns;
pub mod approvals;
pub mod automation;
pub mod branches;
pub mod database;
pub mod sessions;
pub mod skills;
pub mod tasks;

pub use approval_patterns::ApprovalPatternStore;
pub use approvals::ApprovalStore;
pub use automation::{CronJobStore, DaemonStore, WebhookStore};
pub use branches::BranchStore;
pub use database::{Database, SharedDatabase};
pub use sessions::{SessionInfo, SessionMessage, SessionStore};
pub use skills::SkillRecordStore;
pub use tasks::TaskStore;
