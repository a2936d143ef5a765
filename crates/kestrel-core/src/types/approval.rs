use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::RiskLevel;

/// Disposition of a pending approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// A human-in-the-loop gate raised by Guardrails (C6) for a risky tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub task_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub risk: RiskLevel,
    pub reason: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        task_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        risk: RiskLevel,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            tool_name: tool_name.into(),
            arguments,
            risk,
            reason: reason.into(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// A generalized fingerprint of a previously-approved or -denied call,
/// used to auto-approve repeat calls once `approvals >= 3 && denials == 0`
/// (spec.md §4.6, see `guardrails::approval_memory`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPattern {
    pub fingerprint: String,
    pub tool_name: String,
    pub approvals: u32,
    pub denials: u32,
    pub last_seen: DateTime<Utc>,
}

impl ApprovalPattern {
    /// Memory auto-approves once three clean approvals have accumulated.
    pub fn auto_approves(&self) -> bool {
        self.approvals >= 3 && self.denials == 0
    }
}
