//! External skill sandbox RPC contract (spec.md §4.11, REDESIGN FLAGS).
//!
//! The actual sandbox is a separate service; this crate only defines the
//! contract a dynamic skill tool calls through. Resource limits and
//! allowed domains/paths are passed through unchecked to that service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_wall_time_secs: u64,
    pub max_memory_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_wall_time_secs: 30,
            max_memory_mb: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxRunRequest {
    pub skill_path: String,
    pub function: String,
    pub args: Value,
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxRunResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Status update streamed back while a skill runs out-of-process.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxStatus {
    pub phase: String,
    pub message: Option<String>,
}

/// Client seam for the external sandbox RPC. A real implementation lives
/// outside this crate (HTTP, gRPC, or a local subprocess bridge); callers
/// only depend on this trait.
#[async_trait::async_trait]
pub trait SandboxClient: Send + Sync {
    async fn run(
        &self,
        request: SandboxRunRequest,
        on_status: &(dyn Fn(SandboxStatus) + Send + Sync),
    ) -> anyhow::Result<SandboxRunResult>;
}
