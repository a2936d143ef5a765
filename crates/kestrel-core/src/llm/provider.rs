//! LLM provider contract (spec.md §6): two provider-agnostic methods,
//! streaming text generation and tool-calling generation. Modeled as a
//! bounded channel of chunks plus a completion signal rather than an
//! async generator (spec.md §9's "LLM streaming -> token channel" note);
//! cancellation is dropping the receiver, which closes the channel.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::{GenerationRequest, StreamChunk, ToolGenerationRequest, ToolGenerationResult};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an unparseable response: {0}")]
    BadResponse(String),
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("provider authentication failed")]
    Unauthorized,
}

pub type LlmResult<T> = Result<T, LlmError>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Streams text chunks over a bounded channel; the receiver's other
    /// half is handed back immediately, before generation completes.
    async fn stream(&self, request: GenerationRequest) -> LlmResult<mpsc::Receiver<StreamChunk>>;

    /// Non-streaming generation with tool definitions offered to the
    /// model; used by the planner and by sub-agents that need a single
    /// turn rather than incremental text.
    async fn generate_with_tools(
        &self,
        request: ToolGenerationRequest,
    ) -> LlmResult<ToolGenerationResult>;
}
