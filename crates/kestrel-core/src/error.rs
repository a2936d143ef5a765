//! Crate-wide error types.
//!
//! Domain errors that cross a module boundary and are matched on by callers
//! use `thiserror`; glue code that only needs to propagate uses `anyhow`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KestrelError>;

#[derive(Debug, Error)]
pub enum KestrelError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error("guardrail denied: {0}")]
    GuardrailDenied(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("planner error: {0}")]
    Planner(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
