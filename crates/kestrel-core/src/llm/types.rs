//! Provider-agnostic message and generation types (spec.md §6).
//!
//! These are wire types for talking to whatever LLM sits behind
//! `LlmProvider`, distinct from `types::task`/`types::event`, which model
//! this core's own persisted and emitted state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: which tool call this is answering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool definition as offered to the model, independent of this core's
/// own `types::tool::ToolDefinition` (which also carries risk/category).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// A tool invocation the model requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON-string arguments, per spec.md §6 — the caller parses.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ToolGenerationRequest {
    pub base: GenerationRequest,
    pub tools: Vec<ToolSpec>,
}

/// Result of a tool-calling generation: the model's prose plus any tool
/// calls it asked for, in the same turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolGenerationResult {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// One unit of a streaming text generation.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Done,
}
