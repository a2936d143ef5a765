//! LLM provider contract (spec.md §6) and one concrete HTTP-based
//! implementation. Planner, diagnostics, context compaction and the
//! agent loop depend only on `LlmProvider`, never on `HttpProvider`
//! directly, so a different provider can be swapped in without touching
//! those modules.

pub mod http_provider;
pub mod provider;
pub mod types;

pub use http_provider::{HttpProvider, HttpProviderConfig};
pub use provider::{LlmError, LlmProvider, LlmResult};
pub use types::{
    GenerationRequest, Message, Role, StreamChunk, ToolCallRequest, ToolGenerationRequest,
    ToolGenerationResult, ToolSpec,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_expected_roles() {
        assert_eq!(Message::system("go").role, Role::System);
        assert_eq!(Message::user("go").role, Role::User);
        assert_eq!(Message::assistant("go").role, Role::Assistant);

        let tool_msg = Message::tool_result("call-1", "ok");
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }
}
