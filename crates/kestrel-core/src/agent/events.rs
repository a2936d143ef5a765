//! External inputs the task loop suspends on: the counterpart to the
//! `types::event::Event`s it emits. An approval or an `ask_human` call
//! parks the loop until one of these arrives or the suspension times out.

/// Input delivered back into a running loop from outside (an operator
/// resolving an approval, answering an `ask_human` question, or
/// cancelling the task).
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// An `ApprovalRequest` raised by Guardrails was resolved.
    ApprovalResolved { approval_id: String, approved: bool },
    /// A human answered an `ask_human` question.
    UserResponse { tool_call_id: String, response: String },
    /// Cooperative cancellation: the next suspension point returns.
    Cancel,
}
