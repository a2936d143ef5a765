//! Built-in tool implementations.
//!
//! - file_read / file_write / list_files: sandboxed filesystem access
//! - code_execute: shell command execution with streaming output
//! - processes: inspect/kill background processes spawned by code_execute
//! - skill: load a skill's instructions
//! - ask_human / task_complete / step_complete: control tools intercepted
//!   by the task loop before reaching the registry

pub mod ask_user;
pub mod bash;
pub mod list;
pub mod processes;
pub mod read;
pub mod skill;
pub mod task_complete;
pub mod write;

pub use ask_user::AskUserQuestionTool;
pub use bash::BashTool;
pub use list::ListTool;
pub use processes::ProcessesTool;
pub use read::ReadTool;
pub use skill::SkillTool;
pub use task_complete::{StepCompleteTool, TaskCompleteTool};
pub use write::WriteTool;

use std::sync::Arc;

use crate::tools::registry::ToolRegistry;

/// Register every built-in tool on the root registry.
pub async fn register_all_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(ReadTool)).await;
    registry.register(Arc::new(WriteTool)).await;
    registry.register(Arc::new(ListTool)).await;
    registry.register(Arc::new(BashTool)).await;
    registry.register(Arc::new(ProcessesTool)).await;
    registry.register(Arc::new(SkillTool)).await;
    registry.register(Arc::new(AskUserQuestionTool)).await;
    registry.register(Arc::new(TaskCompleteTool)).await;
    registry.register(Arc::new(StepCompleteTool)).await;
}
