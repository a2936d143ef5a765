//! Skills: user-facing instruction documents plus the executable skill
//! gateway (spec.md §4.11).
//!
//! Two distinct things share this module:
//! - Instruction skills: `SKILL.md` files loaded from `~/.kestrel/skills`
//!   or `<workspace>/.kestrel/skills`, surfaced to the model as guidance
//!   text through the `skill` tool.
//! - Executable skills: user-authored `run(args)` code, validated and
//!   persisted via `create_skill`, then registered as a dynamic tool that
//!   dispatches to an external sandbox RPC rather than running in-process.

mod exec_tool;
mod loader;
mod manager;
mod sandbox;
mod skill;
mod validate;

pub use exec_tool::{register_skill_tools, SkillExecTool};
pub use loader::{load_skill, load_skill_file, scaffold_skill};
pub use manager::{SkillStore, SkillsManager};
pub use sandbox::{ResourceLimits, SandboxClient, SandboxRunRequest, SandboxRunResult, SandboxStatus};
pub use skill::{valid_skill_name, Skill, SkillInfo, SkillRecord, SkillSource};
pub use validate::validate_skill_manifest;
