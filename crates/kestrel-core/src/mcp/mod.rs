//! MCP (Model Context Protocol) client support (spec.md §4.2).
//!
//! Local servers are spawned over stdio and speak JSON-RPC directly; remote
//! servers are resolved from `.mcp.json` and handed off to whatever upstream
//! connector the host configures. Tools surfaced by connected servers are
//! wrapped as [`tool::McpTool`] and registered onto the shared tool registry
//! alongside the built-ins.

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod tool;
pub mod transport;

pub use client::McpClient;
pub use config::{McpConfig, McpServerConfig, RemoteMcpServer};
pub use manager::{McpManager, McpServerInfo, McpServerStatus};
pub use protocol::{McpContent, McpToolDef, McpToolResult};
pub use tool::{register_mcp_tools, McpTool};
