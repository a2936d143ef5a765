//! MCP Manager - manages local MCP server connections
//!
//! Simple manager for local stdio servers. Remote servers are handled
//! by passing them to the Anthropic API's MCP Connector.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::{is_transport_error, McpClient};
use super::config::{McpConfig, McpServerConfig, RemoteMcpServer};
use super::protocol::{McpToolDef, McpToolResult};

/// Interval of the background health sweep (spec.md §4.2).
const HEALTH_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server status
#[derive(Debug, Clone, PartialEq)]
pub enum McpServerStatus {
    Disconnected,
    Connected,
    Error(String),
}

impl std::fmt::Display for McpServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpServerStatus::Disconnected => write!(f, "disconnected"),
            McpServerStatus::Connected => write!(f, "connected"),
            McpServerStatus::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Server info for UI
#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub server_type: String, // "stdio" or "remote"
    pub status: McpServerStatus,
    pub tool_count: usize,
    pub tools: Vec<McpToolDef>,
    pub error: Option<String>,
}

/// MCP Manager
pub struct McpManager {
    /// Connected local clients
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    /// Server configurations
    configs: RwLock<HashMap<String, McpServerConfig>>,
    /// Remote servers (for API)
    remote_servers: RwLock<Vec<RemoteMcpServer>>,
    /// Working directory
    working_dir: PathBuf,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            remote_servers: RwLock::new(Vec::new()),
            working_dir,
        }
    }

    /// Load configuration from .mcp.json
    pub async fn load_config(&self) -> Result<()> {
        let config = McpConfig::load(&self.working_dir).await?;

        let mut configs = self.configs.write().await;
        *configs = config.servers().await;

        // Store remote servers for API
        *self.remote_servers.write().await = config.remote_servers_for_api().await;

        let local_count = configs.values().filter(|c| c.is_local()).count();
        let remote_count = configs.values().filter(|c| c.is_remote()).count();

        info!(
            "Loaded MCP config: {} local, {} remote servers",
            local_count, remote_count
        );

        Ok(())
    }

    /// Connect to all local servers in parallel
    pub async fn connect_all(&self) -> Result<()> {
        let configs: Vec<_> = {
            let configs = self.configs.read().await;
            configs
                .iter()
                .filter(|(_, c)| c.is_local())
                .map(|(n, c)| (n.clone(), c.clone()))
                .collect()
        };

        if configs.is_empty() {
            return Ok(());
        }

        info!(
            "Connecting to {} local MCP servers in parallel",
            configs.len()
        );

        // Connect to all servers in parallel
        let connect_futures: Vec<_> = configs
            .iter()
            .map(|(name, _)| {
                let name = name.clone();
                async move {
                    info!("Attempting to connect to MCP server: {}", name);
                    (name.clone(), self.connect(&name).await)
                }
            })
            .collect();

        let results = futures::future::join_all(connect_futures).await;

        for (name, result) in results {
            if let Err(e) = result {
                warn!("Failed to connect to MCP server {}: {:?}", name, e);
            }
        }

        Ok(())
    }

    /// Connect to a specific local server
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = {
            let configs = self.configs.read().await;
            configs.get(name).cloned()
        };

        let Some(config) = config else {
            return Err(anyhow::anyhow!("Unknown server: {}", name));
        };

        if config.is_remote() {
            return Err(anyhow::anyhow!(
                "Server {} is remote - handled by Anthropic API",
                name
            ));
        }

        // Disconnect first if already connected
        self.disconnect(name).await;

        // Connect
        let client = McpClient::connect(name, &config, &self.working_dir).await?;

        // Initialize
        client.initialize().await?;

        // Get tools
        client.list_tools().await?;

        let client = Arc::new(client);
        self.clients.write().await.insert(name.to_string(), client);

        info!("Connected to MCP server: {}", name);
        Ok(())
    }

    /// Disconnect from a server
    pub async fn disconnect(&self, name: &str) {
        if let Some(client) = self.clients.write().await.remove(name) {
            client.disconnect().await;
            info!("Disconnected from MCP server: {}", name);
        }
    }

    /// Get all tools from connected local servers
    pub async fn get_all_tools(&self) -> Vec<(String, McpToolDef)> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();

        for (name, client) in clients.iter() {
            for tool in client.get_tools().await {
                tools.push((name.clone(), tool));
            }
        }

        tools
    }

    /// Call a tool on a local server. One retry across a reconnect for
    /// transport errors (broken pipe, dead process); semantic JSON-RPC
    /// errors from the server are returned immediately (spec.md §4.2).
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<McpToolResult> {
        let client = self
            .get_client(server)
            .await
            .ok_or_else(|| anyhow::anyhow!("Server not connected: {}", server))?;

        match client.call_tool(tool, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if is_transport_error(&e) => {
                warn!("MCP {} call_tool transport error, reconnecting: {}", server, e);
                self.connect(server).await?;
                let client = self
                    .get_client(server)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("Server not connected: {}", server))?;
                client.call_tool(tool, arguments).await
            }
            Err(e) => Err(e),
        }
    }

    /// Get server info for UI
    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let configs = self.configs.read().await;
        let clients = self.clients.read().await;

        let mut servers = Vec::new();

        for (name, config) in configs.iter() {
            let (status, tool_count, tools, error) = if config.is_local() {
                if let Some(client) = clients.get(name) {
                    let t = client.get_tools().await;
                    if client.is_alive().await {
                        (McpServerStatus::Connected, t.len(), t, None)
                    } else {
                        (
                            McpServerStatus::Error("Process died".to_string()),
                            0,
                            Vec::new(),
                            Some("Process died".to_string()),
                        )
                    }
                } else {
                    (McpServerStatus::Disconnected, 0, Vec::new(), None)
                }
            } else {
                // Remote servers are always "connected" (handled by API)
                (McpServerStatus::Connected, 0, Vec::new(), None)
            };

            servers.push(McpServerInfo {
                name: name.clone(),
                server_type: config.transport_type().to_string(),
                status,
                tool_count,
                tools,
                error,
            });
        }

        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    /// Get remote servers for Anthropic API
    pub async fn get_remote_servers(&self) -> Vec<RemoteMcpServer> {
        self.remote_servers.read().await.clone()
    }

    /// Check if any servers are configured
    pub async fn has_servers(&self) -> bool {
        !self.configs.read().await.is_empty()
    }

    /// Get a connected client, reconnecting automatically for a
    /// known-but-disconnected entry: a dead process, or a previously
    /// connected client that discovered zero tools (likely missing auth,
    /// spec.md §4.2).
    pub async fn get_client(&self, name: &str) -> Option<Arc<McpClient>> {
        if let Some(client) = self.clients.read().await.get(name).cloned() {
            if client.is_alive().await && !client.get_tools().await.is_empty() {
                return Some(client);
            }
            info!("MCP {} is stale (dead or toolless), reconnecting", name);
        } else if !self.configs.read().await.contains_key(name) {
            return None;
        }

        match self.connect(name).await {
            Ok(()) => self.clients.read().await.get(name).cloned(),
            Err(e) => {
                warn!("MCP {} auto-reconnect failed: {}", name, e);
                None
            }
        }
    }

    /// Forces a reconnect if `env` differs from the environment the
    /// server is currently running with (credentials changed), then
    /// returns the client via the normal auto-reconnect path.
    pub async fn get_client_with_env(
        &self,
        name: &str,
        env: &HashMap<String, String>,
    ) -> Option<Arc<McpClient>> {
        let changed = matches!(
            self.configs.read().await.get(name),
            Some(McpServerConfig::Local { env: configured, .. }) if configured != env
        );

        if changed {
            let updated = self.configs.read().await.get(name).and_then(|c| match c {
                McpServerConfig::Local { command, args, .. } => Some(McpServerConfig::Local {
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                }),
                McpServerConfig::Remote { .. } => None,
            });
            if let Some(updated) = updated {
                self.configs.write().await.insert(name.to_string(), updated);
            }
            self.disconnect(name).await;
        }

        self.get_client(name).await
    }

    /// Background ~60s sweep (spec.md §4.2): revives dead connections,
    /// dropping any entry that fails to reconnect so the pool never holds
    /// a client to a process that no longer exists.
    pub fn spawn_health_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEALTH_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                self.sweep_unhealthy().await;
            }
        })
    }

    async fn sweep_unhealthy(&self) {
        let names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for name in names {
            let alive = match self.clients.read().await.get(&name) {
                Some(client) => client.is_alive().await,
                None => continue,
            };
            if alive {
                continue;
            }
            warn!("MCP {} health sweep: process dead, attempting revival", name);
            if self.connect(&name).await.is_err() {
                warn!("MCP {} health sweep: revival failed, dropping", name);
                self.disconnect(&name).await;
            }
        }
    }
}
