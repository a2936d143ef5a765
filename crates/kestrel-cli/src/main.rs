//! Thin demo runner for the Kestrel Agent Execution Core.
//!
//! Wires up the tool registry, guardrails and skills manager and exposes
//! a handful of subcommands for exercising them directly, without needing
//! the full HTTP/SSE gateway the core is designed to sit behind.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kestrel_core::guardrails::{ApprovalMemory, Guardrails};
use kestrel_core::tools::{register_all_tools, ToolContext, ToolRegistry};
use kestrel_core::types::task::GuardrailConfig;
use kestrel_core::types::tool::RiskLevel;
use kestrel_core::{paths, RuntimeConfig};
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Kestrel agent execution core demo runner", long_about = None)]
struct Cli {
    /// Path to a RuntimeConfig TOML file; falls back to local defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered tool's name, risk level and schema.
    Tools,
    /// List instruction skills available in the configured skills directory.
    Skills,
    /// Invoke a single tool directly, passing its decision through
    /// guardrails first.
    Exec {
        /// Registered tool name, e.g. `file_read`.
        tool: String,
        /// JSON object of arguments for the tool.
        #[arg(default_value = "{}")]
        args: String,
        /// Task id guardrails track rate limiting and budgets against.
        #[arg(long, default_value = "demo-task")]
        task_id: String,
        /// Workspace id approval-pattern memory is scoped to.
        #[arg(long, default_value = "demo-workspace")]
        workspace_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_ansi(false)
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::local_default(),
    };

    let registry = ToolRegistry::new();
    register_all_tools(&registry).await;

    match cli.command {
        Commands::Tools => {
            for def in registry.definitions().await {
                println!(
                    "{:<16} risk={:<8} approval={:<5} {}",
                    def.name, format!("{:?}", def.risk), def.requires_approval, def.description
                );
            }
        }
        Commands::Skills => {
            let manager = kestrel_core::skills::SkillsManager::with_defaults(&config.workspace_root);
            for info in manager.list_skills() {
                println!("{:<20} [{}] {}", info.name, info.source, info.description);
            }
        }
        Commands::Exec {
            tool,
            args,
            task_id,
            workspace_id,
        } => {
            let params: serde_json::Value = serde_json::from_str(&args)?;
            let guardrails = Guardrails::new(Arc::new(ApprovalMemory::new(None)));

            let risk = match registry.get(&tool).await {
                Some(t) => t.risk(),
                None => RiskLevel::High,
            };

            let guardrail_config = GuardrailConfig {
                max_iterations: config.guardrails.max_iterations,
                max_tool_calls: config.guardrails.max_tool_calls,
                max_tokens: config.guardrails.max_tokens,
                auto_approve_risk: config.guardrails.auto_approve_risk,
                always_approve: Vec::new(),
                extra_blocked_patterns: Vec::new(),
            };
            let decision = guardrails.evaluate(
                &task_id,
                &workspace_id,
                &tool,
                &params,
                risk,
                &guardrail_config,
            );
            println!("guardrail decision: {decision:?}");

            if matches!(decision, kestrel_core::guardrails::Decision::Blocked { .. }) {
                return Ok(());
            }

            let ctx = ToolContext::default()
                .with_sandbox(config.workspace_root.clone())
                .with_skills_manager(Arc::new(RwLock::new(
                    kestrel_core::skills::SkillsManager::with_defaults(&config.workspace_root),
                )));

            match registry.execute(&tool, params, &ctx).await {
                Some(result) => println!("{}", result.output),
                None => eprintln!("unknown tool: {tool}"),
            }
        }
    }

    Ok(())
}
