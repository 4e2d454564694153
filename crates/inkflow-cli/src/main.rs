mod agents;
mod config;

use agents::SimulatedAgent;
use clap::{Parser, Subcommand};
use config::AppConfig;
use inkflow_agents::AgentRegistry;
use inkflow_orchestrator::{WorkflowEngine, WorkflowTemplate};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inkflow", about = "Inkflow — workflow runner for novel-writing agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "inkflow.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow template with the configured demo agents
    Run {
        /// Template name (see `inkflow templates`)
        template: String,
        /// Template parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
    /// List available workflow templates
    Templates,
    /// Load and validate the config file
    Validate,
}

/// Parse `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { template, params } => {
            let config = AppConfig::load(&cli.config).await?;

            let registry = Arc::new(AgentRegistry::new());
            let engine = WorkflowEngine::from_config(registry, &config.runtime);
            for agent in &config.agents {
                engine
                    .register_agent(Arc::new(SimulatedAgent::from_config(agent)))
                    .await;
            }
            info!(agents = config.agents.len(), "Demo agents registered");

            let params: HashMap<String, serde_json::Value> = params.into_iter().collect();
            let workflow = engine.create_predefined_workflow(&template, params).await?;
            let result = engine.execute_workflow(workflow).await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success {
                anyhow::bail!(
                    "workflow {}: {}",
                    result.status,
                    result.error_message.as_deref().unwrap_or("no details")
                );
            }
        }
        Commands::Templates => {
            println!("Available templates:");
            for template in WorkflowTemplate::all() {
                println!("  {} — {}", template.name(), template.description());
                println!("    {}", template.shape());
            }
        }
        Commands::Validate => {
            let config = AppConfig::load(&cli.config).await?;
            println!(
                "Configuration OK: {} agent(s), max_concurrency {}, poll interval {} ms",
                config.agents.len(),
                config.runtime.queue.max_concurrency,
                config.runtime.engine.poll_interval_ms
            );
            for agent in &config.agents {
                println!("  {} ({})", agent.id, agent.display_name());
            }
        }
    }

    Ok(())
}
