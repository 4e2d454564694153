use inkflow_core::{InkflowError, InkflowResult};
use inkflow_orchestrator::InkflowConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// A simulated agent declared under `[[agents]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoAgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Sleep per simulated step.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_steps")]
    pub steps: u8,
    /// Task types this agent always fails.
    #[serde(default)]
    pub fail_task_types: Vec<String>,
}

fn default_delay_ms() -> u64 {
    200
}

fn default_steps() -> u8 {
    4
}

impl DemoAgentConfig {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            delay_ms: default_delay_ms(),
            steps: default_steps(),
            fail_task_types: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_agents() -> Vec<DemoAgentConfig> {
    vec![
        DemoAgentConfig::new("planner", "Planner"),
        DemoAgentConfig::new("writer", "Writer"),
        DemoAgentConfig::new("editor", "Editor"),
    ]
}

/// Contents of `inkflow.toml`: runtime settings plus the demo agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub runtime: InkflowConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<DemoAgentConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: InkflowConfig::default(),
            agents: default_agents(),
        }
    }
}

impl AppConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> InkflowResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let config = Self::from_toml_str(&text)?;
                info!(path = %path.display(), agents = config.agents.len(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(InkflowError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))),
        }
    }

    pub fn from_toml_str(input: &str) -> InkflowResult<Self> {
        let config: AppConfig = toml::from_str(input)
            .map_err(|e| InkflowError::Config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InkflowResult<()> {
        self.runtime.validate()?;
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(InkflowError::Config("agent id must not be empty".to_string()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(InkflowError::Config(format!(
                    "agent '{}' is declared twice",
                    agent.id
                )));
            }
            if agent.steps == 0 {
                return Err(InkflowError::Config(format!(
                    "agent '{}' needs at least one step",
                    agent.id
                )));
            }
        }
        Ok(())
    }
}
