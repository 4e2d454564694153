use inkflow_core::{InkflowError, InkflowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Task queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Permits in the concurrency pool; fixed for the queue's lifetime.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-subscriber buffer of the event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Fail tasks whose handler runs longer than this.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_event_capacity() -> usize {
    256
}

impl QueueConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = Some(secs);
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            event_capacity: default_event_capacity(),
            task_timeout_secs: None,
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound between two workflow progress ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cancel and fail workflows that run longer than this.
    #[serde(default)]
    pub workflow_timeout_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl EngineConfig {
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_workflow_timeout_secs(mut self, secs: u64) -> Self {
        self.workflow_timeout_secs = Some(secs);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn workflow_timeout(&self) -> Option<Duration> {
        self.workflow_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            workflow_timeout_secs: None,
        }
    }
}

/// Combined runtime configuration, usually read from `inkflow.toml`:
///
/// ```toml
/// [queue]
/// max_concurrency = 4
/// task_timeout_secs = 120
///
/// [engine]
/// poll_interval_ms = 250
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InkflowConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl InkflowConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> InkflowResult<Self> {
        let config: InkflowConfig = toml::from_str(input)
            .map_err(|e| InkflowError::Config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> InkflowResult<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> InkflowResult<()> {
        if self.queue.max_concurrency == 0 {
            return Err(InkflowError::Config(
                "queue.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue.event_capacity == 0 {
            return Err(InkflowError::Config(
                "queue.event_capacity must be at least 1".to_string(),
            ));
        }
        if self.queue.task_timeout_secs == Some(0) {
            return Err(InkflowError::Config(
                "queue.task_timeout_secs must be positive".to_string(),
            ));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(InkflowError::Config(
                "engine.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.engine.workflow_timeout_secs == Some(0) {
            return Err(InkflowError::Config(
                "engine.workflow_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
