use crate::context::TaskContext;
use inkflow_core::{AgentId, InkflowResult, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Availability of an agent as reported by the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready to accept work.
    Idle,
    /// Currently executing at least one task.
    Busy,
    /// Last execution ended in an error.
    Error,
    /// Not accepting work.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Notification emitted by an agent on its own event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The agent moved to a new [`AgentStatus`].
    StatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
    },
    /// The agent finished a task it was handed.
    TaskCompleted {
        agent_id: AgentId,
        task_id: TaskId,
        success: bool,
    },
}

/// Outcome of a single task execution as produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    /// Primary output (generated text, structured document, ...).
    #[serde(default)]
    pub output: serde_json::Value,
    /// Secondary named values.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TaskResult {
    /// A successful result carrying `output`.
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: HashMap::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// A failed result carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            data: HashMap::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// An executor capable of performing typed tasks.
///
/// The task queue looks agents up by [`Agent::id`] and hands every task
/// targeted at that id to [`Agent::execute`]. Returning `Err`, or `Ok` with
/// `success == false`, fails the task; the queue itself keeps running.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier that tasks reference as their target.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    fn status(&self) -> AgentStatus {
        AgentStatus::Idle
    }

    /// Perform the task described by `ctx`.
    ///
    /// Long-running implementations should call [`TaskContext::report_progress`]
    /// and check [`TaskContext::is_cancelled`] between steps.
    async fn execute(&self, ctx: TaskContext) -> InkflowResult<TaskResult>;

    /// The agent's own status/completion event stream, if it has one.
    fn subscribe(&self) -> Option<broadcast::Receiver<AgentEvent>> {
        None
    }
}
