use crate::types::{TaskStatus, WorkflowStatus, WorkflowTask};
use inkflow_agents::AgentEvent;
use inkflow_core::{EventBus, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Bus shared by a task queue and the engines built on top of it.
pub type OrchestrationBus = EventBus<OrchestrationEvent>;

/// Task, workflow and agent notifications for logging and UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A task entered a new status.
    TaskStatusChanged {
        task_id: TaskId,
        workflow_id: Option<WorkflowId>,
        name: String,
        status: TaskStatus,
        progress: u8,
        error: Option<String>,
    },
    /// A running task reported progress.
    TaskProgress {
        task_id: TaskId,
        workflow_id: Option<WorkflowId>,
        progress: u8,
    },
    /// A workflow changed status or advanced; emitted on every engine tick.
    WorkflowStatusChanged {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        progress: f64,
    },
    /// An event forwarded from a registered agent's own stream.
    AgentActivity { agent: AgentEvent },
}

impl OrchestrationEvent {
    pub(crate) fn task_changed(task: &WorkflowTask) -> Self {
        OrchestrationEvent::TaskStatusChanged {
            task_id: task.id,
            workflow_id: task.workflow_id,
            name: task.name.clone(),
            status: task.status,
            progress: task.progress,
            error: task.error_message.clone(),
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            OrchestrationEvent::TaskStatusChanged { task_id, .. }
            | OrchestrationEvent::TaskProgress { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    pub fn workflow_id(&self) -> Option<WorkflowId> {
        match self {
            OrchestrationEvent::TaskStatusChanged { workflow_id, .. }
            | OrchestrationEvent::TaskProgress { workflow_id, .. } => *workflow_id,
            OrchestrationEvent::WorkflowStatusChanged { workflow_id, .. } => Some(*workflow_id),
            OrchestrationEvent::AgentActivity { .. } => None,
        }
    }
}
