use chrono::{DateTime, Utc};
use inkflow_agents::TaskResult;
use inkflow_core::{AgentId, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lowest accepted task priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted task priority (most urgent).
pub const MAX_PRIORITY: u8 = 10;
/// Priority assigned when none is given.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Status of a task in the execution queue.
///
/// `Pending → Running → {Completed | Failed | Cancelled}`, with `Cancelled`
/// also reachable from `Pending`. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A schedulable unit of work targeted at one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: TaskId,
    pub name: String,
    /// Handler key interpreted by the target agent (e.g. `outline`, `draft`).
    pub task_type: String,
    /// Agent the task is dispatched to. Empty means no handler: the task
    /// completes automatically.
    pub target_agent_id: AgentId,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    /// Percent complete, 0–100.
    pub progress: u8,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Tasks that must be `Completed` before this one may start.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// 1–10, higher runs first.
    pub priority: u8,
    /// Workflow this task was submitted under, if any.
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
}

impl WorkflowTask {
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        target_agent_id: impl Into<AgentId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task_type: task_type.into(),
            target_agent_id: target_agent_id.into(),
            parameters: HashMap::new(),
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            dependencies: Vec::new(),
            priority: DEFAULT_PRIORITY,
            workflow_id: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the priority, clamped to `1..=10`.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Whether the task is pending and every dependency satisfies `is_completed`.
    pub fn is_ready(&self, is_completed: impl Fn(&TaskId) -> bool) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.iter().all(is_completed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time between start and completion, if both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Clear any execution state so the task can be (re)submitted.
    pub(crate) fn reset_for_enqueue(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    /// Status flag only; tasks already queued keep running.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An ordered set of tasks executed as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub version: String,
    pub tasks: Vec<WorkflowTask>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `(completed + failed) / total × 100`.
    pub progress: f64,
    #[serde(default)]
    pub configuration: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: "1.0".to_string(),
            tasks: Vec::new(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            configuration: HashMap::new(),
            error_message: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_configuration(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Append a task and return its id.
    pub fn add_task(&mut self, task: WorkflowTask) -> TaskId {
        let id = task.id;
        self.tasks.push(task);
        id
    }

    pub fn task(&self, id: TaskId) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_by_name(&self, name: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Progress derived from the current task statuses.
    pub fn compute_progress(&self) -> f64 {
        progress_of(&self.tasks)
    }
}

/// `(completed + failed) / total × 100`; an empty set counts as 0.
pub(crate) fn progress_of(tasks: &[WorkflowTask]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let finished = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
        .count();
    finished as f64 / tasks.len() as f64 * 100.0
}

/// Read-only snapshot of a task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueStatus {
    pub pending_tasks: usize,
    pub running_tasks: usize,
    /// Tasks in a terminal state (completed, failed or cancelled).
    pub completed_tasks: usize,
    pub max_concurrency: usize,
    pub is_processing: bool,
}

/// Aggregated outcome of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub workflow_id: WorkflowId,
    pub is_success: bool,
    pub status: WorkflowStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub elapsed_ms: u64,
    /// Results of every task that produced one, including failed tasks whose
    /// agent returned a failure result.
    pub task_results: HashMap<TaskId, TaskResult>,
    /// Final snapshot of every member task.
    pub tasks: Vec<WorkflowTask>,
    pub error_message: Option<String>,
}

impl WorkflowExecutionResult {
    /// Build a result from the final task snapshot.
    pub(crate) fn from_tasks(
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        tasks: Vec<WorkflowTask>,
        elapsed_ms: u64,
        error_message: Option<String>,
    ) -> Self {
        let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
        let completed_tasks = count(TaskStatus::Completed);
        let failed_tasks = count(TaskStatus::Failed);
        let cancelled_tasks = count(TaskStatus::Cancelled);
        let task_results = tasks
            .iter()
            .filter_map(|t| t.result.clone().map(|r| (t.id, r)))
            .collect();

        Self {
            workflow_id,
            is_success: status == WorkflowStatus::Completed,
            status,
            total_tasks: tasks.len(),
            completed_tasks,
            failed_tasks,
            cancelled_tasks,
            elapsed_ms,
            task_results,
            tasks,
            error_message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = WorkflowTask::new("Outline chapter 3", "outline", "planner");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.target_agent_id, "planner");
        assert!(task.dependencies.is_empty());
        assert!(task.result.is_none());
        assert!(task.workflow_id.is_none());
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(WorkflowTask::new("a", "t", "x").with_priority(0).priority, 1);
        assert_eq!(WorkflowTask::new("a", "t", "x").with_priority(42).priority, 10);
        assert_eq!(WorkflowTask::new("a", "t", "x").with_priority(7).priority, 7);
    }

    #[test]
    fn test_task_is_ready_with_deps() {
        let dep_id = Uuid::new_v4();
        let task = WorkflowTask::new("Draft", "draft", "writer").with_dependencies(vec![dep_id]);
        assert!(!task.is_ready(|_| false));
        assert!(task.is_ready(|id| *id == dep_id));
    }

    #[test]
    fn test_task_not_ready_when_running() {
        let mut task = WorkflowTask::new("Polish", "polish", "editor");
        task.status = TaskStatus::Running;
        assert!(!task.is_ready(|_| true));
    }

    #[test]
    fn test_reset_for_enqueue() {
        let mut task = WorkflowTask::new("Draft", "draft", "writer");
        task.status = TaskStatus::Failed;
        task.progress = 60;
        task.error_message = Some("boom".into());
        task.started_at = Some(Utc::now());
        task.completed_at = Some(Utc::now());

        task.reset_for_enqueue();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.error_message.is_none());
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());

        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_workflow_progress() {
        let mut wf = WorkflowDefinition::new("Chapter 1");
        assert_eq!(wf.compute_progress(), 0.0);

        wf.add_task(WorkflowTask::new("a", "outline", "planner"));
        wf.add_task(WorkflowTask::new("b", "draft", "writer"));
        wf.add_task(WorkflowTask::new("c", "polish", "editor"));
        wf.add_task(WorkflowTask::new("d", "polish", "editor"));
        wf.tasks[0].status = TaskStatus::Completed;
        wf.tasks[1].status = TaskStatus::Failed;
        wf.tasks[2].status = TaskStatus::Cancelled;

        assert_eq!(wf.compute_progress(), 50.0);
    }

    #[test]
    fn test_workflow_task_lookup() {
        let mut wf = WorkflowDefinition::new("Lookup").with_version("2.1");
        let id = wf.add_task(WorkflowTask::new("outline", "outline", "planner"));
        assert_eq!(wf.version, "2.1");
        assert_eq!(wf.task(id).unwrap().name, "outline");
        assert_eq!(wf.task_by_name("outline").unwrap().id, id);
        assert!(wf.task(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_execution_result_aggregation() {
        let workflow_id = Uuid::new_v4();
        let mut done = WorkflowTask::new("a", "draft", "writer");
        done.status = TaskStatus::Completed;
        done.result = Some(TaskResult::success("text"));
        let mut failed = WorkflowTask::new("b", "draft", "writer");
        failed.status = TaskStatus::Failed;
        failed.error_message = Some("boom".into());

        let result = WorkflowExecutionResult::from_tasks(
            workflow_id,
            WorkflowStatus::Failed,
            vec![done.clone(), failed],
            25,
            Some("1 of 2 tasks failed".into()),
        );

        assert!(!result.is_success);
        assert_eq!(result.total_tasks, 2);
        assert_eq!(result.completed_tasks, 1);
        assert_eq!(result.failed_tasks, 1);
        assert_eq!(result.cancelled_tasks, 0);
        assert_eq!(result.task_results.len(), 1);
        assert!(result.task_results[&done.id].success);
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let parsed: WorkflowStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, WorkflowStatus::Paused);
    }
}
