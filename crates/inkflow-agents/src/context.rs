use inkflow_core::{TaskId, WorkflowId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// Everything an agent gets to see about the task it is executing.
///
/// Progress reports and the cancellation flag are wired back to the task
/// queue that dispatched the task. A context built with [`TaskContext::new`]
/// is detached: progress goes nowhere and it is never cancelled.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub workflow_id: Option<WorkflowId>,
    pub task_type: String,
    pub parameters: HashMap<String, serde_json::Value>,
    progress: Option<ProgressSink>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        task_type: impl Into<String>,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            workflow_id: None,
            task_type: task_type.into(),
            parameters,
            progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_workflow(mut self, workflow_id: Option<WorkflowId>) -> Self {
        self.workflow_id = workflow_id;
        self
    }

    /// Route progress reports to `sink`.
    pub fn with_progress_sink(mut self, sink: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Share a cancellation flag with the dispatcher.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Report progress in percent.
    ///
    /// Values are capped at 99; only the dispatcher marks a task 100% done.
    /// Reports lower than the current progress are ignored downstream.
    pub fn report_progress(&self, percent: u8) {
        if let Some(sink) = &self.progress {
            sink(percent.min(99));
        }
    }

    /// Whether the task has been cancelled since it started.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("workflow_id", &self.workflow_id)
            .field("task_type", &self.task_type)
            .field("parameters", &self.parameters)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
