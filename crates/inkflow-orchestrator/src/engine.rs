use crate::config::{EngineConfig, InkflowConfig};
use crate::events::OrchestrationEvent;
use crate::task_queue::TaskQueue;
use crate::templates::{ContextProvider, WorkflowTemplate};
use crate::types::{
    progress_of, TaskStatus, WorkflowDefinition, WorkflowExecutionResult, WorkflowStatus,
    WorkflowTask,
};
use chrono::Utc;
use inkflow_agents::{Agent, AgentEvent, AgentRegistry};
use inkflow_core::{AgentId, InkflowError, InkflowResult, TaskId, WorkflowId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs workflow definitions on a shared [`TaskQueue`].
///
/// `execute_workflow` validates the definition, submits every task in one
/// batch and waits until all of them are terminal, then aggregates a
/// [`WorkflowExecutionResult`]. Errors never escape: they are reported as a
/// `Failed` result with an error message. Several workflows may run on the
/// same engine concurrently; they share only the queue and agent registry.
pub struct WorkflowEngine {
    queue: TaskQueue,
    config: EngineConfig,
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowDefinition>>>,
    /// Workflows whose `execute_workflow` call has not returned yet.
    executing: parking_lot::Mutex<HashSet<WorkflowId>>,
    agent_listeners: parking_lot::Mutex<HashMap<AgentId, JoinHandle<()>>>,
    context_provider: Option<Arc<dyn ContextProvider>>,
}

impl WorkflowEngine {
    /// Create an engine that submits work to `queue`.
    pub fn new(queue: TaskQueue, config: EngineConfig) -> Self {
        Self {
            queue,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            executing: parking_lot::Mutex::new(HashSet::new()),
            agent_listeners: parking_lot::Mutex::new(HashMap::new()),
            context_provider: None,
        }
    }

    /// Build a queue and engine over `registry` from a combined configuration.
    pub fn from_config(registry: Arc<AgentRegistry>, config: &InkflowConfig) -> Self {
        let queue = TaskQueue::new(registry, config.queue.clone());
        Self::new(queue, config.engine.clone())
    }

    /// Attach a provider whose context is merged into template parameters.
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    /// The queue this engine submits to.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The agent registry shared with the queue.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.queue.registry()
    }

    /// Subscribe to task, workflow and forwarded agent events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.queue.subscribe()
    }

    /// Register an agent and forward its own events to the engine bus.
    ///
    /// Returns `true` if the id was not registered before. Registering the
    /// same id again replaces the handle and its event forwarder.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> bool {
        let agent_id = agent.id().to_string();
        let receiver = agent.subscribe();
        let newly_added = self.registry().register(agent).is_none();

        let mut listeners = self.agent_listeners.lock();
        if let Some(previous) = listeners.remove(&agent_id) {
            previous.abort();
        }
        if let Some(rx) = receiver {
            let handle = tokio::spawn(forward_agent_events(
                agent_id.clone(),
                rx,
                self.queue.events().clone(),
            ));
            listeners.insert(agent_id, handle);
        }
        newly_added
    }

    /// Unregister an agent and stop forwarding its events.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        if let Some(handle) = self.agent_listeners.lock().remove(agent_id) {
            handle.abort();
        }
        self.registry().unregister(agent_id).is_some()
    }

    /// Execute a workflow to completion.
    ///
    /// Every task must target a registered agent (or none); otherwise nothing
    /// is submitted and the result is `Failed`. A definition whose id belongs
    /// to a workflow that is still active is rejected the same way.
    pub async fn execute_workflow(&self, definition: WorkflowDefinition) -> WorkflowExecutionResult {
        let started = Instant::now();
        let workflow_id = definition.id;

        {
            let mut workflows = self.workflows.write().await;
            let mut executing = self.executing.lock();
            if executing.contains(&workflow_id)
                || workflows
                    .get(&workflow_id)
                    .is_some_and(|existing| !existing.status.is_terminal())
            {
                warn!(workflow_id = %workflow_id, "Workflow is already active");
                return WorkflowExecutionResult::from_tasks(
                    workflow_id,
                    WorkflowStatus::Failed,
                    definition.tasks,
                    0,
                    Some(format!("workflow {workflow_id} is already active")),
                );
            }
            let mut admitted = definition.clone();
            admitted.status = WorkflowStatus::Pending;
            admitted.started_at = None;
            admitted.completed_at = None;
            admitted.error_message = None;
            workflows.insert(workflow_id, admitted);
            executing.insert(workflow_id);
        }
        let _executing = ExecutingGuard {
            executing: &self.executing,
            workflow_id,
        };

        match self.drive(definition, started).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                error!(workflow_id = %workflow_id, error = %message, "Workflow failed");
                self.fail_workflow(workflow_id, message, started).await
            }
        }
    }

    async fn drive(
        &self,
        definition: WorkflowDefinition,
        started: Instant,
    ) -> InkflowResult<WorkflowExecutionResult> {
        let workflow_id = definition.id;

        let missing = self.registry().missing(
            definition
                .tasks
                .iter()
                .filter(|t| !t.target_agent_id.is_empty())
                .map(|t| t.target_agent_id.as_str()),
        );
        if !missing.is_empty() {
            return Err(InkflowError::AgentNotFound(missing.join(", ")));
        }

        let tasks: Vec<WorkflowTask> = definition
            .tasks
            .into_iter()
            .map(|mut t| {
                t.workflow_id = Some(workflow_id);
                t
            })
            .collect();
        let task_ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();

        // Starting and submitting happen under the map lock so a concurrent
        // cancel_workflow sees either nothing queued or every task queued.
        let mut rx = {
            let mut workflows = self.workflows.write().await;
            let Some(workflow) = workflows.get_mut(&workflow_id) else {
                return Err(InkflowError::Orchestrator(format!(
                    "workflow {workflow_id} was discarded before it started"
                )));
            };
            if workflow.status == WorkflowStatus::Cancelled {
                info!(workflow_id = %workflow_id, "Workflow cancelled before start");
                let cancelled = tasks
                    .into_iter()
                    .map(|mut t| {
                        t.status = TaskStatus::Cancelled;
                        t
                    })
                    .collect();
                return Ok(WorkflowExecutionResult::from_tasks(
                    workflow_id,
                    WorkflowStatus::Cancelled,
                    cancelled,
                    started.elapsed().as_millis() as u64,
                    None,
                ));
            }

            let rx = self.queue.subscribe();
            self.queue.enqueue_batch(tasks.clone())?;

            workflow.tasks = tasks;
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
            info!(
                workflow_id = %workflow_id,
                name = %workflow.name,
                tasks = task_ids.len(),
                "Workflow started"
            );
            rx
        };
        self.emit_workflow(workflow_id, WorkflowStatus::Running, 0.0);

        let deadline = self
            .config
            .workflow_timeout()
            .map(|limit| tokio::time::Instant::now() + limit);
        let mut timed_out: Option<String> = None;
        let mut last_status = WorkflowStatus::Running;

        let snapshot = loop {
            let snapshot = self.queue.get_tasks(&task_ids);
            let progress = progress_of(&snapshot);
            let status = {
                let mut workflows = self.workflows.write().await;
                match workflows.get_mut(&workflow_id) {
                    Some(workflow) => {
                        workflow.tasks = snapshot.clone();
                        workflow.progress = progress;
                        workflow.status
                    }
                    None => last_status,
                }
            };
            last_status = status;
            self.emit_workflow(workflow_id, status, progress);

            if snapshot.iter().all(WorkflowTask::is_terminal) {
                break snapshot;
            }

            if let Some(deadline) = deadline {
                if timed_out.is_none() && tokio::time::Instant::now() >= deadline {
                    let limit = self.config.workflow_timeout_secs.unwrap_or_default();
                    warn!(workflow_id = %workflow_id, limit_secs = limit, "Workflow timed out");
                    for id in &task_ids {
                        self.queue.cancel_task(*id);
                    }
                    timed_out = Some(format!("workflow exceeded {limit}s"));
                    continue;
                }
            }

            let mut tick = self.config.poll_interval();
            if let (Some(deadline), None) = (deadline, &timed_out) {
                tick = tick.min(deadline.saturating_duration_since(tokio::time::Instant::now()));
            }
            tokio::select! {
                _ = next_member_event(&mut rx, workflow_id) => {}
                _ = tokio::time::sleep(tick) => {}
            }
        };

        Ok(self
            .finish_workflow(workflow_id, snapshot, last_status, timed_out, started)
            .await)
    }

    async fn finish_workflow(
        &self,
        workflow_id: WorkflowId,
        tasks: Vec<WorkflowTask>,
        last_status: WorkflowStatus,
        timed_out: Option<String>,
        started: Instant,
    ) -> WorkflowExecutionResult {
        let total = tasks.len();
        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let progress = progress_of(&tasks);

        let (status, error_message) = {
            let mut workflows = self.workflows.write().await;
            let current = workflows
                .get(&workflow_id)
                .map_or(last_status, |w| w.status);
            let (status, error_message) = if current == WorkflowStatus::Cancelled {
                (WorkflowStatus::Cancelled, None)
            } else if let Some(message) = timed_out {
                (WorkflowStatus::Failed, Some(message))
            } else if failed > 0 {
                (
                    WorkflowStatus::Failed,
                    Some(format!("{failed} of {total} tasks failed")),
                )
            } else {
                (WorkflowStatus::Completed, None)
            };

            if let Some(workflow) = workflows.get_mut(&workflow_id) {
                workflow.status = status;
                workflow.tasks = tasks.clone();
                workflow.progress = progress;
                workflow.error_message = error_message.clone();
                workflow.completed_at.get_or_insert_with(Utc::now);
            }
            (status, error_message)
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match status {
            WorkflowStatus::Completed => {
                info!(workflow_id = %workflow_id, tasks = total, elapsed_ms, "Workflow completed");
            }
            _ => warn!(
                workflow_id = %workflow_id,
                status = %status,
                failed,
                elapsed_ms,
                "Workflow finished unsuccessfully"
            ),
        }
        self.emit_workflow(workflow_id, status, progress);

        WorkflowExecutionResult::from_tasks(workflow_id, status, tasks, elapsed_ms, error_message)
    }

    async fn fail_workflow(
        &self,
        workflow_id: WorkflowId,
        message: String,
        started: Instant,
    ) -> WorkflowExecutionResult {
        let (tasks, progress) = {
            let mut workflows = self.workflows.write().await;
            match workflows.get_mut(&workflow_id) {
                Some(workflow) => {
                    workflow.status = WorkflowStatus::Failed;
                    workflow.error_message = Some(message.clone());
                    workflow.completed_at = Some(Utc::now());
                    (workflow.tasks.clone(), workflow.progress)
                }
                None => (Vec::new(), 0.0),
            }
        };
        self.emit_workflow(workflow_id, WorkflowStatus::Failed, progress);
        WorkflowExecutionResult::from_tasks(
            workflow_id,
            WorkflowStatus::Failed,
            tasks,
            started.elapsed().as_millis() as u64,
            Some(message),
        )
    }

    /// Flag a running workflow as paused. Tasks already queued keep running.
    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.transition(workflow_id, WorkflowStatus::Running, WorkflowStatus::Paused)
            .await
    }

    /// Return a paused workflow to running.
    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.transition(workflow_id, WorkflowStatus::Paused, WorkflowStatus::Running)
            .await
    }

    async fn transition(&self, workflow_id: WorkflowId, from: WorkflowStatus, to: WorkflowStatus) -> bool {
        let progress = {
            let mut workflows = self.workflows.write().await;
            match workflows.get_mut(&workflow_id) {
                Some(workflow) if workflow.status == from => {
                    workflow.status = to;
                    workflow.progress
                }
                _ => return false,
            }
        };
        info!(workflow_id = %workflow_id, status = %to, "Workflow status changed");
        self.emit_workflow(workflow_id, to, progress);
        true
    }

    /// Cancel a workflow and every member task that has not finished.
    ///
    /// Returns `false` if the workflow is unknown or already terminal.
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> bool {
        let (members, progress) = {
            let mut workflows = self.workflows.write().await;
            match workflows.get_mut(&workflow_id) {
                Some(workflow) if !workflow.status.is_terminal() => {
                    workflow.status = WorkflowStatus::Cancelled;
                    workflow.completed_at = Some(Utc::now());
                    let members: Vec<TaskId> = workflow.tasks.iter().map(|t| t.id).collect();
                    (members, workflow.progress)
                }
                _ => return false,
            }
        };

        let cancelled = members
            .iter()
            .filter(|id| self.queue.cancel_task(**id))
            .count();
        info!(workflow_id = %workflow_id, cancelled_tasks = cancelled, "Workflow cancelled");
        self.emit_workflow(workflow_id, WorkflowStatus::Cancelled, progress);
        true
    }

    /// Instantiate a named template, merging in provider context.
    pub async fn create_predefined_workflow(
        &self,
        template: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> InkflowResult<WorkflowDefinition> {
        let template: WorkflowTemplate = template.parse()?;
        let mut params = params;
        if let Some(provider) = &self.context_provider {
            let context = provider.context_for(template, &params).await?;
            debug!(template = %template, keys = context.len(), "Merged template context");
            for (key, value) in context {
                params.entry(key).or_insert(value);
            }
        }
        let workflow = template.instantiate(&params);
        info!(
            workflow_id = %workflow.id,
            template = %template,
            tasks = workflow.tasks.len(),
            "Workflow created from template"
        );
        Ok(workflow)
    }

    /// Snapshot of a known workflow, finished or not.
    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Option<WorkflowDefinition> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    /// Workflows that have not reached a terminal state, oldest first.
    pub async fn active_workflows(&self) -> Vec<WorkflowDefinition> {
        let workflows = self.workflows.read().await;
        let mut active: Vec<WorkflowDefinition> = workflows
            .values()
            .filter(|w| !w.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active
    }

    /// Forget a finished workflow and its member tasks.
    ///
    /// Workflows that are active, or whose `execute_workflow` call is still
    /// draining after a cancel, are kept and `false` is returned.
    pub async fn discard_workflow(&self, workflow_id: WorkflowId) -> bool {
        let removed = {
            let mut workflows = self.workflows.write().await;
            if self.executing.lock().contains(&workflow_id) {
                return false;
            }
            match workflows.get(&workflow_id) {
                Some(workflow) if workflow.status.is_terminal() => workflows.remove(&workflow_id),
                _ => None,
            }
        };
        let Some(workflow) = removed else {
            return false;
        };
        let forgotten = workflow
            .tasks
            .iter()
            .filter(|t| self.queue.forget_task(t.id))
            .count();
        debug!(workflow_id = %workflow_id, forgotten, "Workflow discarded");
        true
    }

    fn emit_workflow(&self, workflow_id: WorkflowId, status: WorkflowStatus, progress: f64) {
        self.queue
            .events()
            .publish(OrchestrationEvent::WorkflowStatusChanged {
                workflow_id,
                status,
                progress,
            });
    }
}

/// Clears a workflow's `executing` mark when its execution returns or is dropped.
struct ExecutingGuard<'a> {
    executing: &'a parking_lot::Mutex<HashSet<WorkflowId>>,
    workflow_id: WorkflowId,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.executing.lock().remove(&self.workflow_id);
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        for (_, handle) in self.agent_listeners.lock().drain() {
            handle.abort();
        }
    }
}

/// Resolve once a status change of a member task arrives, or the stream lags.
async fn next_member_event(
    rx: &mut broadcast::Receiver<OrchestrationEvent>,
    workflow_id: WorkflowId,
) {
    loop {
        match rx.recv().await {
            Ok(event @ OrchestrationEvent::TaskStatusChanged { .. })
                if event.workflow_id() == Some(workflow_id) =>
            {
                return
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn forward_agent_events(
    agent_id: AgentId,
    mut rx: broadcast::Receiver<AgentEvent>,
    events: crate::events::OrchestrationBus,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                match &event {
                    AgentEvent::StatusChanged { status, .. } => {
                        info!(agent = %agent_id, status = %status, "Agent status changed");
                    }
                    AgentEvent::TaskCompleted {
                        task_id, success, ..
                    } => {
                        debug!(agent = %agent_id, task_id = %task_id, success, "Agent finished task");
                    }
                }
                events.publish(OrchestrationEvent::AgentActivity { agent: event });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(agent = %agent_id, skipped, "Agent event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(agent = %agent_id, "Agent event stream closed");
}
