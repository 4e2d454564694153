use crate::config::QueueConfig;
use crate::events::{OrchestrationBus, OrchestrationEvent};
use crate::monitor::AgentMonitor;
use crate::types::{TaskQueueStatus, TaskStatus, WorkflowTask, MAX_PRIORITY, MIN_PRIORITY};
use chrono::Utc;
use futures_util::FutureExt;
use inkflow_agents::{AgentRegistry, TaskContext, TaskResult};
use inkflow_core::{InkflowError, InkflowResult, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Progress recorded once a task has been handed to its agent.
const DISPATCHED_PROGRESS: u8 = 10;

/// A priority- and dependency-gated task queue with bounded concurrency.
///
/// Tasks are dispatched by a background loop that runs while there is
/// pending or in-flight work. A task starts only when every dependency is
/// `Completed` and one of `max_concurrency` permits is free. Among eligible
/// tasks the highest priority wins, then the earliest enqueued. A blocked
/// task keeps its place and never holds back eligible tasks behind it.
///
/// The loop sleeps until something changes (enqueue, completion,
/// cancellation) instead of polling. A pending task whose dependency ends
/// `Failed` or `Cancelled` is failed, and so are pending tasks left with no
/// way to ever run.
///
/// Cloning a `TaskQueue` yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wake: Notify,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    task_timeout: Option<Duration>,
    registry: Arc<AgentRegistry>,
    events: OrchestrationBus,
    monitor: AgentMonitor,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskId, WorkflowTask>,
    /// Enqueue sequence number of every known task.
    sequence: HashMap<TaskId, u64>,
    next_sequence: u64,
    /// Pending ids in dispatch order: priority descending, then sequence.
    pending: Vec<TaskId>,
    /// Executions holding a permit, with their cancellation flags.
    in_flight: HashMap<TaskId, Arc<AtomicBool>>,
    processing: bool,
}

/// A task taken off the pending list together with what it needs to run.
struct Dispatch {
    task: WorkflowTask,
    permit: OwnedSemaphorePermit,
    cancelled: Arc<AtomicBool>,
}

enum Step {
    Run(Dispatch),
    Wait,
    Retry,
    Idle,
}

enum Outcome {
    Completed(TaskResult),
    Failed(String, Option<TaskResult>),
    Cancelled,
}

impl TaskQueue {
    /// Create a queue dispatching to agents in `registry`.
    pub fn new(registry: Arc<AgentRegistry>, config: QueueConfig) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                wake: Notify::new(),
                permits: Arc::new(Semaphore::new(max_concurrency)),
                max_concurrency,
                task_timeout: config.task_timeout(),
                registry,
                events: OrchestrationBus::new(config.event_capacity),
                monitor: AgentMonitor::new(),
            }),
        }
    }

    /// Add a task to the queue, returning its id.
    ///
    /// The task is reset to `Pending`. Fails without side effects if the id
    /// is nil or already known, the priority is outside `1..=10`, a
    /// dependency is unknown or already failed/cancelled, or the task
    /// depends on itself. Must be called from within a tokio runtime.
    pub fn enqueue(&self, task: WorkflowTask) -> InkflowResult<TaskId> {
        let id = task.id;
        self.enqueue_batch(vec![task])?;
        Ok(id)
    }

    /// Add a set of tasks atomically: either all are accepted or none.
    ///
    /// Tasks are stable-sorted by priority (descending) and creation time
    /// before insertion, so equal-priority tasks keep their submission order.
    /// Dependencies may point at tasks in the same batch or at tasks already
    /// known to the queue; cycles are rejected.
    pub fn enqueue_batch(&self, tasks: Vec<WorkflowTask>) -> InkflowResult<Vec<TaskId>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            InkflowError::Orchestrator("task queue requires a running tokio runtime".to_string())
        })?;

        let mut tasks = tasks;
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut events = Vec::with_capacity(tasks.len());
        let (ids, start_dispatcher) = {
            let mut state = self.inner.state.lock();
            validate_submission(&state, &tasks)?;

            let mut ids = Vec::with_capacity(tasks.len());
            for mut task in tasks {
                task.reset_for_enqueue();
                info!(
                    task_id = %task.id,
                    name = %task.name,
                    agent = %task.target_agent_id,
                    priority = task.priority,
                    "Task enqueued"
                );
                events.push(OrchestrationEvent::task_changed(&task));
                ids.push(task.id);
                state.insert_pending(task);
            }

            let start = !state.processing && !ids.is_empty();
            if start {
                state.processing = true;
            }
            (ids, start)
        };

        self.inner.publish_all(events);
        if start_dispatcher {
            runtime.spawn(Arc::clone(&self.inner).dispatch_loop());
        } else {
            self.inner.wake.notify_one();
        }
        Ok(ids)
    }

    /// Cancel a pending or running task.
    ///
    /// Returns `false` if the task is unknown or already terminal. A running
    /// task is marked `Cancelled` immediately; its agent sees the flag at its
    /// next checkpoint and the permit is released when it returns.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let event = {
            let mut state = self.inner.state.lock();
            let Some(status) = state.tasks.get(&id).map(|t| t.status) else {
                return false;
            };
            match status {
                TaskStatus::Pending => {
                    state.pending.retain(|p| *p != id);
                }
                TaskStatus::Running => {
                    if let Some(flag) = state.in_flight.get(&id) {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
                _ => return false,
            }
            let Some(task) = state.tasks.get_mut(&id) else {
                return false;
            };
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            OrchestrationEvent::task_changed(task)
        };

        info!(task_id = %id, "Task cancelled");
        self.inner.events.publish(event);
        self.inner.wake.notify_one();
        true
    }

    /// Cancel every pending task, returning how many were cancelled.
    pub fn clear_queue(&self) -> usize {
        let events: Vec<OrchestrationEvent> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<TaskId> = std::mem::take(&mut state.pending);
            let now = Utc::now();
            drained
                .iter()
                .filter_map(|id| {
                    let task = state.tasks.get_mut(id)?;
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(now);
                    Some(OrchestrationEvent::task_changed(task))
                })
                .collect()
        };

        let count = events.len();
        if count > 0 {
            info!(count, "Pending tasks cleared");
        }
        self.inner.publish_all(events);
        self.inner.wake.notify_one();
        count
    }

    /// Counts of pending, running and finished tasks.
    pub fn get_queue_status(&self) -> TaskQueueStatus {
        let state = self.inner.state.lock();
        let count = |s: TaskStatus| state.tasks.values().filter(|t| t.status == s).count();
        TaskQueueStatus {
            pending_tasks: count(TaskStatus::Pending),
            running_tasks: count(TaskStatus::Running),
            completed_tasks: state.tasks.values().filter(|t| t.is_terminal()).count(),
            max_concurrency: self.inner.max_concurrency,
            is_processing: state.processing,
        }
    }

    /// Drop a finished task from the queue's bookkeeping.
    ///
    /// Returns `false` if the task is unknown or not terminal, if its agent
    /// has not returned yet after a cancel, or if an unfinished task depends
    /// on it. A forgotten id can no longer be named as a dependency.
    pub fn forget_task(&self, id: TaskId) -> bool {
        let mut state = self.inner.state.lock();
        let removable = state.tasks.get(&id).is_some_and(WorkflowTask::is_terminal)
            && !state.in_flight.contains_key(&id)
            && !state
                .tasks
                .values()
                .any(|t| !t.is_terminal() && t.dependencies.contains(&id));
        if removable {
            state.tasks.remove(&id);
            state.sequence.remove(&id);
            debug!(task_id = %id, "Task forgotten");
        }
        removable
    }

    /// Every task known to the queue, ordered by creation time.
    pub fn get_all_tasks(&self) -> Vec<WorkflowTask> {
        self.snapshot(|_| true)
    }

    /// Tasks currently in `status`, ordered by creation time.
    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<WorkflowTask> {
        self.snapshot(|t| t.status == status)
    }

    /// Snapshot of one task.
    pub fn get_task(&self, id: TaskId) -> Option<WorkflowTask> {
        self.inner.state.lock().tasks.get(&id).cloned()
    }

    /// Snapshot of the given tasks in the order requested; unknown ids are skipped.
    pub fn get_tasks(&self, ids: &[TaskId]) -> Vec<WorkflowTask> {
        let state = self.inner.state.lock();
        ids.iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    /// Wait until a task reaches a terminal state.
    ///
    /// Returns `None` if the task is unknown to the queue.
    pub async fn wait_for_task(&self, id: TaskId) -> Option<WorkflowTask> {
        let mut rx = self.subscribe();
        loop {
            match self.get_task(id) {
                None => return None,
                Some(task) if task.is_terminal() => return Some(task),
                Some(_) => {}
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.get_task(id),
            }
        }
    }

    /// Subscribe to task events (and workflow events of engines sharing this queue).
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.inner.events.subscribe()
    }

    /// The bus task events are published on.
    pub fn events(&self) -> &OrchestrationBus {
        &self.inner.events
    }

    /// Agents tasks are dispatched to.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    /// Per-agent execution metrics.
    pub fn monitor(&self) -> &AgentMonitor {
        &self.inner.monitor
    }

    /// Number of tasks allowed to run at once.
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    fn snapshot(&self, filter: impl Fn(&WorkflowTask) -> bool) -> Vec<WorkflowTask> {
        let state = self.inner.state.lock();
        let mut tasks: Vec<(u64, WorkflowTask)> = state
            .tasks
            .values()
            .filter(|t| filter(t))
            .map(|t| (state.sequence_of(t.id), t.clone()))
            .collect();
        tasks.sort_by(|(sa, a), (sb, b)| a.created_at.cmp(&b.created_at).then(sa.cmp(sb)));
        tasks.into_iter().map(|(_, t)| t).collect()
    }
}

impl QueueState {
    fn sequence_of(&self, id: TaskId) -> u64 {
        self.sequence.get(&id).copied().unwrap_or(u64::MAX)
    }

    fn insert_pending(&mut self, task: WorkflowTask) {
        let id = task.id;
        let priority = task.priority;
        self.sequence.insert(id, self.next_sequence);
        self.next_sequence += 1;

        let tasks = &self.tasks;
        let position = self
            .pending
            .partition_point(|p| tasks.get(p).map_or(true, |t| t.priority >= priority));
        self.pending.insert(position, id);
        self.tasks.insert(id, task);
    }

    fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(id).map(|t| t.status)
    }

    /// Remove and return the first pending task whose dependencies are all completed.
    fn take_next_ready(&mut self) -> Option<TaskId> {
        let position = self.pending.iter().position(|id| {
            self.tasks.get(id).is_some_and(|task| {
                task.is_ready(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
        })?;
        Some(self.pending.remove(position))
    }

    /// Fail pending tasks that depend on a task which can no longer complete.
    /// Repeats until no more tasks are affected, so failures cascade down chains.
    fn fail_unsatisfiable(&mut self, events: &mut Vec<OrchestrationEvent>) {
        loop {
            let doomed: Vec<(TaskId, String)> = self
                .pending
                .iter()
                .filter_map(|id| {
                    let task = self.tasks.get(id)?;
                    task.dependencies.iter().find_map(|dep| match self.status_of(dep) {
                        Some(status @ (TaskStatus::Failed | TaskStatus::Cancelled)) => Some((
                            *id,
                            format!("dependency {dep} did not complete ({status})"),
                        )),
                        None => Some((*id, format!("dependency {dep} is unknown"))),
                        _ => None,
                    })
                })
                .collect();

            if doomed.is_empty() {
                return;
            }
            for (id, reason) in doomed {
                warn!(task_id = %id, reason = %reason, "Task cannot run");
                self.fail_pending(id, reason, events);
            }
        }
    }

    /// Fail every pending task; called when none of them can ever become ready.
    fn fail_deadlocked(&mut self, events: &mut Vec<OrchestrationEvent>) {
        let stuck: Vec<TaskId> = self.pending.clone();
        warn!(count = stuck.len(), "Dependency deadlock detected");
        for id in stuck {
            self.fail_pending(
                id,
                "dependency deadlock: no dependency can make progress".to_string(),
                events,
            );
        }
    }

    fn fail_pending(&mut self, id: TaskId, reason: String, events: &mut Vec<OrchestrationEvent>) {
        self.pending.retain(|p| *p != id);
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Failed;
            task.error_message = Some(reason);
            task.completed_at = Some(Utc::now());
            events.push(OrchestrationEvent::task_changed(task));
        }
    }
}

/// Validate a submission against itself and the tasks already in the queue.
fn validate_submission(state: &QueueState, tasks: &[WorkflowTask]) -> InkflowResult<()> {
    let mut batch: HashMap<TaskId, &WorkflowTask> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if task.id.is_nil() {
            return Err(InkflowError::Validation(format!(
                "task '{}' has a nil id",
                task.name
            )));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&task.priority) {
            return Err(InkflowError::Validation(format!(
                "task '{}' has priority {} outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                task.name, task.priority
            )));
        }
        if state.tasks.contains_key(&task.id) || batch.insert(task.id, task).is_some() {
            return Err(InkflowError::Validation(format!(
                "task id {} ('{}') is already queued",
                task.id, task.name
            )));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if batch.contains_key(dep) {
                continue;
            }
            match state.status_of(dep) {
                None => {
                    return Err(InkflowError::Validation(format!(
                        "task '{}' depends on unknown task {dep}",
                        task.name
                    )));
                }
                Some(status @ (TaskStatus::Failed | TaskStatus::Cancelled)) => {
                    return Err(InkflowError::Validation(format!(
                        "task '{}' depends on task {dep} which already {status}",
                        task.name
                    )));
                }
                Some(_) => {}
            }
        }
    }

    // Existing tasks never depend on new ids, so cycles can only live inside the batch.
    if let Some(cycle) = find_cycle(&batch) {
        let names: Vec<&str> = cycle
            .iter()
            .filter_map(|id| batch.get(id).map(|t| t.name.as_str()))
            .collect();
        return Err(InkflowError::DependencyCycle(names.join(" -> ")));
    }
    Ok(())
}

/// Depth-first search for a cycle. Returns the cycle's task ids, first id repeated last.
fn find_cycle(batch: &HashMap<TaskId, &WorkflowTask>) -> Option<Vec<TaskId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit(
        id: TaskId,
        batch: &HashMap<TaskId, &WorkflowTask>,
        marks: &mut HashMap<TaskId, Mark>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        match marks.get(&id) {
            Some(Mark::InProgress) => {
                // Back edge: the cycle is the path suffix starting at `id`.
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(id);
                return Some(cycle);
            }
            Some(Mark::Done) => return None,
            None => {}
        }
        let task = batch.get(&id)?;
        marks.insert(id, Mark::InProgress);
        path.push(id);
        for dep in &task.dependencies {
            if batch.contains_key(dep) {
                if let Some(cycle) = visit(*dep, batch, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut roots: Vec<&TaskId> = batch.keys().collect();
    roots.sort();
    for id in roots {
        let mut path = Vec::new();
        if let Some(cycle) = visit(*id, batch, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

impl QueueInner {
    fn publish_all(&self, events: Vec<OrchestrationEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        debug!(max_concurrency = self.max_concurrency, "Dispatcher started");
        let mut executions = JoinSet::new();

        loop {
            match self.next_step() {
                Step::Run(dispatch) => {
                    let inner = Arc::clone(&self);
                    executions.spawn(async move { inner.execute(dispatch).await });
                }
                Step::Retry => continue,
                Step::Wait => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        Some(joined) = executions.join_next() => {
                            if let Err(e) = joined {
                                error!(error = %e, "Task execution aborted");
                            }
                        }
                    }
                }
                Step::Idle => break,
            }
        }

        while let Some(joined) = executions.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task execution aborted");
            }
        }
        debug!("Dispatcher idle");
    }

    /// Decide the dispatcher's next move under a single lock acquisition.
    fn next_step(&self) -> Step {
        let mut events = Vec::new();
        let step = {
            let mut state = self.state.lock();
            state.fail_unsatisfiable(&mut events);

            if state.pending.is_empty() {
                if state.in_flight.is_empty() {
                    state.processing = false;
                    Step::Idle
                } else {
                    Step::Wait
                }
            } else {
                match Arc::clone(&self.permits).try_acquire_owned() {
                    Err(_) => Step::Wait,
                    Ok(permit) => match state.take_next_ready() {
                        Some(id) => match state.tasks.get_mut(&id) {
                            Some(task) => {
                                task.status = TaskStatus::Running;
                                task.started_at = Some(Utc::now());
                                task.progress = 0;
                                events.push(OrchestrationEvent::task_changed(task));
                                let snapshot = task.clone();
                                let cancelled = Arc::new(AtomicBool::new(false));
                                state.in_flight.insert(id, Arc::clone(&cancelled));
                                Step::Run(Dispatch {
                                    task: snapshot,
                                    permit,
                                    cancelled,
                                })
                            }
                            None => Step::Retry,
                        },
                        None if state.in_flight.is_empty() => {
                            state.fail_deadlocked(&mut events);
                            Step::Retry
                        }
                        None => Step::Wait,
                    },
                }
            }
        };
        self.publish_all(events);
        step
    }

    async fn execute(self: Arc<Self>, dispatch: Dispatch) {
        let Dispatch {
            task,
            permit,
            cancelled,
        } = dispatch;
        let started = Instant::now();

        info!(
            task_id = %task.id,
            name = %task.name,
            agent = %task.target_agent_id,
            task_type = %task.task_type,
            "Task started"
        );
        self.monitor.start_task(&task.target_agent_id, task.id).await;

        let outcome = if cancelled.load(Ordering::SeqCst) {
            Outcome::Cancelled
        } else {
            self.set_progress(task.id, DISPATCHED_PROGRESS);
            let result = self.run_handler(&task, Arc::clone(&cancelled)).await;
            if cancelled.load(Ordering::SeqCst) {
                Outcome::Cancelled
            } else {
                match result {
                    Ok(result) if result.success => Outcome::Completed(result),
                    Ok(result) => {
                        let message = result
                            .error
                            .clone()
                            .unwrap_or_else(|| "agent reported failure".to_string());
                        Outcome::Failed(message, Some(result))
                    }
                    Err(e) => Outcome::Failed(e.to_string(), None),
                }
            }
        };

        let elapsed = started.elapsed();
        let status = self.finish(task.id, outcome, elapsed);
        self.monitor
            .finish_task(
                &task.target_agent_id,
                task.id,
                status,
                elapsed.as_millis() as u64,
            )
            .await;

        // Release the permit before waking the dispatcher so it can be reused.
        drop(permit);
        self.wake.notify_one();
    }

    /// Run the task's handler: its target agent, or automatic success when it has none.
    async fn run_handler(
        self: &Arc<Self>,
        task: &WorkflowTask,
        cancelled: Arc<AtomicBool>,
    ) -> InkflowResult<TaskResult> {
        if task.target_agent_id.is_empty() {
            debug!(task_id = %task.id, task_type = %task.task_type, "No handler, completing");
            return Ok(TaskResult::success(serde_json::Value::Null));
        }

        let weak = Arc::downgrade(self);
        let task_id = task.id;
        let ctx = TaskContext::new(task.id, task.task_type.clone(), task.parameters.clone())
            .with_workflow(task.workflow_id)
            .with_cancel_flag(cancelled)
            .with_progress_sink(move |percent| {
                if let Some(inner) = weak.upgrade() {
                    inner.set_progress(task_id, percent);
                }
            });

        let call = AssertUnwindSafe(self.registry.execute(&task.target_agent_id, ctx)).catch_unwind();
        let joined = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(InkflowError::Timeout(format!(
                        "task exceeded {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => call.await,
        };

        joined.unwrap_or_else(|panic| {
            Err(InkflowError::Agent(format!(
                "agent panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    /// Raise a running task's progress; lower values are ignored.
    fn set_progress(&self, id: TaskId, percent: u8) {
        let event = {
            let mut state = self.state.lock();
            match state.tasks.get_mut(&id) {
                Some(task) if task.status == TaskStatus::Running && percent > task.progress => {
                    task.progress = percent.min(100);
                    Some(OrchestrationEvent::TaskProgress {
                        task_id: id,
                        workflow_id: task.workflow_id,
                        progress: task.progress,
                    })
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            debug!(task_id = %id, progress = percent, "Task progress");
            self.events.publish(event);
        }
    }

    /// Record an execution outcome unless the task was cancelled meanwhile.
    fn finish(&self, id: TaskId, outcome: Outcome, elapsed: Duration) -> TaskStatus {
        let (status, event) = {
            let mut state = self.state.lock();
            state.in_flight.remove(&id);
            let Some(task) = state.tasks.get_mut(&id) else {
                return TaskStatus::Failed;
            };
            if task.status.is_terminal() {
                (task.status, None)
            } else {
                match outcome {
                    Outcome::Completed(result) => {
                        task.status = TaskStatus::Completed;
                        task.progress = 100;
                        task.result = Some(result.with_duration_ms(elapsed.as_millis() as u64));
                    }
                    Outcome::Failed(message, result) => {
                        task.status = TaskStatus::Failed;
                        task.error_message = Some(message);
                        task.result = result;
                    }
                    Outcome::Cancelled => {
                        task.status = TaskStatus::Cancelled;
                    }
                }
                task.completed_at = Some(Utc::now());
                (task.status, Some(OrchestrationEvent::task_changed(task)))
            }
        };

        let elapsed_ms = elapsed.as_millis() as u64;
        match (&status, &event) {
            (_, None) => debug!(task_id = %id, elapsed_ms, "Cancelled task returned"),
            (TaskStatus::Completed, _) => info!(task_id = %id, elapsed_ms, "Task completed"),
            (TaskStatus::Failed, Some(OrchestrationEvent::TaskStatusChanged { error, .. })) => {
                warn!(
                    task_id = %id,
                    elapsed_ms,
                    error = error.as_deref().unwrap_or(""),
                    "Task failed"
                );
            }
            _ => info!(task_id = %id, status = %status, elapsed_ms, "Task finished"),
        }

        if let Some(event) = event {
            self.events.publish(event);
        }
        status
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
