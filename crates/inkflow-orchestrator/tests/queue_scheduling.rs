//! Scheduling tests for the task queue: bounded concurrency, dependency
//! gating, ordering, cancellation and handler failure capture.

use async_trait::async_trait;
use inkflow_agents::{Agent, AgentRegistry, TaskContext, TaskResult};
use inkflow_core::{InkflowError, InkflowResult, TaskId};
use inkflow_orchestrator::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mock agent
// ---------------------------------------------------------------------------

/// Behaves according to the task type:
/// `panic` panics, `hang` sleeps far beyond any timeout, `fail` errors,
/// `steps` runs ten cancellable steps with progress, anything else sleeps
/// for the configured delay and succeeds.
struct ScriptedAgent {
    id: String,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAgent {
    fn new(id: &str, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            delay: Duration::from_millis(delay_ms),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, ctx: TaskContext) -> InkflowResult<TaskResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match ctx.task_type.as_str() {
            "panic" => panic!("handler blew up"),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(TaskResult::success("woke up"))
            }
            "fail" => Err(InkflowError::Agent("scene does not parse".into())),
            "steps" => {
                let mut done = 0;
                for step in 1..=10u8 {
                    if ctx.is_cancelled() {
                        break;
                    }
                    tokio::time::sleep(self.delay).await;
                    ctx.report_progress(step * 10);
                    done = step;
                }
                Ok(TaskResult::success(done))
            }
            other => {
                tokio::time::sleep(self.delay).await;
                Ok(TaskResult::success(format!("{other} ok")))
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn queue(agent: Arc<ScriptedAgent>, config: QueueConfig) -> TaskQueue {
    let registry = Arc::new(AgentRegistry::new());
    registry.register(agent);
    TaskQueue::new(registry, config)
}

async fn wait_all(queue: &TaskQueue, ids: &[TaskId]) -> Vec<WorkflowTask> {
    let mut tasks = Vec::new();
    for id in ids {
        tasks.push(queue.wait_for_task(*id).await.unwrap());
    }
    tasks
}

// ---------------------------------------------------------------------------
// Bounded concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_running_tasks_never_exceed_max_concurrency() {
    let agent = ScriptedAgent::new("writer", 15);
    let queue = queue(agent.clone(), QueueConfig::default().with_max_concurrency(3));
    let mut events = queue.subscribe();

    let tasks: Vec<WorkflowTask> = (0..10)
        .map(|i| WorkflowTask::new(format!("scene {i}"), "draft", "writer"))
        .collect();
    let ids = queue.enqueue_batch(tasks).unwrap();
    let finished = wait_all(&queue, &ids).await;

    assert!(finished.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(agent.peak() <= 3, "peak concurrency {}", agent.peak());
    assert!(agent.peak() >= 2);

    let mut running = HashSet::new();
    let mut peak_running = 0;
    while let Ok(event) = events.try_recv() {
        if let OrchestrationEvent::TaskStatusChanged {
            task_id, status, ..
        } = event
        {
            match status {
                TaskStatus::Running => {
                    running.insert(task_id);
                }
                s if s.is_terminal() => {
                    running.remove(&task_id);
                }
                _ => {}
            }
            peak_running = peak_running.max(running.len());
        }
    }
    assert!(peak_running <= 3);
}

#[tokio::test]
async fn test_queue_status_snapshot() {
    let agent = ScriptedAgent::new("writer", 50);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(2));
    let ids = queue
        .enqueue_batch(
            (0..5)
                .map(|i| WorkflowTask::new(format!("t{i}"), "draft", "writer"))
                .collect(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let status = queue.get_queue_status();
    assert_eq!(status.max_concurrency, 2);
    assert_eq!(status.running_tasks, 2);
    assert_eq!(status.pending_tasks, 3);
    assert!(status.is_processing);

    wait_all(&queue, &ids).await;
    let status = queue.get_queue_status();
    assert_eq!(status.completed_tasks, 5);
    assert_eq!(status.pending_tasks + status.running_tasks, 0);
}

// ---------------------------------------------------------------------------
// Dependency gating and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_diamond_dependencies_start_after_prerequisites() {
    let agent = ScriptedAgent::new("writer", 10);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(4));

    let a = WorkflowTask::new("premise", "draft", "writer");
    let b = WorkflowTask::new("act one", "draft", "writer").with_dependencies(vec![a.id]);
    let c = WorkflowTask::new("act two", "draft", "writer").with_dependencies(vec![a.id]);
    let d = WorkflowTask::new("finale", "draft", "writer").with_dependencies(vec![b.id, c.id]);
    let ids = queue.enqueue_batch(vec![d, c, b, a]).unwrap();
    wait_all(&queue, &ids).await;

    let get = |name: &str| {
        queue
            .get_all_tasks()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    };
    let (a, b, c, d) = (get("premise"), get("act one"), get("act two"), get("finale"));
    assert!(b.started_at.unwrap() >= a.completed_at.unwrap());
    assert!(c.started_at.unwrap() >= a.completed_at.unwrap());
    assert!(d.started_at.unwrap() >= b.completed_at.unwrap());
    assert!(d.started_at.unwrap() >= c.completed_at.unwrap());
}

#[tokio::test]
async fn test_batch_preserves_submission_order_for_equal_priority() {
    let agent = ScriptedAgent::new("writer", 2);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(1));

    let tasks: Vec<WorkflowTask> = (0..6)
        .map(|i| WorkflowTask::new(format!("beat {i}"), "draft", "writer").with_priority(4))
        .collect();
    let expected: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
    let ids = queue.enqueue_batch(tasks).unwrap();
    let mut finished = wait_all(&queue, &ids).await;

    finished.sort_by_key(|t| t.started_at);
    let order: Vec<String> = finished.into_iter().map(|t| t.name).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_blocked_task_does_not_hold_back_eligible_ones() {
    let agent = ScriptedAgent::new("writer", 30);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(2));

    let slow = WorkflowTask::new("slow", "draft", "writer").with_priority(5);
    let blocked = WorkflowTask::new("blocked", "draft", "writer")
        .with_priority(10)
        .with_dependencies(vec![slow.id]);
    let eligible = WorkflowTask::new("eligible", "draft", "writer").with_priority(1);
    let ids = queue.enqueue_batch(vec![slow, blocked, eligible]).unwrap();
    let finished = wait_all(&queue, &ids).await;

    let eligible = finished.iter().find(|t| t.name == "eligible").unwrap();
    let slow = finished.iter().find(|t| t.name == "slow").unwrap();
    assert!(eligible.started_at.unwrap() < slow.completed_at.unwrap());
}

#[tokio::test]
async fn test_failure_cascades_through_dependents() {
    let agent = ScriptedAgent::new("writer", 1);
    let queue = queue(agent, QueueConfig::default());

    let root = WorkflowTask::new("root", "fail", "writer");
    let child = WorkflowTask::new("child", "draft", "writer").with_dependencies(vec![root.id]);
    let grandchild =
        WorkflowTask::new("grandchild", "draft", "writer").with_dependencies(vec![child.id]);
    let sibling = WorkflowTask::new("sibling", "draft", "writer");
    let ids = queue
        .enqueue_batch(vec![root, child, grandchild, sibling])
        .unwrap();
    let finished = wait_all(&queue, &ids).await;

    let status = |name: &str| finished.iter().find(|t| t.name == name).unwrap().status;
    assert_eq!(status("root"), TaskStatus::Failed);
    assert_eq!(status("child"), TaskStatus::Failed);
    assert_eq!(status("grandchild"), TaskStatus::Failed);
    assert_eq!(status("sibling"), TaskStatus::Completed);

    let child = finished.iter().find(|t| t.name == "child").unwrap();
    assert!(child.started_at.is_none());
}

#[tokio::test]
async fn test_cancelled_dependency_fails_dependent() {
    let agent = ScriptedAgent::new("writer", 50);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(1));

    let first = WorkflowTask::new("first", "draft", "writer");
    let second = WorkflowTask::new("second", "draft", "writer");
    let third = WorkflowTask::new("third", "draft", "writer").with_dependencies(vec![second.id]);
    let (second_id, third_id) = (second.id, third.id);
    queue.enqueue_batch(vec![first, second, third]).unwrap();

    assert!(queue.cancel_task(second_id));
    let third = queue.wait_for_task(third_id).await.unwrap();
    assert_eq!(third.status, TaskStatus::Failed);
    assert!(third.error_message.unwrap().contains(&second_id.to_string()));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_task_is_idempotent() {
    let agent = ScriptedAgent::new("writer", 100);
    let queue = queue(agent, QueueConfig::default().with_max_concurrency(1));
    let ids = queue
        .enqueue_batch(vec![
            WorkflowTask::new("running", "draft", "writer"),
            WorkflowTask::new("waiting", "draft", "writer"),
        ])
        .unwrap();

    assert!(queue.cancel_task(ids[1]));
    assert!(!queue.cancel_task(ids[1]));
    assert_eq!(
        queue.get_task(ids[1]).unwrap().status,
        TaskStatus::Cancelled
    );

    let running = queue.wait_for_task(ids[0]).await.unwrap();
    assert_eq!(running.status, TaskStatus::Completed);
    assert!(!queue.cancel_task(ids[0]));
}

#[tokio::test]
async fn test_cooperative_cancellation_stops_agent_early() {
    let agent = ScriptedAgent::new("writer", 20);
    let queue = queue(agent.clone(), QueueConfig::default());
    let id = queue
        .enqueue(WorkflowTask::new("long chapter", "steps", "writer"))
        .unwrap();

    let mut events = queue.subscribe();
    loop {
        if queue.get_task(id).unwrap().progress >= 20 {
            break;
        }
        events.recv().await.unwrap();
    }
    assert!(queue.cancel_task(id));

    // The agent sees the flag at its next step and returns.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while agent.active.load(Ordering::SeqCst) > 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let task = queue.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.progress < 100);
    let metrics = queue.monitor().get_state("writer").await.unwrap().metrics;
    assert_eq!(metrics.tasks_cancelled, 1);
}

// ---------------------------------------------------------------------------
// Progress and failure capture
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_progress_is_monotonic_and_capped_until_completion() {
    let agent = ScriptedAgent::new("writer", 2);
    let queue = queue(agent, QueueConfig::default());
    let mut events = queue.subscribe();
    let id = queue
        .enqueue(WorkflowTask::new("stepped", "steps", "writer"))
        .unwrap();
    let task = queue.wait_for_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OrchestrationEvent::TaskProgress { progress, .. } = event {
            seen.push(progress);
        }
    }
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(seen.iter().all(|p| *p <= 99));
}

#[tokio::test]
async fn test_panicking_handler_fails_only_its_task() {
    let agent = ScriptedAgent::new("writer", 5);
    let queue = queue(agent, QueueConfig::default());
    let ids = queue
        .enqueue_batch(vec![
            WorkflowTask::new("explodes", "panic", "writer"),
            WorkflowTask::new("survives", "draft", "writer"),
        ])
        .unwrap();
    let finished = wait_all(&queue, &ids).await;

    assert_eq!(finished[0].status, TaskStatus::Failed);
    assert!(finished[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("handler blew up"));
    assert_eq!(finished[1].status, TaskStatus::Completed);

    // The queue keeps working afterwards.
    let next = queue
        .enqueue(WorkflowTask::new("after", "draft", "writer"))
        .unwrap();
    assert_eq!(
        queue.wait_for_task(next).await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_task_timeout_fails_task() {
    let agent = ScriptedAgent::new("writer", 1);
    let queue = queue(agent, QueueConfig::default().with_task_timeout_secs(1));
    let id = queue
        .enqueue(WorkflowTask::new("stuck", "hang", "writer"))
        .unwrap();

    let task = queue.wait_for_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().starts_with("Timeout"));
}

#[tokio::test]
async fn test_failed_task_metrics() {
    let agent = ScriptedAgent::new("writer", 1);
    let queue = queue(agent, QueueConfig::default());
    let ids = queue
        .enqueue_batch(vec![
            WorkflowTask::new("ok", "draft", "writer"),
            WorkflowTask::new("bad", "fail", "writer"),
        ])
        .unwrap();
    wait_all(&queue, &ids).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let aggregate = queue.monitor().aggregate_metrics().await;
    assert_eq!(aggregate.tasks_started, 2);
    assert_eq!(aggregate.tasks_completed, 1);
    assert_eq!(aggregate.tasks_failed, 1);
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_independent_queues_do_not_share_state() {
    let first = queue(ScriptedAgent::new("writer", 1), QueueConfig::default());
    let second = queue(ScriptedAgent::new("writer", 1), QueueConfig::default());

    let id = first
        .enqueue(WorkflowTask::new("only here", "draft", "writer"))
        .unwrap();
    first.wait_for_task(id).await.unwrap();

    assert_eq!(first.get_all_tasks().len(), 1);
    assert!(second.get_all_tasks().is_empty());
    assert!(second.get_task(id).is_none());
    assert!(second.wait_for_task(id).await.is_none());
}
