use crate::types::TaskStatus;
use inkflow_core::{AgentId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Execution counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_started: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub tasks_cancelled: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Snapshot of what the queue is currently doing with one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub current_tasks: Vec<TaskId>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            current_tasks: Vec::new(),
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks per-agent execution state and metrics, fed by the task queue.
#[derive(Clone)]
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<AgentId, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, agent_id: &str, task_id: TaskId) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id));
        state.current_tasks.push(task_id);
        state.status = WorkerStatus::Working;
        state.metrics.tasks_started += 1;
    }

    /// Record the outcome of a task the agent was working on.
    pub async fn finish_task(
        &self,
        agent_id: &str,
        task_id: TaskId,
        outcome: TaskStatus,
        duration_ms: u64,
    ) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id));
        state.current_tasks.retain(|id| *id != task_id);
        state.metrics.duration_ms += duration_ms;
        match outcome {
            TaskStatus::Completed => state.metrics.tasks_completed += 1,
            TaskStatus::Failed => state.metrics.tasks_failed += 1,
            TaskStatus::Cancelled => state.metrics.tasks_cancelled += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
        state.status = if !state.current_tasks.is_empty() {
            WorkerStatus::Working
        } else if outcome == TaskStatus::Failed {
            WorkerStatus::Error
        } else {
            WorkerStatus::Idle
        };
    }

    /// Snapshot of every agent seen so far, sorted by id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent_id).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.tasks_started += state.metrics.tasks_started;
            total.tasks_completed += state.metrics.tasks_completed;
            total.tasks_failed += state.metrics.tasks_failed;
            total.tasks_cancelled += state.metrics.tasks_cancelled;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON for dashboards.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.get_state("writer").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_finish_task() {
        let monitor = AgentMonitor::new();
        let task_id = Uuid::new_v4();

        monitor.start_task("writer", task_id).await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.current_tasks, vec![task_id]);

        monitor
            .finish_task("writer", task_id, TaskStatus::Completed, 40)
            .await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert!(state.current_tasks.is_empty());
        assert_eq!(state.metrics.tasks_started, 1);
        assert_eq!(state.metrics.tasks_completed, 1);
        assert_eq!(state.metrics.duration_ms, 40);
    }

    #[tokio::test]
    async fn test_overlapping_tasks_keep_agent_working() {
        let monitor = AgentMonitor::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        monitor.start_task("writer", a).await;
        monitor.start_task("writer", b).await;

        monitor.finish_task("writer", a, TaskStatus::Failed, 5).await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.current_tasks, vec![b]);

        monitor.finish_task("writer", b, TaskStatus::Failed, 5).await;
        let state = monitor.get_state("writer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.tasks_failed, 2);
    }

    #[tokio::test]
    async fn test_aggregate_metrics() {
        let monitor = AgentMonitor::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        monitor.start_task("planner", a).await;
        monitor.start_task("writer", b).await;
        monitor.start_task("editor", c).await;
        monitor.finish_task("planner", a, TaskStatus::Completed, 10).await;
        monitor.finish_task("writer", b, TaskStatus::Failed, 20).await;
        monitor.finish_task("editor", c, TaskStatus::Cancelled, 30).await;

        let agg = monitor.aggregate_metrics().await;
        assert_eq!(agg.tasks_started, 3);
        assert_eq!(agg.tasks_completed, 1);
        assert_eq!(agg.tasks_failed, 1);
        assert_eq!(agg.tasks_cancelled, 1);
        assert_eq!(agg.duration_ms, 60);

        let ids: Vec<String> = monitor
            .snapshot()
            .await
            .into_iter()
            .map(|s| s.agent_id)
            .collect();
        assert_eq!(ids, vec!["editor", "planner", "writer"]);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = AgentMonitor::new();
        monitor.start_task("planner", Uuid::new_v4()).await;
        let json = monitor.to_json().await;
        assert!(json["agents"].is_array());
        assert_eq!(json["aggregate"]["tasks_started"], 1);
    }
}
