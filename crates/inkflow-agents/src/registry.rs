use crate::agent::{Agent, TaskResult};
use crate::context::TaskContext;
use inkflow_core::{AgentId, InkflowError, InkflowResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Central registry mapping agent ids to executor handles.
///
/// The registry is shared behind an `Arc` by the task queue (for dispatch)
/// and the workflow engine (for validation and registration). All access goes
/// through short read/write critical sections.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent under its id, returning the handle it replaced.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let id = agent.id().to_string();
        info!(agent = %id, name = %agent.name(), "Registered agent");
        self.agents.write().insert(id, agent)
    }

    /// Remove an agent, returning it if it was registered.
    pub fn unregister(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        let removed = self.agents.write().remove(agent_id);
        if removed.is_some() {
            info!(agent = %agent_id, "Unregistered agent");
        }
        removed
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Return every id in `ids` that is not registered, first occurrence
    /// order, without duplicates.
    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<AgentId> {
        let agents = self.agents.read();
        let mut missing: Vec<AgentId> = Vec::new();
        for id in ids {
            if !agents.contains_key(id) && !missing.iter().any(|m| m == id) {
                missing.push(id.to_string());
            }
        }
        missing
    }

    /// Execute a task on the agent registered under `agent_id`.
    pub async fn execute(&self, agent_id: &str, ctx: TaskContext) -> InkflowResult<TaskResult> {
        let agent = self
            .get(agent_id)
            .ok_or_else(|| InkflowError::AgentNotFound(agent_id.to_string()))?;

        debug!(
            agent = %agent_id,
            task_id = %ctx.task_id,
            task_type = %ctx.task_type,
            "Dispatching task to agent"
        );
        agent.execute(ctx).await
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
