//! Agent abstraction and registry for the Inkflow task queue.
//!
//! An [`Agent`] is an executor that performs typed tasks (outline a chapter,
//! draft a scene, review a character arc). Agents are registered in an
//! [`AgentRegistry`] keyed by a stable id, and the task queue dispatches each
//! task to the agent its `target_agent_id` names.

/// The [`Agent`] trait and its result/event types.
pub mod agent;
/// Per-task execution context handed to agents.
pub mod context;
/// Agent id → handle registry.
pub mod registry;

pub use agent::{Agent, AgentEvent, AgentStatus, TaskResult};
pub use context::TaskContext;
pub use registry::AgentRegistry;
