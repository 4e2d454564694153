//! Dependency-aware task scheduling and workflow execution for Inkflow.
//!
//! A [`TaskQueue`] dispatches tasks to registered agents with bounded
//! concurrency, gating each task on its dependencies and ordering eligible
//! tasks by priority. A [`WorkflowEngine`] submits whole task graphs to the
//! queue, tracks workflow status and aggregates the outcome.
//!
//! # Main types
//!
//! - [`TaskQueue`] — Priority and dependency-gated queue with a fixed permit pool.
//! - [`WorkflowEngine`] — Runs [`WorkflowDefinition`]s and exposes pause/resume/cancel.
//! - [`AgentMonitor`] — Per-agent execution state and metrics fed by the queue.
//! - [`WorkflowTemplate`] — Canned writing workflows (chapter, character, consistency).
//! - [`OrchestrationEvent`] — Task, workflow and agent notifications on a broadcast bus.
//! - [`InkflowConfig`] — Queue and engine settings loaded from TOML.

/// Queue and engine configuration.
pub mod config;
/// Workflow execution engine.
pub mod engine;
/// Orchestration events and the shared bus.
pub mod events;
/// Per-agent execution monitoring.
pub mod monitor;
/// Priority task queue and dispatcher.
pub mod task_queue;
/// Predefined workflow templates and context providers.
pub mod templates;
/// Shared task and workflow types.
pub mod types;

pub use config::{EngineConfig, InkflowConfig, QueueConfig};
pub use engine::WorkflowEngine;
pub use events::{OrchestrationBus, OrchestrationEvent};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use task_queue::TaskQueue;
pub use templates::{ContextProvider, WorkflowTemplate};
pub use types::{
    TaskQueueStatus, TaskStatus, WorkflowDefinition, WorkflowExecutionResult, WorkflowStatus,
    WorkflowTask, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
