//! Core types and error definitions for the Inkflow workflow runtime.
//!
//! This crate provides the foundational types shared across all Inkflow crates.
//!
//! # Main types
//!
//! - [`InkflowError`] — Unified error enum for the agent, queue and engine layers.
//! - [`InkflowResult`] — Convenience alias for `Result<T, InkflowError>`.
//! - [`TaskId`], [`WorkflowId`], [`AgentId`] — Identifier aliases.
//! - [`EventBus`] — Broadcast channel used for agent, task and workflow events.

/// Broadcast event bus.
pub mod event;

pub use event::EventBus;

use uuid::Uuid;

// --- Identifiers ---

/// Identifier of a single schedulable task.
pub type TaskId = Uuid;

/// Identifier of a workflow definition.
pub type WorkflowId = Uuid;

/// Stable identifier of a registered agent.
pub type AgentId = String;

// --- Error types ---

/// Top-level error type for Inkflow.
///
/// Each variant corresponds to a class of failure. Task-level failures are
/// recorded on the task itself and only surface through this type when a
/// caller asks for them explicitly.
#[derive(Debug, thiserror::Error)]
pub enum InkflowError {
    /// A submitted task or workflow is malformed (nil id, duplicate id,
    /// out-of-range priority, unknown dependency).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A task references an agent id that is not registered.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The dependency graph of a submission contains a cycle.
    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    /// An error raised by an agent while executing a task.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error tied to a specific task (lookup, state transition).
    #[error("Task error: {0}")]
    Task(String),

    /// An error from the workflow engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An operation exceeded its configured time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InkflowError {
    /// Whether this error means the submission was rejected before anything ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InkflowError::Validation(_)
                | InkflowError::AgentNotFound(_)
                | InkflowError::DependencyCycle(_)
        )
    }
}

/// A convenience `Result` alias using [`InkflowError`].
pub type InkflowResult<T> = Result<T, InkflowError>;
