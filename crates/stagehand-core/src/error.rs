//! Core error types for stagehand-core

use thiserror::Error;

/// Errors raised while building or running a deployment
///
/// The first group is detected before any remote contact; the run-time
/// group becomes the failure reason of a `DeploymentRun`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No host registered for the stage
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A host is already registered for the stage
    #[error("stage already has a host: {0}")]
    DuplicateStage(String),

    /// Task name not present in the graph
    #[error("task not defined: {name}{}", referenced_suffix(.referenced_by))]
    UndefinedTask {
        /// Missing task name
        name: String,
        /// Composite that referenced it, if any
        referenced_by: Option<String>,
    },

    /// Composite tasks reference each other in a loop
    #[error("cyclic task reference: {}", .path.join(" -> "))]
    CyclicReference {
        /// Expansion stack from the first repeated name back to itself
        path: Vec<String>,
    },

    /// Task is internal and cannot be invoked directly
    #[error("task is private: {0}")]
    PrivateTask(String),

    /// Template placeholder without a value
    #[error("undefined variable {{{{{name}}}}} in \"{template}\"")]
    UndefinedVariable {
        /// Placeholder name
        name: String,
        /// Template that used it
        template: String,
    },

    /// Invalid run status transition
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Attempted status
        to: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The executor for a host could not be prepared (bad key, for example)
    #[error("cannot prepare connection: {0}")]
    ExecutorSetup(String),

    /// Remote command exited non-zero
    #[error("task {task} failed with exit code {exit_code}{}", stderr_suffix(.stderr))]
    RemoteCommandFailure {
        /// Leaf task name
        task: String,
        /// Exit status reported by the host
        exit_code: i32,
        /// Trimmed stderr
        stderr: String,
    },

    /// Upload could not be completed
    #[error("task {task} upload failed: {reason}")]
    TransferFailure {
        /// Leaf task name
        task: String,
        /// What went wrong
        reason: String,
    },

    /// Host unreachable or session lost
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
}

fn referenced_suffix(parent: &Option<String>) -> String {
    parent
        .as_ref()
        .map(|p| format!(" (referenced by {p})"))
        .unwrap_or_default()
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl CoreError {
    /// Whether the error is detected before any remote contact
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownStage(_)
                | CoreError::DuplicateStage(_)
                | CoreError::UndefinedTask { .. }
                | CoreError::CyclicReference { .. }
                | CoreError::PrivateTask(_)
                | CoreError::UndefinedVariable { .. }
                | CoreError::ConfigError(_)
                | CoreError::ExecutorSetup(_)
        )
    }
}
