//! Engine errors

use thiserror::Error;

/// Errors raised by the workflow engine
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Arguments do not fit the function's parameter schema
    #[error("cannot bind arguments to {function}: {reason}")]
    Binding { function: String, reason: String },

    /// No task or layer with this name
    #[error("{0} not found")]
    NotFound(String),

    /// The step function itself failed
    #[error("computing {name} failed: {source}")]
    Compute {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WorkflowError {
    pub(crate) fn binding(function: &str, reason: impl Into<String>) -> Self {
        Self::Binding {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}
