//! Errors raised by the Flow Engine.

#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    #[error("flow not found: {0}")]
    NotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("invalid flow: {0:?}")]
    InvalidFlow(Vec<String>),

    #[error("node '{node}' failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("service error: {0}")]
    Service(#[from] crate::services::ServiceError),
}
