//! Errors raised by the Service Registry and Executor.

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Action/Provider not found: {0}")]
    NotFound(String),

    #[error("Evaluator not found: {0}")]
    EvaluatorNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
