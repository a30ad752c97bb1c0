//! Service Registry and Executor: name-addressed dispatch of actions,
//! providers, and evaluators contributed by plugins.

pub mod contracts;
pub mod error;
pub mod executor;
pub mod registry;

pub use contracts::{
    Action, ActionContext, ActionResult, Evaluator, EvaluatorContext, Provider, ProviderContext,
    ProviderResult, ValidationResult,
};
pub use error::ServiceError;
pub use executor::{ExecuteOptions, Executor};
pub use registry::{ServiceRegistry, ServiceStats};
