//! The Action / Provider / Evaluator plugin contracts.
//!
//! These are the interface-typed maps the Service Registry stores: plugins
//! produce concrete implementations, the registry only ever sees the trait
//! object, dispatched dynamically by name.

use async_trait::async_trait;
use serde_json::Value;
use std::time::SystemTime;

/// Context handed to an [`Action`]'s `execute`.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub plugin_name: String,
    pub agent_id: String,
    pub input: Value,
    pub metadata: Option<Value>,
}

/// Outcome of an action invocation. Never constructed by throwing — the
/// Executor normalizes exceptions into this shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None, metadata: None }
    }

    pub fn ok_empty() -> Self {
        Self { success: true, data: None, error: None, metadata: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()), metadata: None }
    }
}

/// Result of [`Action::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self { valid: false, errors }
    }
}

/// A named, invocable unit contributed by a plugin.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Default: always valid. Actions that need input validation override
    /// this; the Executor only calls it when present (conceptually "the
    /// action declares a validator").
    fn validate(&self, _input: &Value) -> ValidationResult {
        ValidationResult::ok()
    }

    /// Whether this action declares a validator at all. Actions overriding
    /// `validate` should also override this to return `true`, or the
    /// Executor will skip calling `validate`.
    fn has_validator(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionResult;
}

/// Context handed to a [`Provider`]'s `get`.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub plugin_name: String,
    pub agent_id: String,
    pub query: Value,
    pub chain_id: Option<String>,
}

/// Outcome of a provider query.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

impl ProviderResult {
    pub fn ok(data: Value, cached: bool) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: now_millis(),
            cached: Some(cached),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: now_millis(),
            cached: None,
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A named, queryable data source contributed by a plugin. `type_tag` is the
/// provider's free-form type label (the trait method can't be named `type`,
/// a reserved word).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn type_tag(&self) -> &str;
    async fn get(&self, ctx: &ProviderContext) -> ProviderResult;
}

/// Context handed to an [`Evaluator`]'s `evaluate`.
#[derive(Debug, Clone)]
pub struct EvaluatorContext {
    pub plugin_name: String,
    pub agent_id: String,
    pub condition: String,
    pub data: Value,
}

/// A named boolean predicate contributed by a plugin. Evaluators return a bare `bool`; a missing evaluator is the
/// Executor's concern (it raises `EvaluatorNotFound`), not this trait's.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;
    async fn evaluate(&self, ctx: &EvaluatorContext) -> bool;
}
