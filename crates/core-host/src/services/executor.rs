//! Executor: thin dispatcher over the Service Registry that adds input
//! validation, retry with exponential backoff, and error normalization.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use super::contracts::{
    ActionContext, ActionResult, EvaluatorContext, ProviderContext, ProviderResult,
};
use super::error::ServiceError;
use super::registry::ServiceRegistry;

/// Options for [`Executor::execute_action`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub retry: bool,
    pub max_retries: Option<u32>,
    pub agent_id: Option<String>,
    pub metadata: Option<Value>,
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(50);

pub struct Executor {
    registry: Arc<ServiceRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Derive the owning plugin name from a qualified service name
    /// (`"swap:quote"` -> `"swap"`). Names with no `:` derive `"unknown"`.
    fn derive_plugin_name(name: &str) -> String {
        name.split_once(':').map(|(owner, _)| owner.to_string()).unwrap_or_else(|| "unknown".to_string())
    }

    fn generate_agent_id() -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 8] = rng.gen();
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Execute a registered action. "Not found", validation failures, and
    /// action-raised errors are all normalized into the returned
    /// [`ActionResult`] rather than propagated as `Err`.
    pub async fn execute_action(&self, name: &str, input: Value, opts: ExecuteOptions) -> ActionResult {
        let action = match self.registry.get_action(name).await {
            Some(action) => action,
            None => return ActionResult::err(format!("Action/Provider not found: {name}")),
        };

        if action.has_validator() {
            let validation = action.validate(&input);
            if !validation.valid {
                return ActionResult::err(format!("Validation failed: {}", validation.errors.join(", ")));
            }
        }

        let ctx = ActionContext {
            plugin_name: Self::derive_plugin_name(name),
            agent_id: opts.agent_id.clone().unwrap_or_else(Self::generate_agent_id),
            input,
            metadata: opts.metadata.clone(),
        };

        if !opts.retry {
            return action.execute(&ctx).await;
        }

        let max_retries = opts.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let mut attempt = 0;
        loop {
            let result = action.execute(&ctx).await;
            if result.success || attempt >= max_retries {
                return result;
            }
            attempt += 1;
            let backoff = BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1));
            log::debug!(
                "executor: retrying action '{}' (attempt {}/{}) after {:?}",
                name, attempt, max_retries, backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Query a registered provider. Exceptions are normalized, never
    /// propagated.
    pub async fn get_data(&self, name: &str, query: Value) -> ProviderResult {
        let provider = match self.registry.get_provider(name).await {
            Some(provider) => provider,
            None => return ProviderResult::err(format!("Action/Provider not found: {name}")),
        };
        let ctx = ProviderContext {
            plugin_name: Self::derive_plugin_name(name),
            agent_id: Self::generate_agent_id(),
            query,
            chain_id: None,
        };
        provider.get(&ctx).await
    }

    /// Evaluate a registered boolean predicate. Unlike `execute_action` and
    /// `get_data`, a missing evaluator is an out-of-band error: boolean is
    /// the only other return value, so there is no in-band way to signal
    /// "not found".
    pub async fn evaluate(&self, name: &str, condition: String, data: Value) -> Result<bool, ServiceError> {
        let evaluator = self
            .registry
            .get_evaluator(name)
            .await
            .ok_or_else(|| ServiceError::EvaluatorNotFound(name.to_string()))?;
        let ctx = EvaluatorContext {
            plugin_name: Self::derive_plugin_name(name),
            agent_id: Self::generate_agent_id(),
            condition,
            data,
        };
        Ok(evaluator.evaluate(&ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::contracts::{Evaluator, Provider};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAction {
        fail_until: AtomicU32,
    }

    #[async_trait]
    impl crate::services::contracts::Action for FlakyAction {
        fn name(&self) -> &str {
            "flaky:run"
        }
        async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
            let attempts = self.fail_until.fetch_sub(1, Ordering::SeqCst);
            if attempts > 0 {
                ActionResult::err("not yet")
            } else {
                ActionResult::ok(json!({"done": true}))
            }
        }
    }

    struct AlwaysInvalid;

    #[async_trait]
    impl crate::services::contracts::Action for AlwaysInvalid {
        fn name(&self) -> &str {
            "strict:run"
        }
        fn has_validator(&self) -> bool {
            true
        }
        fn validate(&self, _input: &Value) -> crate::services::contracts::ValidationResult {
            crate::services::contracts::ValidationResult::fail(vec!["missing field 'x'".to_string()])
        }
        async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
            ActionResult::ok_empty()
        }
    }

    struct YesEvaluator;

    #[async_trait]
    impl Evaluator for YesEvaluator {
        fn name(&self) -> &str {
            "always:yes"
        }
        async fn evaluate(&self, _ctx: &EvaluatorContext) -> bool {
            true
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo:data"
        }
        fn type_tag(&self) -> &str {
            "echo"
        }
        async fn get(&self, ctx: &ProviderContext) -> ProviderResult {
            ProviderResult::ok(ctx.query.clone(), false)
        }
    }

    #[tokio::test]
    async fn not_found_is_in_band_not_an_error() {
        let registry = Arc::new(ServiceRegistry::new());
        let executor = Executor::new(registry);
        let result = executor.execute_action("nope:run", json!({}), ExecuteOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Action/Provider not found: nope:run");
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_without_retry() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_action(Arc::new(AlwaysInvalid), "strict").await;
        let executor = Executor::new(registry);
        let result = executor
            .execute_action("strict:run", json!({}), ExecuteOptions { retry: true, ..Default::default() })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Validation failed: missing field 'x'");
    }

    #[tokio::test]
    async fn retry_exhausts_budget_then_succeeds() {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register_action(Arc::new(FlakyAction { fail_until: AtomicU32::new(2) }), "flaky")
            .await;
        let executor = Executor::new(registry);
        let result = executor
            .execute_action(
                "flaky:run",
                json!({}),
                ExecuteOptions { retry: true, max_retries: Some(5), ..Default::default() },
            )
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn evaluate_missing_is_an_error_not_false() {
        let registry = Arc::new(ServiceRegistry::new());
        let executor = Executor::new(registry);
        let err = executor.evaluate("nope:check", "x > 1".to_string(), json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::EvaluatorNotFound(_)));
    }

    #[tokio::test]
    async fn evaluate_dispatches_to_registered_evaluator() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_evaluator(Arc::new(YesEvaluator), "always").await;
        let executor = Executor::new(registry);
        let outcome = executor.evaluate("always:yes", "whatever".to_string(), json!({})).await.unwrap();
        assert!(outcome);
    }

    #[tokio::test]
    async fn get_data_echoes_query_and_never_errors_out_of_band() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_provider(Arc::new(EchoProvider), "echo").await;
        let executor = Executor::new(registry);
        let result = executor.get_data("echo:data", json!({"q": 1})).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap(), json!({"q": 1}));
    }
}
