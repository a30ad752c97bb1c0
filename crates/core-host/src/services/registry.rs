//! Service Registry: maps qualified names to actions/providers/evaluators,
//! with a reverse index by owning plugin.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::contracts::{Action, Evaluator, Provider};

/// Registration counts, for observability.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ServiceStats {
    pub actions: usize,
    pub providers: usize,
    pub evaluators: usize,
}

#[derive(Default)]
struct Kind<T: ?Sized> {
    by_name: HashMap<String, Arc<T>>,
    by_owner: HashMap<String, HashSet<String>>,
}

impl<T: ?Sized> Kind<T> {
    fn register(&mut self, name: String, owner: &str, service: Arc<T>) {
        if let Some(prev_owner) = self.owner_of(&name) {
            if let Some(names) = self.by_owner.get_mut(&prev_owner) {
                names.remove(&name);
            }
        }
        self.by_name.insert(name.clone(), service);
        self.by_owner.entry(owner.to_string()).or_default().insert(name);
    }

    fn owner_of(&self, name: &str) -> Option<String> {
        self.by_owner
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(owner, _)| owner.clone())
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.by_name.get(name).cloned()
    }

    fn unregister_plugin(&mut self, owner: &str) {
        if let Some(names) = self.by_owner.remove(owner) {
            for name in names {
                self.by_name.remove(&name);
            }
        }
    }

    fn all_names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.by_name.clear();
        self.by_owner.clear();
    }

    fn count(&self) -> usize {
        self.by_name.len()
    }
}

/// The Service Registry. Registration and unregistration are atomic with
/// respect to lookups: a single `RwLock` guards all three kinds so
/// a reader sees either the full prior state or the full posterior state,
/// never a partial write.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    actions: Kind<dyn Action>,
    providers: Kind<dyn Provider>,
    evaluators: Kind<dyn Evaluator>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Overwrites any existing registration under the
    /// same name, updating the reverse index for the old owner.
    pub async fn register_action(&self, action: Arc<dyn Action>, owner: &str) {
        let name = action.name().to_string();
        let mut inner = self.inner.write().await;
        log::debug!("service registry: registering action '{}' for plugin '{}'", name, owner);
        inner.actions.register(name, owner, action);
    }

    pub async fn register_provider(&self, provider: Arc<dyn Provider>, owner: &str) {
        let name = provider.name().to_string();
        let mut inner = self.inner.write().await;
        log::debug!("service registry: registering provider '{}' for plugin '{}'", name, owner);
        inner.providers.register(name, owner, provider);
    }

    pub async fn register_evaluator(&self, evaluator: Arc<dyn Evaluator>, owner: &str) {
        let name = evaluator.name().to_string();
        let mut inner = self.inner.write().await;
        log::debug!("service registry: registering evaluator '{}' for plugin '{}'", name, owner);
        inner.evaluators.register(name, owner, evaluator);
    }

    pub async fn get_action(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.inner.read().await.actions.get(name)
    }

    pub async fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.inner.read().await.providers.get(name)
    }

    pub async fn get_evaluator(&self, name: &str) -> Option<Arc<dyn Evaluator>> {
        self.inner.read().await.evaluators.get(name)
    }

    /// Remove every action/provider/evaluator owned by `owner`. Idempotent.
    pub async fn unregister_plugin(&self, owner: &str) {
        let mut inner = self.inner.write().await;
        inner.actions.unregister_plugin(owner);
        inner.providers.unregister_plugin(owner);
        inner.evaluators.unregister_plugin(owner);
        log::debug!("service registry: unregistered all services owned by '{}'", owner);
    }

    pub async fn get_all_actions(&self) -> Vec<String> {
        self.inner.read().await.actions.all_names()
    }

    pub async fn get_all_providers(&self) -> Vec<String> {
        self.inner.read().await.providers.all_names()
    }

    pub async fn get_all_evaluators(&self) -> Vec<String> {
        self.inner.read().await.evaluators.all_names()
    }

    pub async fn stats(&self) -> ServiceStats {
        let inner = self.inner.read().await;
        ServiceStats {
            actions: inner.actions.count(),
            providers: inner.providers.count(),
            evaluators: inner.evaluators.count(),
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.actions.clear();
        inner.providers.clear();
        inner.evaluators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::contracts::{ActionContext, ActionResult};
    use async_trait::async_trait;

    struct EchoAction(&'static str);

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, ctx: &ActionContext) -> ActionResult {
            ActionResult::ok(ctx.input.clone())
        }
    }

    #[tokio::test]
    async fn overwrite_updates_reverse_index_for_old_owner() {
        let registry = ServiceRegistry::new();
        registry.register_action(Arc::new(EchoAction("swap:quote")), "swap").await;
        registry.register_action(Arc::new(EchoAction("swap:quote")), "other").await;

        registry.unregister_plugin("swap").await;
        // 'other' re-registered the same name, so it must survive 'swap's unregister.
        assert!(registry.get_action("swap:quote").await.is_some());

        registry.unregister_plugin("other").await;
        assert!(registry.get_action("swap:quote").await.is_none());
    }

    #[tokio::test]
    async fn unregister_plugin_is_idempotent_and_scoped() {
        let registry = ServiceRegistry::new();
        registry.register_action(Arc::new(EchoAction("a:one")), "a").await;
        registry.register_action(Arc::new(EchoAction("b:one")), "b").await;

        registry.unregister_plugin("a").await;
        registry.unregister_plugin("a").await; // idempotent

        assert!(registry.get_action("a:one").await.is_none());
        assert!(registry.get_action("b:one").await.is_some());
    }
}
