//! Lifecycle Manager: drives `registered -> initializing -> active` and
//! `active -> destroyed` transitions, binding a plugin's declared
//! capabilities into the Service Registry and Hook Bus on init and
//! unwinding them on destroy.
//!
//! Concurrent-safe initialization combines two mechanisms, grounded on the
//! teacher's `initialize_plugin_recursive` (`plugin_system/registry.rs`):
//! a per-call-chain "currently initializing" set catches cycles that the
//! Plugin Registry's static topo sort cannot (a dependency edge that only
//! appears at runtime), while a `tokio::sync::OnceCell` per plugin name
//! gives concurrent *unrelated* callers a single shared in-flight
//! operation instead of each re-running `init`.

use std::collections::HashSet;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::facade::CoreFacade;
use crate::hooks::HookBus;
use crate::services::ServiceRegistry;

use super::error::PluginSystemError;
use super::record::PluginStatus;
use super::registry::PluginRegistry;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    BeforeInit,
    AfterInit,
    BeforeDestroy,
    AfterDestroy,
    Error,
}

#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub plugin: String,
    pub error: Option<String>,
}

pub type LifecycleObserver = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

pub struct LifecycleManager {
    plugin_registry: Arc<PluginRegistry>,
    service_registry: Arc<ServiceRegistry>,
    hook_bus: Arc<HookBus>,
    observers: Mutex<Vec<(u64, LifecycleObserver)>>,
    next_observer_id: Mutex<u64>,
    inflight: Mutex<std::collections::HashMap<String, Arc<OnceCell<Result<(), PluginSystemError>>>>>,
}

impl LifecycleManager {
    pub fn new(
        plugin_registry: Arc<PluginRegistry>,
        service_registry: Arc<ServiceRegistry>,
        hook_bus: Arc<HookBus>,
    ) -> Self {
        Self {
            plugin_registry,
            service_registry,
            hook_bus,
            observers: Mutex::new(Vec::new()),
            next_observer_id: Mutex::new(0),
            inflight: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Subscribe to `beforeInit | afterInit | beforeDestroy | afterDestroy |
    /// error`. Returns an unsubscribe closure. Observer panics are caught
    /// and logged — they must never break lifecycle flow.
    pub async fn on_lifecycle(&self, handler: LifecycleObserver) -> LifecycleSubscription<'_> {
        let mut id_guard = self.next_observer_id.lock().await;
        let id = *id_guard;
        *id_guard += 1;
        drop(id_guard);
        self.observers.lock().await.push((id, handler));
        LifecycleSubscription { manager: self, id }
    }

    async fn notify(&self, event: LifecycleEvent) {
        let observers = self.observers.lock().await;
        for (_, observer) in observers.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer(&event)));
            if outcome.is_err() {
                log::error!("lifecycle observer panicked handling {:?} for '{}'", event.kind, event.plugin);
            }
        }
    }

    async fn cell_for(&self, name: &str) -> Arc<OnceCell<Result<(), PluginSystemError>>> {
        self.inflight.lock().await.entry(name.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
    }

    /// Initialize a single plugin, recursively initializing its
    /// dependencies first. Idempotent once the plugin is `active`.
    pub async fn init_plugin(&self, core: Arc<CoreFacade>, name: &str) -> Result<(), PluginSystemError> {
        let chain = Arc::new(Mutex::new(HashSet::new()));
        self.init_plugin_chained(core, name.to_string(), chain).await
    }

    fn init_plugin_chained<'a>(
        &'a self,
        core: Arc<CoreFacade>,
        name: String,
        chain: Arc<Mutex<HashSet<String>>>,
    ) -> BoxFuture<'a, Result<(), PluginSystemError>> {
        Box::pin(async move {
            match self.plugin_registry.get_state(&name).await {
                Some(record) if record.status == PluginStatus::Active => return Ok(()),
                Some(_) => {}
                None => return Err(PluginSystemError::NotFound(name)),
            }

            {
                let mut guard = chain.lock().await;
                if guard.contains(&name) {
                    return Err(PluginSystemError::CircularDependency(vec![name]));
                }
                guard.insert(name.clone());
            }

            let cell = self.cell_for(&name).await;
            cell.get_or_init(|| self.do_init(core, name.clone(), chain.clone())).await.clone()
        })
    }

    async fn do_init(
        &self,
        core: Arc<CoreFacade>,
        name: String,
        chain: Arc<Mutex<HashSet<String>>>,
    ) -> Result<(), PluginSystemError> {
        let missing = self.plugin_registry.get_missing_dependencies(&name).await;
        if !missing.is_empty() {
            let err = PluginSystemError::MissingDependencies { plugin: name.clone(), missing };
            self.mark_error(&name, &err).await;
            return Err(err);
        }

        let Some(record) = self.plugin_registry.get_state(&name).await else {
            return Err(PluginSystemError::NotFound(name));
        };

        for dep in &record.dependencies {
            self.init_plugin_chained(core.clone(), dep.clone(), chain.clone()).await?;
        }

        self.notify(LifecycleEvent { kind: LifecycleEventKind::BeforeInit, plugin: name.clone(), error: None }).await;

        self.plugin_registry.update_status(&name, PluginStatus::Initializing, None).await?;

        if let Err(err) = record.plugin.init(core.clone()).await {
            let wrapped = PluginSystemError::InitializationError { plugin: name.clone(), message: err.to_string() };
            self.mark_error(&name, &wrapped).await;
            return Err(wrapped);
        }

        for action in record.plugin.actions() {
            self.service_registry.register_action(action, &name).await;
        }
        for provider in record.plugin.providers() {
            self.service_registry.register_provider(provider, &name).await;
        }
        for evaluator in record.plugin.evaluators() {
            self.service_registry.register_evaluator(evaluator, &name).await;
        }
        for hook in record.plugin.hooks() {
            self.hook_bus.register(hook, Some(&name)).await;
        }

        self.plugin_registry.update_status(&name, PluginStatus::Active, None).await?;
        log::info!("lifecycle: plugin '{}' is now active", name);
        self.notify(LifecycleEvent { kind: LifecycleEventKind::AfterInit, plugin: name, error: None }).await;
        Ok(())
    }

    async fn mark_error(&self, name: &str, err: &PluginSystemError) {
        let _ = self.plugin_registry.update_status(name, PluginStatus::Error, Some(err.to_string())).await;
        log::error!("lifecycle: plugin '{}' failed to initialize: {}", name, err);
        self.notify(LifecycleEvent {
            kind: LifecycleEventKind::Error,
            plugin: name.to_string(),
            error: Some(err.to_string()),
        })
        .await;
    }

    /// Initialize every registered plugin in dependency order. Fails fast
    /// on the first error.
    pub async fn init_all(&self, core: Arc<CoreFacade>) -> Result<(), PluginSystemError> {
        let order = self.plugin_registry.get_load_order().await?;
        for name in order {
            self.init_plugin(core.clone(), &name).await?;
        }
        Ok(())
    }

    /// Destroy a single plugin. Refused if any *active* dependent exists.
    pub async fn destroy_plugin(&self, name: &str) -> Result<(), PluginSystemError> {
        let Some(record) = self.plugin_registry.get_state(name).await else {
            return Err(PluginSystemError::NotFound(name.to_string()));
        };

        let mut active_dependents = Vec::new();
        for dependent in self.plugin_registry.get_dependents(name).await {
            if let Some(dep_record) = self.plugin_registry.get_state(&dependent).await {
                if dep_record.status == PluginStatus::Active {
                    active_dependents.push(dependent);
                }
            }
        }
        if !active_dependents.is_empty() {
            return Err(PluginSystemError::UnregisterBlocked {
                plugin: name.to_string(),
                dependents: active_dependents,
            });
        }

        self.notify(LifecycleEvent {
            kind: LifecycleEventKind::BeforeDestroy,
            plugin: name.to_string(),
            error: None,
        })
        .await;

        self.service_registry.unregister_plugin(name).await;
        self.hook_bus.unregister_plugin(name).await;

        if let Err(err) = record.plugin.destroy().await {
            let wrapped = PluginSystemError::ShutdownError { plugin: name.to_string(), message: err.to_string() };
            self.mark_error(name, &wrapped).await;
            return Err(wrapped);
        }

        self.plugin_registry.update_status(name, PluginStatus::Destroyed, None).await?;
        self.inflight.lock().await.remove(name);
        log::info!("lifecycle: plugin '{}' destroyed", name);
        self.notify(LifecycleEvent {
            kind: LifecycleEventKind::AfterDestroy,
            plugin: name.to_string(),
            error: None,
        })
        .await;
        Ok(())
    }

    /// Destroy every plugin in reverse load order. Errors on one plugin are
    /// logged and the loop continues with the rest.
    pub async fn destroy_all(&self) {
        let order = match self.plugin_registry.get_load_order().await {
            Ok(order) => order,
            Err(err) => {
                log::error!("lifecycle: cannot compute destroy order: {}", err);
                return;
            }
        };
        for name in order.into_iter().rev() {
            if let Err(err) = self.destroy_plugin(&name).await {
                log::error!("lifecycle: error destroying '{}': {}", name, err);
            }
        }
    }

    /// Destroy then re-initialize a plugin, clearing the memoized init
    /// operation in between so the reload actually re-runs `init`.
    pub async fn reload_plugin(&self, core: Arc<CoreFacade>, name: &str) -> Result<(), PluginSystemError> {
        self.destroy_plugin(name).await?;
        self.inflight.lock().await.remove(name);
        self.init_plugin(core, name).await
    }
}

/// RAII-ish unsubscribe handle returned by [`LifecycleManager::on_lifecycle`].
/// Call [`LifecycleSubscription::unsubscribe`] to remove the observer; simply
/// dropping it leaves the observer registered.
pub struct LifecycleSubscription<'a> {
    manager: &'a LifecycleManager,
    id: u64,
}

impl LifecycleSubscription<'_> {
    pub async fn unsubscribe(self) {
        self.manager.observers.lock().await.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_system::registry::RegisterOptions;
    use crate::plugin_system::traits::Plugin;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlugin {
        name: &'static str,
        deps: Vec<String>,
        init_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        async fn init(&self, _core: Arc<CoreFacade>) -> Result<(), PluginSystemError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn facade_with(plugins: Vec<(Arc<dyn Plugin>, RegisterOptions)>) -> Arc<CoreFacade> {
        let facade = Arc::new(CoreFacade::new(crate::config::ConfigMap::default()));
        for (plugin, opts) in plugins {
            facade.plugins().register(plugin, opts).await.unwrap();
        }
        facade
    }

    #[tokio::test]
    async fn reinit_of_active_plugin_calls_init_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let plugin: Arc<dyn Plugin> =
            Arc::new(CountingPlugin { name: "solo", deps: vec![], init_calls: calls.clone() });
        let facade = facade_with(vec![(plugin, RegisterOptions::default())]).await;

        facade.lifecycle().init_plugin(facade.clone(), "solo").await.unwrap();
        facade.lifecycle().init_plugin(facade.clone(), "solo").await.unwrap();
        facade.lifecycle().init_plugin(facade.clone(), "solo").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn init_all_respects_dependency_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a: Arc<dyn Plugin> = Arc::new(CountingPlugin { name: "a", deps: vec![], init_calls: calls.clone() });
        let b: Arc<dyn Plugin> =
            Arc::new(CountingPlugin { name: "b", deps: vec!["a".to_string()], init_calls: calls.clone() });
        let facade = facade_with(vec![
            (b, RegisterOptions::default()),
            (a, RegisterOptions::default()),
        ])
        .await;

        facade.lifecycle().init_all(facade.clone()).await.unwrap();

        let a_state = facade.plugins().get("a").await.unwrap();
        let b_state = facade.plugins().get("b").await.unwrap();
        assert_eq!(a_state.status, PluginStatus::Active);
        assert_eq!(b_state.status, PluginStatus::Active);
        assert!(a_state.loaded_at.unwrap() <= b_state.loaded_at.unwrap());
    }

    #[tokio::test]
    async fn destroy_blocked_while_active_dependent_exists() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base: Arc<dyn Plugin> = Arc::new(CountingPlugin { name: "base", deps: vec![], init_calls: calls.clone() });
        let top: Arc<dyn Plugin> =
            Arc::new(CountingPlugin { name: "top", deps: vec!["base".to_string()], init_calls: calls.clone() });
        let facade = facade_with(vec![
            (base, RegisterOptions::default()),
            (top, RegisterOptions::default()),
        ])
        .await;
        facade.lifecycle().init_all(facade.clone()).await.unwrap();

        let err = facade.lifecycle().destroy_plugin("base").await.unwrap_err();
        assert!(matches!(err, PluginSystemError::UnregisterBlocked { .. }));
    }
}
