//! Core Facade: the single object a plugin receives at `init`, tying the
//! Service Registry, Hook Bus, Plugin Registry/Lifecycle Manager, and Flow
//! Engine together behind one handle.
//!
//! Grounded on the teacher's `kernel::bootstrap::Application`, which builds
//! each component and hands out `Arc<T>` clones through a dependency
//! registry; this facade is the statically-typed equivalent scoped to the
//! four subsystems a plugin actually needs.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigMap;
use crate::flow::FlowEngine;
use crate::hooks::HookBus;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::lifecycle::LifecycleManager;
use crate::plugin_system::record::PluginRecord;
use crate::plugin_system::registry::{PluginRegistry, RegisterOptions};
use crate::plugin_system::traits::Plugin;
use crate::services::{ActionResult, ExecuteOptions, Executor, ProviderResult, ServiceRegistry};

/// Convenience dispatch handed out as `core.runtime`. Same semantics as
/// calling the [`Executor`] directly; kept separate so plugins reach for
/// `core.runtime.execute_action(..)` without needing an `Executor` import.
pub struct RuntimeHandle {
    executor: Arc<Executor>,
}

impl RuntimeHandle {
    pub async fn execute_action(&self, name: &str, input: Value) -> ActionResult {
        self.executor.execute_action(name, input, ExecuteOptions::default()).await
    }

    pub async fn get_data(&self, name: &str, query: Value) -> ProviderResult {
        self.executor.get_data(name, query).await
    }
}

/// `core.plugins`: the Plugin Manager facade — register/load/unload/get over
/// the Plugin Registry, with `load`/`unload` delegating to the Lifecycle
/// Manager so callers don't juggle two handles for one conceptual action.
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    lifecycle: Arc<LifecycleManager>,
}

impl PluginManager {
    pub async fn register(
        &self,
        plugin: Arc<dyn Plugin>,
        opts: RegisterOptions,
    ) -> Result<(), PluginSystemError> {
        self.registry.register(plugin, opts).await
    }

    pub async fn unregister(&self, name: &str) -> Result<(), PluginSystemError> {
        self.registry.unregister(name).await
    }

    /// Initialize a registered plugin (and, recursively, its dependencies).
    pub async fn load(&self, core: Arc<CoreFacade>, name: &str) -> Result<(), PluginSystemError> {
        self.lifecycle.init_plugin(core, name).await
    }

    pub async fn unload(&self, name: &str) -> Result<(), PluginSystemError> {
        self.lifecycle.destroy_plugin(name).await
    }

    pub async fn get(&self, name: &str) -> Option<PluginRecord> {
        self.registry.get_state(name).await
    }

    pub async fn get_all(&self) -> Vec<PluginRecord> {
        let mut records = Vec::new();
        for name in self.registry.all_names().await {
            if let Some(record) = self.registry.get_state(&name).await {
                records.push(record);
            }
        }
        records
    }

    pub async fn has(&self, name: &str) -> bool {
        self.registry.contains(name).await
    }

    pub async fn get_load_order(&self) -> Result<Vec<String>, PluginSystemError> {
        self.registry.get_load_order().await
    }
}

/// The object passed to every plugin's `init(core)`. Owns the four
/// process-wide singletons described in §5 (Service Registry, Hook Bus,
/// Plugin Registry, Flow Engine) plus the Lifecycle Manager and Executor
/// that sit in front of them.
pub struct CoreFacade {
    config: ConfigMap,
    service_registry: Arc<ServiceRegistry>,
    hook_bus: Arc<HookBus>,
    plugin_registry: Arc<PluginRegistry>,
    lifecycle: Arc<LifecycleManager>,
    executor: Arc<Executor>,
    flow_engine: Arc<FlowEngine>,
    plugins: PluginManager,
    runtime: RuntimeHandle,
}

impl CoreFacade {
    pub fn new(config: ConfigMap) -> Self {
        let service_registry = Arc::new(ServiceRegistry::new());
        let hook_bus = Arc::new(HookBus::new());
        let plugin_registry = Arc::new(PluginRegistry::new());
        let lifecycle =
            Arc::new(LifecycleManager::new(plugin_registry.clone(), service_registry.clone(), hook_bus.clone()));
        let executor = Arc::new(Executor::new(service_registry.clone()));
        let flow_engine = Arc::new(FlowEngine::new(executor.clone(), hook_bus.clone()));

        let plugins = PluginManager { registry: plugin_registry.clone(), lifecycle: lifecycle.clone() };
        let runtime = RuntimeHandle { executor: executor.clone() };

        Self {
            config,
            service_registry,
            hook_bus,
            plugin_registry,
            lifecycle,
            executor,
            flow_engine,
            plugins,
            runtime,
        }
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.service_registry
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hook_bus
    }

    pub fn flow(&self) -> &Arc<FlowEngine> {
        &self.flow_engine
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// The Lifecycle Manager directly, for callers that want `init_all` /
    /// `destroy_all` / `on_lifecycle` rather than the narrower
    /// load/unload surface on [`PluginManager`].
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn plugin_registry(&self) -> &Arc<PluginRegistry> {
        &self.plugin_registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_system::error::PluginSystemError as PsErr;
    use async_trait::async_trait;

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        async fn init(&self, _core: Arc<CoreFacade>) -> Result<(), PsErr> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn plugin_manager_register_and_load_binds_into_service_registry() {
        let facade = Arc::new(CoreFacade::new(ConfigMap::new()));
        let plugin: Arc<dyn Plugin> = Arc::new(NoopPlugin);
        facade.plugins().register(plugin, RegisterOptions::default()).await.unwrap();
        assert!(facade.plugins().has("noop").await);

        facade.plugins().load(facade.clone(), "noop").await.unwrap();
        let record = facade.plugins().get("noop").await.unwrap();
        assert_eq!(record.status, crate::plugin_system::record::PluginStatus::Active);
    }

    #[tokio::test]
    async fn runtime_handle_reports_service_not_found_in_band() {
        let facade = CoreFacade::new(ConfigMap::new());
        let result = facade.runtime().execute_action("missing:run", serde_json::json!({})).await;
        assert!(!result.success);
    }
}
