//! Plugin Registry: records, dependency edges, status, and topological load
//! order with priority tie-breaking.
//!
//! The load-order algorithm is Kahn's algorithm over a priority queue rather
//! than plain recursive DFS: the tie-break rule ("among nodes with no
//! remaining inbound edges, prefer higher priority then name ascending") is
//! naturally a property of which node the queue pops next, and a recursive
//! DFS has no notion of "the current set of ready nodes" to tie-break
//! within. A cycle is any plugin left over once the queue runs dry.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use super::error::PluginSystemError;
use super::record::{PluginRecord, PluginStatus};
use super::traits::Plugin;

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub priority: i32,
    pub name: Option<String>,
}

struct Inner {
    records: HashMap<String, PluginRecord>,
    load_order_cache: Option<Vec<String>>,
}

pub struct PluginRegistry {
    inner: RwLock<Inner>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A plugin ready to enter the topo-sort frontier (in-degree reached zero).
/// Ordered so a max-heap pops highest priority first, ties broken by name
/// ascending.
#[derive(PartialEq, Eq)]
struct Ready {
    priority: i32,
    name: String,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.name.cmp(&self.name))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { records: HashMap::new(), load_order_cache: None }) }
    }

    /// Validate and store a plugin record under `registered` status.
    ///
    /// Validation: name and version must be present (version must parse as
    /// semver); action names must be unique within the plugin and unique
    /// across all other currently-registered plugins (symmetric for
    /// provider names); the target name must not already be registered.
    pub async fn register(&self, plugin: Arc<dyn Plugin>, opts: RegisterOptions) -> Result<(), PluginSystemError> {
        let name = opts.name.clone().unwrap_or_else(|| plugin.name().to_string());
        if name.is_empty() {
            return Err(PluginSystemError::ValidationError {
                plugin: name,
                message: "plugin name must not be empty".to_string(),
            });
        }
        if semver::Version::parse(plugin.version()).is_err() {
            return Err(PluginSystemError::ValidationError {
                plugin: name,
                message: format!("version '{}' is not valid semver", plugin.version()),
            });
        }

        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&name) {
            return Err(PluginSystemError::AlreadyRegistered(name));
        }

        let own_actions: Vec<String> = plugin.actions().iter().map(|a| a.name().to_string()).collect();
        let own_providers: Vec<String> = plugin.providers().iter().map(|p| p.name().to_string()).collect();
        if has_duplicates(&own_actions) {
            return Err(PluginSystemError::ValidationError {
                plugin: name,
                message: "duplicate action names declared within this plugin".to_string(),
            });
        }
        if has_duplicates(&own_providers) {
            return Err(PluginSystemError::ValidationError {
                plugin: name,
                message: "duplicate provider names declared within this plugin".to_string(),
            });
        }
        for record in inner.records.values() {
            if own_actions.iter().any(|n| record.capabilities.actions.contains(n)) {
                return Err(PluginSystemError::ValidationError {
                    plugin: name,
                    message: format!("an action name collides with plugin '{}'", record.name),
                });
            }
            if own_providers.iter().any(|n| record.capabilities.providers.contains(n)) {
                return Err(PluginSystemError::ValidationError {
                    plugin: name,
                    message: format!("a provider name collides with plugin '{}'", record.name),
                });
            }
        }

        let record = PluginRecord::new(plugin, opts.priority, Some(name.clone()));
        inner.records.insert(name, record);
        inner.load_order_cache = None;
        Ok(())
    }

    /// Remove a plugin record. Rejected if any registered plugin still
    /// depends on it.
    pub async fn unregister(&self, name: &str) -> Result<(), PluginSystemError> {
        let mut inner = self.inner.write().await;
        if !inner.records.contains_key(name) {
            return Err(PluginSystemError::NotFound(name.to_string()));
        }
        let dependents: Vec<String> = inner
            .records
            .values()
            .filter(|r| r.dependencies.iter().any(|d| d == name))
            .map(|r| r.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(PluginSystemError::UnregisterBlocked { plugin: name.to_string(), dependents });
        }
        inner.records.remove(name);
        inner.load_order_cache = None;
        Ok(())
    }

    /// Topological load order, cached until the next mutation. Plugins
    /// referencing dependencies that are not registered are not blocked —
    /// those edges are simply absent from the graph (see
    /// `get_missing_dependencies`).
    pub async fn get_load_order(&self) -> Result<Vec<String>, PluginSystemError> {
        {
            let inner = self.inner.read().await;
            if let Some(cached) = &inner.load_order_cache {
                return Ok(cached.clone());
            }
        }

        let mut inner = self.inner.write().await;
        if let Some(cached) = &inner.load_order_cache {
            return Ok(cached.clone());
        }

        let names: HashSet<String> = inner.records.keys().cloned().collect();
        let mut in_degree: HashMap<String, usize> = names.iter().map(|n| (n.clone(), 0)).collect();
        let mut dependents_of: HashMap<String, Vec<String>> = names.iter().map(|n| (n.clone(), Vec::new())).collect();

        for record in inner.records.values() {
            for dep in &record.dependencies {
                if names.contains(dep) {
                    *in_degree.get_mut(&record.name).expect("name in set") += 1;
                    dependents_of.get_mut(dep).expect("dep in set").push(record.name.clone());
                }
            }
        }

        let mut queue: BinaryHeap<Ready> = BinaryHeap::new();
        for name in &names {
            if in_degree[name] == 0 {
                queue.push(Ready { priority: inner.records[name].priority, name: name.clone() });
            }
        }

        let mut order = Vec::with_capacity(names.len());
        while let Some(Ready { name, .. }) = queue.pop() {
            order.push(name.clone());
            if let Some(dependents) = dependents_of.get(&name) {
                for dependent in dependents.clone() {
                    let degree = in_degree.get_mut(&dependent).expect("dependent in set");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(Ready { priority: inner.records[&dependent].priority, name: dependent });
                    }
                }
            }
        }

        if order.len() != names.len() {
            let ordered: HashSet<String> = order.into_iter().collect();
            let remaining: Vec<String> = names.difference(&ordered).cloned().collect();
            return Err(PluginSystemError::CircularDependency(remaining));
        }

        inner.load_order_cache = Some(order.clone());
        Ok(order)
    }

    pub async fn get_dependents(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.records.values().filter(|r| r.dependencies.iter().any(|d| d == name)).map(|r| r.name.clone()).collect()
    }

    pub async fn get_missing_dependencies(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        match inner.records.get(name) {
            Some(record) => record.dependencies.iter().filter(|d| !inner.records.contains_key(*d)).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Dependencies are satisfied when every one is registered and active.
    pub async fn are_dependencies_satisfied(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        let Some(record) = inner.records.get(name) else {
            return false;
        };
        record.dependencies.iter().all(|dep| inner.records.get(dep).is_some_and(|d| d.status == PluginStatus::Active))
    }

    pub async fn get_state(&self, name: &str) -> Option<PluginRecord> {
        self.inner.read().await.records.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.records.contains_key(name)
    }

    pub async fn all_names(&self) -> Vec<String> {
        self.inner.read().await.records.keys().cloned().collect()
    }

    pub async fn update_status(&self, name: &str, status: PluginStatus, error: Option<String>) -> Result<(), PluginSystemError> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(name).ok_or_else(|| PluginSystemError::NotFound(name.to_string()))?;
        if status == PluginStatus::Active {
            record.loaded_at = Some(now_millis());
        }
        record.last_error = error;
        record.status = status;
        Ok(())
    }
}

fn has_duplicates(names: &[String]) -> bool {
    let unique: HashSet<&String> = names.iter().collect();
    unique.len() != names.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::CoreFacade;
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        deps: Vec<String>,
    }

    #[async_trait]
    impl Plugin for Stub {
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
            Ok(())
        }
    }

    fn stub(name: &'static str, deps: &[&str]) -> Arc<dyn Plugin> {
        Arc::new(Stub { name, deps: deps.iter().map(|s| s.to_string()).collect() })
    }

    #[tokio::test]
    async fn load_order_respects_dependency_edges() {
        let registry = PluginRegistry::new();
        registry.register(stub("b", &["a"]), RegisterOptions::default()).await.unwrap();
        registry.register(stub("a", &[]), RegisterOptions::default()).await.unwrap();

        let order = registry.get_load_order().await.unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn load_order_tie_breaks_by_priority_then_name() {
        let registry = PluginRegistry::new();
        registry.register(stub("low", &[]), RegisterOptions { priority: 0, name: None }).await.unwrap();
        registry.register(stub("high", &[]), RegisterOptions { priority: 10, name: None }).await.unwrap();
        registry.register(stub("zeta", &[]), RegisterOptions { priority: 0, name: None }).await.unwrap();

        let order = registry.get_load_order().await.unwrap();
        assert_eq!(order, vec!["high".to_string(), "low".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let registry = PluginRegistry::new();
        registry.register(stub("a", &["b"]), RegisterOptions::default()).await.unwrap();
        registry.register(stub("b", &["a"]), RegisterOptions::default()).await.unwrap();

        let err = registry.get_load_order().await.unwrap_err();
        assert!(matches!(err, PluginSystemError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn missing_dependency_is_reported_not_blocking() {
        let registry = PluginRegistry::new();
        registry.register(stub("a", &["ghost"]), RegisterOptions::default()).await.unwrap();

        let order = registry.get_load_order().await.unwrap();
        assert_eq!(order, vec!["a".to_string()]);
        assert_eq!(registry.get_missing_dependencies("a").await, vec!["ghost".to_string()]);
    }

    #[tokio::test]
    async fn unregister_blocked_while_depended_on() {
        let registry = PluginRegistry::new();
        registry.register(stub("base", &[]), RegisterOptions::default()).await.unwrap();
        registry.register(stub("top", &["base"]), RegisterOptions::default()).await.unwrap();

        let err = registry.unregister("base").await.unwrap_err();
        assert!(matches!(err, PluginSystemError::UnregisterBlocked { .. }));
    }
}
