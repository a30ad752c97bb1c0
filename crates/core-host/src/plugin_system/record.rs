//! Plugin Record: the Plugin Registry's own bookkeeping about a registered
//! plugin, distinct from the plugin object itself (which is referenced, not
//! copied).

use std::sync::Arc;

use super::traits::Plugin;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Registered,
    Initializing,
    Active,
    Error,
    Destroyed,
}

/// Descriptive capability summary captured at registration time, before any
/// actual binding into the Service Registry / Hook Bus happens.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PluginCapabilities {
    pub actions: Vec<String>,
    pub providers: Vec<String>,
    pub evaluators: Vec<String>,
    pub hooks: Vec<String>,
    pub chains: Vec<String>,
}

#[derive(Clone)]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub dependencies: Vec<String>,
    pub capabilities: PluginCapabilities,
    pub priority: i32,
    pub status: PluginStatus,
    pub last_error: Option<String>,
    pub loaded_at: Option<u64>,
    pub plugin: Arc<dyn Plugin>,
}

impl PluginRecord {
    pub fn new(plugin: Arc<dyn Plugin>, priority: i32, name_override: Option<String>) -> Self {
        let capabilities = PluginCapabilities {
            actions: plugin.actions().iter().map(|a| a.name().to_string()).collect(),
            providers: plugin.providers().iter().map(|p| p.name().to_string()).collect(),
            evaluators: plugin.evaluators().iter().map(|e| e.name().to_string()).collect(),
            hooks: plugin.hooks().iter().map(|h| h.name.clone()).collect(),
            chains: plugin.chains(),
        };
        Self {
            name: name_override.unwrap_or_else(|| plugin.name().to_string()),
            version: plugin.version().to_string(),
            description: plugin.description().map(|s| s.to_string()),
            author: plugin.author().map(|s| s.to_string()),
            dependencies: plugin.dependencies(),
            capabilities,
            priority,
            status: PluginStatus::Registered,
            last_error: None,
            loaded_at: None,
            plugin,
        }
    }
}
