//! Errors raised by the Plugin Registry and Lifecycle Manager.

#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginSystemError {
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin validation failed for '{plugin}': {message}")]
    ValidationError { plugin: String, message: String },

    #[error("circular dependency detected among: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("plugin '{plugin}' has missing dependencies: {missing:?}")]
    MissingDependencies { plugin: String, missing: Vec<String> },

    #[error("cannot unregister '{plugin}': depended on by {dependents:?}")]
    UnregisterBlocked { plugin: String, dependents: Vec<String> },

    #[error("plugin '{plugin}' failed to initialize: {message}")]
    InitializationError { plugin: String, message: String },

    #[error("plugin '{plugin}' failed to shut down: {message}")]
    ShutdownError { plugin: String, message: String },
}
