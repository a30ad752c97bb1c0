//! Crate-level error type.
//!
//! Each subsystem defines its own `thiserror`-derived error enum; this
//! module aggregates them the way `kernel::error::Error` aggregates
//! `PluginSystemError`, `EventSystemError`, and `StageSystemError` in the
//! teacher crate.

use crate::flow::error::FlowError;
use crate::hooks::error::HookError;
use crate::plugin_system::error::PluginSystemError;
use crate::services::error::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("hook bus error: {0}")]
    Hook(#[from] HookError),

    #[error("plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    #[error("flow engine error: {0}")]
    Flow(#[from] FlowError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
