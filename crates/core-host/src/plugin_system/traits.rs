//! The Plugin Contract: the interface every plugin implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::facade::CoreFacade;
use crate::hooks::HookDefinition;
use crate::services::{Action, Evaluator, Provider};

use super::error::PluginSystemError;

/// A plugin object. Capability lists (`actions`, `providers`, `evaluators`,
/// `hooks`, `chains`) are purely descriptive until `init` actually registers
/// them with the Core Facade's Service Registry and Hook Bus — the
/// Lifecycle Manager reads these same lists afterward only for reporting.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn author(&self) -> Option<&str> {
        None
    }

    /// Names of plugins this one requires to be initialized first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn actions(&self) -> Vec<Arc<dyn Action>> {
        Vec::new()
    }

    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        Vec::new()
    }

    fn evaluators(&self) -> Vec<Arc<dyn Evaluator>> {
        Vec::new()
    }

    fn hooks(&self) -> Vec<HookDefinition> {
        Vec::new()
    }

    /// Chain ids this plugin claims to support, purely descriptive.
    fn chains(&self) -> Vec<String> {
        Vec::new()
    }

    async fn init(&self, core: Arc<CoreFacade>) -> Result<(), PluginSystemError>;

    async fn destroy(&self) -> Result<(), PluginSystemError> {
        Ok(())
    }
}
