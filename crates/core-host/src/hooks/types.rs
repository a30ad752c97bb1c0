//! Hook Bus data model: registrations, payloads, and execution results.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A hook handler. Takes an owned [`HookPayload`] (cheap: the data inside is
/// `Value`, cloned once per dispatch) and returns `Err` to signal failure —
/// the bus never lets a handler panic propagate, but a returned `Err` is how
/// a handler reports an application-level failure.
pub type HookHandler = Box<dyn Fn(HookPayload) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Event keys the Hook Bus recognizes out of the box. Anything of the form
/// `custom:<token>` is also valid and not enumerated here.
pub mod event_keys {
    pub const SYSTEM_INIT: &str = "system:init";
    pub const SYSTEM_READY: &str = "system:ready";
    pub const SYSTEM_SHUTDOWN: &str = "system:shutdown";
    pub const AGENT_START: &str = "agent:start";
    pub const AGENT_STOP: &str = "agent:stop";
    pub const AGENT_ERROR: &str = "agent:error";
    pub const PLUGIN_LOAD: &str = "plugin:load";
    pub const PLUGIN_UNLOAD: &str = "plugin:unload";
    pub const PLUGIN_ERROR: &str = "plugin:error";
    pub const FLOW_START: &str = "flow:start";
    pub const FLOW_COMPLETE: &str = "flow:complete";
    pub const FLOW_ERROR: &str = "flow:error";
    pub const FLOW_NODE_BEFORE: &str = "flow:node:before";
    pub const FLOW_NODE_AFTER: &str = "flow:node:after";
    pub const FLOW_NODE_ERROR: &str = "flow:node:error";
    pub const ACTION_BEFORE: &str = "action:before";
    pub const ACTION_AFTER: &str = "action:after";
    pub const ACTION_ERROR: &str = "action:error";
    pub const CHAIN_SWITCH: &str = "chain:switch";
    pub const CHAIN_TRANSACTION_BEFORE: &str = "chain:transaction:before";
    pub const CHAIN_TRANSACTION_AFTER: &str = "chain:transaction:after";
    pub const CHAIN_TRANSACTION_ERROR: &str = "chain:transaction:error";

    /// `beforeInit` / `afterInit` / `error` lifecycle observer events, used
    /// internally by the Lifecycle Manager rather than emitted on the
    /// general event bus.
    pub const LIFECYCLE_BEFORE_INIT: &str = "lifecycle:beforeInit";
    pub const LIFECYCLE_AFTER_INIT: &str = "lifecycle:afterInit";
    pub const LIFECYCLE_ERROR: &str = "lifecycle:error";

    pub const TASK_STARTED: &str = "task:started";
    pub const TASK_COMPLETED: &str = "task:completed";
    pub const TASK_FAILED: &str = "task:failed";
    pub const TASK_CANCELLED: &str = "task:cancelled";
}

/// A hook registration, prior to being stored in the bus's per-event
/// sequence.
pub struct HookDefinition {
    pub name: String,
    pub event: String,
    pub priority: i32,
    pub once: bool,
    pub handler: HookHandler,
}

impl HookDefinition {
    pub fn new(name: impl Into<String>, event: impl Into<String>, handler: HookHandler) -> Self {
        Self { name: name.into(), event: event.into(), priority: 0, once: false, handler }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// The payload a hook handler receives on `emit`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HookPayload {
    pub event: String,
    pub timestamp: u64,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One handler's outcome within a single `emit` walk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HookExecutionResult {
    pub hook_name: String,
    pub success: bool,
    #[serde(skip)]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Options for [`crate::hooks::bus::HookBus::emit`].
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub stop_on_error: bool,
    pub source: Option<String>,
}
