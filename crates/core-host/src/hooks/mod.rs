//! Priority-ordered, per-event Hook Bus.

pub mod bus;
pub mod error;
pub mod types;

pub use bus::HookBus;
pub use error::HookError;
pub use types::{event_keys, EmitOptions, HookDefinition, HookExecutionResult, HookHandler, HookPayload};
