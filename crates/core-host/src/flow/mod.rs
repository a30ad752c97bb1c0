//! Flow Engine: declarative directed-graph orchestration over plugin-provided
//! services, the fourth subsystem behind the core facade.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::FlowEngine;
pub use error::FlowError;
pub use types::{
    ActionData, ConditionClause, ConditionCombinator, ConditionData, ConditionGroup, DelayData, DelayType,
    ExecutionStatus, FlowDefinition, FlowEdge, FlowExecutionContext, FlowNode, FlowValidation, LoopConfig, LoopData,
    LoopType, NodeData, NodeResult, NodeRunStatus, OutputData, SubflowData, TriggerData,
};
