//! Flow Definition and Flow Execution Context data model.
//!
//! Node payloads are modeled as a tagged sum rather than an untyped bag
//! (per the design note on heterogeneous node data) so the node dispatch
//! switch and `validate` are exhaustive; the wire format (whatever a host
//! uses to load flows from disk) stays untyped JSON and only becomes a
//! `NodeData` once deserialized here.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConditionCombinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionClause {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConditionGroup {
    pub conditions: Vec<ConditionClause>,
    #[serde(default)]
    pub operator: ConditionCombinator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
    Count,
    ForEach,
    While,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoopConfig {
    pub count: Option<u64>,
    pub items: Option<String>,
    pub condition: Option<ConditionGroup>,
    #[serde(rename = "maxIterations")]
    pub max_iterations: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayType {
    Fixed,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerData {
    #[serde(rename = "triggerType")]
    pub trigger_type: String,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(rename = "pluginName")]
    pub plugin_name: String,
    #[serde(rename = "actionName")]
    pub action_name: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionData {
    pub conditions: Vec<ConditionClause>,
    #[serde(default)]
    pub operator: ConditionCombinator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopData {
    #[serde(rename = "loopType")]
    pub loop_type: LoopType,
    pub config: LoopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayData {
    #[serde(rename = "delayMs")]
    pub delay_ms: u64,
    #[serde(rename = "delayType")]
    pub delay_type: DelayType,
    #[serde(rename = "maxDelayMs")]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowData {
    #[serde(rename = "flowId")]
    pub flow_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    #[serde(rename = "outputType")]
    pub output_type: String,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeData {
    Trigger(TriggerData),
    Action(ActionData),
    Condition(ConditionData),
    Loop(LoopData),
    Delay(DelayData),
    Subflow(SubflowData),
    Output(OutputData),
}

impl NodeData {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeData::Trigger(_) => "trigger",
            NodeData::Action(_) => "action",
            NodeData::Condition(_) => "condition",
            NodeData::Loop(_) => "loop",
            NodeData::Delay(_) => "delay",
            NodeData::Subflow(_) => "subflow",
            NodeData::Output(_) => "output",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub data: NodeData,
}

/// `"error"` and `"failure"`-typed edges are error-branch edges; anything
/// else with a `"complete"` handle is the after-loop path out of a loop
/// node; everything else is the normal/iteration path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(rename = "type")]
    pub edge_type: Option<String>,
    pub condition: Option<ConditionGroup>,
}

impl FlowEdge {
    pub fn is_error_edge(&self) -> bool {
        self.source_handle.as_deref() == Some("error") || self.edge_type.as_deref() == Some("failure")
    }

    pub fn is_complete_edge(&self) -> bool {
        self.source_handle.as_deref() == Some("complete")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default = "now_millis")]
    pub created_at: u64,
    #[serde(default = "now_millis")]
    pub updated_at: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub status: NodeRunStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl NodeResult {
    pub fn started(input: Option<Value>) -> Self {
        Self {
            status: NodeRunStatus::Running,
            input,
            output: None,
            error: None,
            started_at: now_millis(),
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn complete(&mut self, output: Value) {
        let now = now_millis();
        self.status = NodeRunStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(now);
        self.duration_ms = Some(now.saturating_sub(self.started_at));
    }

    pub fn fail(&mut self, message: String) {
        let now = now_millis();
        self.status = NodeRunStatus::Failed;
        self.error = Some(message);
        self.completed_at = Some(now);
        self.duration_ms = Some(now.saturating_sub(self.started_at));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowExecutionContext {
    pub flow_id: String,
    pub execution_id: String,
    pub variables: Value,
    pub node_results: HashMap<String, NodeResult>,
    pub current_node_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: u64,
}
