//! Flow Engine: CRUD over flow definitions, validation, and graph-walking
//! execution.
//!
//! The walk is depth-first and edge-driven rather than a pre-computed
//! topological order (per the design note on dynamic branch pruning):
//! condition nodes decide which edges survive at the moment they're
//! visited, so a fixed order computed ahead of time could not express
//! that pruning. Execution is single-threaded per execution — child
//! visits are awaited sequentially, even across branches — but separate
//! executions (of the same or different flows) run fully concurrently
//! against the shared `ServiceRegistry`/`HookBus` the way the teacher's
//! `DefaultPluginManager` and `EventManager` are shared, lock-guarded
//! singletons behind the core.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::hooks::{event_keys, EmitOptions, HookBus};
use crate::services::{ExecuteOptions, Executor};
use crate::task_manager::CancellationToken;
use crate::value::{coerce_number, coerce_string, get_path, set_path};

use super::error::FlowError;
use super::types::{
    now_millis, ConditionClause, ConditionCombinator, DelayType, ExecutionStatus, FlowDefinition, FlowEdge,
    FlowExecutionContext, FlowNode, FlowValidation, LoopData, LoopType, NodeData, NodeResult,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct FlowGraph {
    nodes: HashMap<String, FlowNode>,
    edges_by_source: HashMap<String, Vec<FlowEdge>>,
}

impl FlowGraph {
    fn build(def: &FlowDefinition) -> Self {
        let nodes = def.nodes.iter().map(|n| (n.id.clone(), n.clone())).collect();
        let mut edges_by_source: HashMap<String, Vec<FlowEdge>> = HashMap::new();
        for edge in &def.edges {
            edges_by_source.entry(edge.source.clone()).or_default().push(edge.clone());
        }
        Self { nodes, edges_by_source }
    }
}

enum NodeOutcome {
    Success(Value),
    Failure(String),
    Cancelled,
}

enum LoopOutcome {
    Done(Value),
    Cancelled,
}

/// Stores flow definitions and drives executions against them.
pub struct FlowEngine {
    definitions: RwLock<HashMap<String, FlowDefinition>>,
    executions: RwLock<HashMap<String, Arc<Mutex<FlowExecutionContext>>>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    executor: Arc<Executor>,
    hooks: Arc<HookBus>,
}

impl FlowEngine {
    pub fn new(executor: Arc<Executor>, hooks: Arc<HookBus>) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            executor,
            hooks,
        }
    }

    // ---- CRUD -------------------------------------------------------

    pub async fn create(&self, mut def: FlowDefinition) -> FlowDefinition {
        let stamp = now_millis();
        def.created_at = stamp;
        def.updated_at = stamp;
        self.definitions.write().await.insert(def.id.clone(), def.clone());
        def
    }

    pub async fn get(&self, id: &str) -> Option<FlowDefinition> {
        self.definitions.read().await.get(id).cloned()
    }

    /// Update never changes the id, regardless of what `def.id` carries.
    pub async fn update(&self, id: &str, mut def: FlowDefinition) -> Result<FlowDefinition, FlowError> {
        let mut guard = self.definitions.write().await;
        let existing = guard.get(id).ok_or_else(|| FlowError::NotFound(id.to_string()))?;
        def.id = existing.id.clone();
        def.created_at = existing.created_at;
        def.updated_at = now_millis();
        guard.insert(id.to_string(), def.clone());
        Ok(def)
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.definitions.write().await.remove(id).is_some()
    }

    pub async fn get_all(&self) -> Vec<FlowDefinition> {
        self.definitions.read().await.values().cloned().collect()
    }

    pub async fn clear(&self) {
        self.definitions.write().await.clear();
        self.executions.write().await.clear();
        self.tokens.lock().await.clear();
    }

    /// Execution ids currently tracked (running or finished, until `clear`).
    /// Lets a caller discover the id of an execution it just started in
    /// order to `cancel` it.
    pub async fn list_executions(&self) -> Vec<String> {
        self.executions.read().await.keys().cloned().collect()
    }

    pub async fn get_execution(&self, id: &str) -> Option<FlowExecutionContext> {
        let ctx = self.executions.read().await.get(id).cloned()?;
        Some(ctx.lock().await.clone())
    }

    pub async fn cancel(&self, execution_id: &str) -> bool {
        let token = self.tokens.lock().await.get(execution_id).cloned();
        let Some(token) = token else {
            return false;
        };
        token.cancel();
        if let Some(ctx) = self.executions.read().await.get(execution_id).cloned() {
            let mut guard = ctx.lock().await;
            if guard.status == ExecutionStatus::Running {
                guard.status = ExecutionStatus::Cancelled;
            }
        }
        true
    }

    // ---- Validation ---------------------------------------------------

    pub fn validate(&self, def: &FlowDefinition) -> FlowValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if def.name.trim().is_empty() {
            errors.push("flow name must not be empty".to_string());
        }
        if def.nodes.is_empty() {
            errors.push("flow must contain at least one node".to_string());
        }

        let mut seen_ids = HashSet::new();
        for node in &def.nodes {
            if !seen_ids.insert(node.id.clone()) {
                errors.push(format!("duplicate node id: {}", node.id));
            }
            match &node.data {
                NodeData::Trigger(t) if t.trigger_type.trim().is_empty() => {
                    errors.push(format!("node '{}': trigger missing triggerType", node.id));
                }
                NodeData::Action(a) if a.plugin_name.trim().is_empty() || a.action_name.trim().is_empty() => {
                    errors.push(format!("node '{}': action missing pluginName/actionName", node.id));
                }
                NodeData::Condition(c) if c.conditions.is_empty() => {
                    errors.push(format!("node '{}': condition missing conditions", node.id));
                }
                NodeData::Subflow(s) if s.flow_id.trim().is_empty() => {
                    errors.push(format!("node '{}': subflow missing flowId", node.id));
                }
                _ => {}
            }
        }

        let node_ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &def.edges {
            if !node_ids.contains(edge.source.as_str()) {
                errors.push(format!("edge '{}' references unknown source node '{}'", edge.id, edge.source));
            }
            if !node_ids.contains(edge.target.as_str()) {
                errors.push(format!("edge '{}' references unknown target node '{}'", edge.id, edge.target));
            }
            if edge.source == edge.target {
                warnings.push(format!("self-loop at node '{}'", edge.source));
            }
        }

        let triggers: Vec<&FlowNode> = def.nodes.iter().filter(|n| matches!(n.data, NodeData::Trigger(_))).collect();
        if triggers.is_empty() {
            warnings.push("flow has no trigger node".to_string());
        } else if triggers.len() > 1 {
            warnings.push(format!("flow has {} trigger nodes, only the first is used", triggers.len()));
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &def.edges {
            adjacency.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
        }

        if let Some(cycle) = find_cycle(&def.nodes, &adjacency) {
            warnings.push(format!("cycle detected: {}", cycle.join(" -> ")));
        }

        if !triggers.is_empty() {
            let mut reachable: HashSet<&str> = HashSet::new();
            let mut stack: Vec<&str> = triggers.iter().map(|n| n.id.as_str()).collect();
            while let Some(current) = stack.pop() {
                if !reachable.insert(current) {
                    continue;
                }
                if let Some(next) = adjacency.get(current) {
                    for &n in next {
                        if !reachable.contains(n) {
                            stack.push(n);
                        }
                    }
                }
            }
            for node in &def.nodes {
                if !reachable.contains(node.id.as_str()) {
                    warnings.push(format!("node '{}' is unreachable from any trigger", node.id));
                }
            }
        }

        FlowValidation { valid: errors.is_empty(), errors, warnings }
    }

    // ---- Execution ------------------------------------------------------

    pub async fn execute(&self, flow_id: &str, input: Option<Value>) -> Result<FlowExecutionContext, FlowError> {
        self.execute_with_token(flow_id, input, CancellationToken::new()).await
    }

    fn execute_with_token<'a>(
        &'a self,
        flow_id: &'a str,
        input: Option<Value>,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<FlowExecutionContext, FlowError>> {
        Box::pin(async move {
            let def =
                self.definitions.read().await.get(flow_id).cloned().ok_or_else(|| FlowError::NotFound(flow_id.to_string()))?;

            let validation = self.validate(&def);
            if !validation.valid {
                return Err(FlowError::InvalidFlow(validation.errors));
            }

            let trigger = def
                .nodes
                .iter()
                .find(|n| matches!(n.data, NodeData::Trigger(_)))
                .ok_or_else(|| FlowError::InvalidFlow(vec!["flow has no trigger node".to_string()]))?
                .clone();

            let execution_id = generate_id();
            let context = FlowExecutionContext {
                flow_id: flow_id.to_string(),
                execution_id: execution_id.clone(),
                variables: input.unwrap_or_else(|| json!({})),
                node_results: HashMap::new(),
                current_node_id: None,
                status: ExecutionStatus::Running,
                started_at: now_millis(),
            };
            let ctx = Arc::new(Mutex::new(context));
            self.executions.write().await.insert(execution_id.clone(), ctx.clone());
            self.tokens.lock().await.insert(execution_id.clone(), token.clone());

            self.hooks
                .emit(
                    event_keys::FLOW_START,
                    json!({ "flowId": flow_id, "executionId": execution_id }),
                    EmitOptions::default(),
                )
                .await;

            let graph = Arc::new(FlowGraph::build(&def));
            let outcome = self.visit(ctx.clone(), graph, trigger.id.clone(), token).await;

            let mut guard = ctx.lock().await;
            match outcome {
                Ok(()) => {
                    if guard.status == ExecutionStatus::Running {
                        guard.status = ExecutionStatus::Completed;
                    }
                    let snapshot = guard.clone();
                    drop(guard);
                    self.hooks
                        .emit(
                            event_keys::FLOW_COMPLETE,
                            json!({ "flowId": flow_id, "executionId": execution_id }),
                            EmitOptions::default(),
                        )
                        .await;
                    Ok(snapshot)
                }
                Err(err) => {
                    guard.status = ExecutionStatus::Failed;
                    drop(guard);
                    log::warn!("flow '{}' execution '{}' failed: {}", flow_id, execution_id, err);
                    self.hooks
                        .emit(
                            event_keys::FLOW_ERROR,
                            json!({ "flowId": flow_id, "executionId": execution_id, "error": err.to_string() }),
                            EmitOptions::default(),
                        )
                        .await;
                    Err(err)
                }
            }
        })
    }

    fn visit<'a>(
        &'a self,
        ctx: Arc<Mutex<FlowExecutionContext>>,
        graph: Arc<FlowGraph>,
        node_id: String,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<(), FlowError>> {
        Box::pin(async move {
            {
                let guard = ctx.lock().await;
                if guard.status == ExecutionStatus::Cancelled || token.is_cancelled() {
                    return Ok(());
                }
            }

            let node = graph
                .nodes
                .get(&node_id)
                .cloned()
                .ok_or_else(|| FlowError::NodeExecution { node: node_id.clone(), message: "node not found".to_string() })?;

            if let NodeData::Loop(data) = &node.data {
                return self.execute_loop_node(&ctx, &graph, &node, data, &token).await;
            }

            {
                let mut guard = ctx.lock().await;
                guard.current_node_id = Some(node.id.clone());
                let input_snapshot = guard.variables.clone();
                guard.node_results.insert(node.id.clone(), NodeResult::started(Some(input_snapshot)));
            }
            self.emit_node_hook(event_keys::FLOW_NODE_BEFORE, &ctx, &node.id).await;

            let outcome = self.dispatch_node(&ctx, &node, &token).await;

            match outcome {
                NodeOutcome::Cancelled => {
                    let mut guard = ctx.lock().await;
                    if guard.status == ExecutionStatus::Running {
                        guard.status = ExecutionStatus::Cancelled;
                    }
                    Ok(())
                }
                NodeOutcome::Success(output) => {
                    // Snapshot the condition result (if any) before `output` is
                    // moved into the node result and before any recursion can
                    // overwrite the shared `_conditionResult` variable slot —
                    // a nested condition node visited via the true-branch must
                    // not change which edges *this* node's loop below takes.
                    let condition_result =
                        if matches!(node.data, NodeData::Condition(_)) { output.as_bool() } else { None };
                    {
                        let mut guard = ctx.lock().await;
                        if let Some(result) = guard.node_results.get_mut(&node.id) {
                            result.complete(output);
                        }
                    }
                    self.emit_node_hook(event_keys::FLOW_NODE_AFTER, &ctx, &node.id).await;

                    let edges = graph.edges_by_source.get(&node.id).cloned().unwrap_or_default();
                    for edge in &edges {
                        if edge.is_error_edge() {
                            continue;
                        }
                        if let Some(condition_result) = condition_result {
                            let matches_handle =
                                edge.source_handle.as_deref() == Some(if condition_result { "true" } else { "false" });
                            if !matches_handle {
                                continue;
                            }
                        }
                        if !self.edge_condition_passes(&ctx, edge).await {
                            continue;
                        }
                        self.visit(ctx.clone(), graph.clone(), edge.target.clone(), token.clone()).await?;
                    }
                    Ok(())
                }
                NodeOutcome::Failure(message) => {
                    {
                        let mut guard = ctx.lock().await;
                        if let Some(result) = guard.node_results.get_mut(&node.id) {
                            result.fail(message.clone());
                        }
                    }
                    self.emit_node_hook(event_keys::FLOW_NODE_ERROR, &ctx, &node.id).await;

                    let error_edges: Vec<FlowEdge> = graph
                        .edges_by_source
                        .get(&node.id)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(FlowEdge::is_error_edge)
                        .collect();

                    if error_edges.is_empty() {
                        return Err(FlowError::NodeExecution { node: node.id.clone(), message });
                    }

                    {
                        let mut guard = ctx.lock().await;
                        let node_name = node.display_name.clone().unwrap_or_else(|| node.id.clone());
                        set_path(
                            &mut guard.variables,
                            "_error",
                            json!({ "message": message, "nodeId": node.id, "nodeName": node_name }),
                        );
                    }

                    for edge in &error_edges {
                        self.visit(ctx.clone(), graph.clone(), edge.target.clone(), token.clone()).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn emit_node_hook(&self, event: &str, ctx: &Arc<Mutex<FlowExecutionContext>>, node_id: &str) {
        let (flow_id, execution_id) = {
            let guard = ctx.lock().await;
            (guard.flow_id.clone(), guard.execution_id.clone())
        };
        self.hooks
            .emit(event, json!({ "flowId": flow_id, "executionId": execution_id, "nodeId": node_id }), EmitOptions::default())
            .await;
    }

    async fn edge_condition_passes(&self, ctx: &Arc<Mutex<FlowExecutionContext>>, edge: &FlowEdge) -> bool {
        match &edge.condition {
            Some(group) => {
                let guard = ctx.lock().await;
                evaluate_conditions(&group.conditions, group.operator.clone(), &guard.variables)
            }
            None => true,
        }
    }

    async fn dispatch_node(&self, ctx: &Arc<Mutex<FlowExecutionContext>>, node: &FlowNode, token: &CancellationToken) -> NodeOutcome {
        match &node.data {
            NodeData::Trigger(_) => NodeOutcome::Success(ctx.lock().await.variables.clone()),
            NodeData::Action(data) => {
                let qualified = format!("{}:{}", data.plugin_name, data.action_name);
                let params = {
                    let guard = ctx.lock().await;
                    resolve_params(&data.params.clone().unwrap_or(Value::Null), &guard.variables)
                };
                let result = tokio::select! {
                    _ = token.cancelled() => return NodeOutcome::Cancelled,
                    result = self.executor.execute_action(&qualified, params, ExecuteOptions::default()) => result,
                };
                let value = serde_json::to_value(&result).unwrap_or(Value::Null);
                let mut guard = ctx.lock().await;
                set_path(&mut guard.variables, "_lastOutput", value.clone());
                NodeOutcome::Success(value)
            }
            NodeData::Condition(data) => {
                let mut guard = ctx.lock().await;
                let result = evaluate_conditions(&data.conditions, data.operator.clone(), &guard.variables);
                set_path(&mut guard.variables, "_conditionResult", Value::Bool(result));
                NodeOutcome::Success(Value::Bool(result))
            }
            NodeData::Delay(data) => self.dispatch_delay(data, token).await,
            NodeData::Subflow(data) => {
                let snapshot = ctx.lock().await.variables.clone();
                let result = tokio::select! {
                    _ = token.cancelled() => return NodeOutcome::Cancelled,
                    result = self.execute_with_token(&data.flow_id, Some(snapshot), token.clone()) => result,
                };
                match result {
                    Ok(sub_ctx) => NodeOutcome::Success(sub_ctx.variables),
                    Err(err) => NodeOutcome::Failure(err.to_string()),
                }
            }
            NodeData::Output(_) => {
                let guard = ctx.lock().await;
                NodeOutcome::Success(get_path(&guard.variables, "_lastOutput").cloned().unwrap_or(Value::Null))
            }
            NodeData::Loop(_) => unreachable!("loop nodes are dispatched by execute_loop_node before reaching here"),
        }
    }

    async fn dispatch_delay(&self, data: &super::types::DelayData, token: &CancellationToken) -> NodeOutcome {
        let ms = match data.delay_type {
            DelayType::Fixed => data.delay_ms,
            DelayType::Random => {
                let max = data.max_delay_ms.unwrap_or(data.delay_ms).max(data.delay_ms);
                if max > data.delay_ms {
                    rand::thread_rng().gen_range(data.delay_ms..=max)
                } else {
                    data.delay_ms
                }
            }
        };
        tokio::select! {
            _ = token.cancelled() => NodeOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_millis(ms)) => NodeOutcome::Success(Value::Null),
        }
    }

    async fn execute_loop_node(
        &self,
        ctx: &Arc<Mutex<FlowExecutionContext>>,
        graph: &Arc<FlowGraph>,
        node: &FlowNode,
        data: &LoopData,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        {
            let mut guard = ctx.lock().await;
            guard.current_node_id = Some(node.id.clone());
            let input_snapshot = guard.variables.clone();
            guard.node_results.insert(node.id.clone(), NodeResult::started(Some(input_snapshot)));
        }
        self.emit_node_hook(event_keys::FLOW_NODE_BEFORE, ctx, &node.id).await;

        let outcome = self.run_loop_iterations(ctx, graph, node, data, token).await;

        match outcome {
            LoopOutcome::Cancelled => {
                let mut guard = ctx.lock().await;
                if guard.status == ExecutionStatus::Running {
                    guard.status = ExecutionStatus::Cancelled;
                }
                Ok(())
            }
            LoopOutcome::Done(output) => {
                {
                    let mut guard = ctx.lock().await;
                    if let Some(result) = guard.node_results.get_mut(&node.id) {
                        result.complete(output);
                    }
                }
                self.emit_node_hook(event_keys::FLOW_NODE_AFTER, ctx, &node.id).await;
                self.run_complete_edges(ctx, graph, &node.id, token).await
            }
        }
    }

    async fn run_loop_iterations(
        &self,
        ctx: &Arc<Mutex<FlowExecutionContext>>,
        graph: &Arc<FlowGraph>,
        node: &FlowNode,
        data: &LoopData,
        token: &CancellationToken,
    ) -> LoopOutcome {
        match &data.loop_type {
            LoopType::Count => {
                let count = data.config.count.unwrap_or(0);
                let mut snapshots = Vec::new();
                for i in 0..count {
                    if token.is_cancelled() {
                        return LoopOutcome::Cancelled;
                    }
                    {
                        let mut guard = ctx.lock().await;
                        set_path(&mut guard.variables, "_loopIndex", json!(i));
                    }
                    if let Err(err) = self.run_iteration(ctx, graph, &node.id, token).await {
                        log::warn!("flow: loop '{}' iteration {} propagated an unhandled node error: {}", node.id, i, err);
                    }
                    snapshots.push(ctx.lock().await.variables.clone());
                }
                LoopOutcome::Done(json!(snapshots))
            }
            LoopType::ForEach => {
                let items_path = data.config.items.clone().unwrap_or_default();
                let items = {
                    let guard = ctx.lock().await;
                    get_path(&guard.variables, &items_path).and_then(|v| v.as_array().cloned()).unwrap_or_default()
                };
                let mut snapshots = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if token.is_cancelled() {
                        return LoopOutcome::Cancelled;
                    }
                    {
                        let mut guard = ctx.lock().await;
                        set_path(&mut guard.variables, "_loopIndex", json!(i));
                        set_path(&mut guard.variables, "_loopItem", item);
                    }
                    if let Err(err) = self.run_iteration(ctx, graph, &node.id, token).await {
                        log::warn!("flow: loop '{}' iteration {} propagated an unhandled node error: {}", node.id, i, err);
                    }
                    snapshots.push(ctx.lock().await.variables.clone());
                }
                LoopOutcome::Done(json!(snapshots))
            }
            LoopType::While => {
                let max_iterations = data.config.max_iterations.unwrap_or(1000);
                let mut iterations = 0u64;
                loop {
                    if token.is_cancelled() {
                        return LoopOutcome::Cancelled;
                    }
                    if iterations >= max_iterations {
                        break;
                    }
                    let should_continue = {
                        let guard = ctx.lock().await;
                        match &data.config.condition {
                            Some(group) => evaluate_conditions(&group.conditions, group.operator.clone(), &guard.variables),
                            None => false,
                        }
                    };
                    if !should_continue {
                        break;
                    }
                    if let Err(err) = self.run_iteration(ctx, graph, &node.id, token).await {
                        log::warn!(
                            "flow: loop '{}' iteration {} propagated an unhandled node error: {}",
                            node.id,
                            iterations,
                            err
                        );
                    }
                    iterations += 1;
                }
                LoopOutcome::Done(json!({ "iterations": iterations }))
            }
        }
    }

    /// Recurse into the loop's per-iteration edges — those handled
    /// `"iteration"` or carrying no handle at all; `"complete"`-handled
    /// edges are the after-loop path and are never visited here.
    async fn run_iteration(
        &self,
        ctx: &Arc<Mutex<FlowExecutionContext>>,
        graph: &Arc<FlowGraph>,
        loop_node_id: &str,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        let edges = graph.edges_by_source.get(loop_node_id).cloned().unwrap_or_default();
        for edge in edges.iter().filter(|e| !e.is_complete_edge() && !e.is_error_edge()) {
            if !self.edge_condition_passes(ctx, edge).await {
                continue;
            }
            self.visit(ctx.clone(), graph.clone(), edge.target.clone(), token.clone()).await?;
        }
        Ok(())
    }

    async fn run_complete_edges(
        &self,
        ctx: &Arc<Mutex<FlowExecutionContext>>,
        graph: &Arc<FlowGraph>,
        loop_node_id: &str,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        let edges = graph.edges_by_source.get(loop_node_id).cloned().unwrap_or_default();
        for edge in edges.iter().filter(|e| e.is_complete_edge()) {
            if !self.edge_condition_passes(ctx, edge).await {
                continue;
            }
            self.visit(ctx.clone(), graph.clone(), edge.target.clone(), token.clone()).await?;
        }
        Ok(())
    }
}

fn evaluate_conditions(conditions: &[ConditionClause], operator: ConditionCombinator, variables: &Value) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match operator {
        ConditionCombinator::And => conditions.iter().all(|c| evaluate_clause(c, variables)),
        ConditionCombinator::Or => conditions.iter().any(|c| evaluate_clause(c, variables)),
    }
}

fn evaluate_clause(clause: &ConditionClause, variables: &Value) -> bool {
    let field_value = get_path(variables, &clause.field);
    match clause.operator.as_str() {
        "eq" => values_equal(field_value, &clause.value),
        "neq" => !values_equal(field_value, &clause.value),
        "gt" => numeric_cmp(field_value, &clause.value).map(|o| o == Ordering::Greater).unwrap_or(false),
        "gte" => numeric_cmp(field_value, &clause.value).map(|o| o != Ordering::Less).unwrap_or(false),
        "lt" => numeric_cmp(field_value, &clause.value).map(|o| o == Ordering::Less).unwrap_or(false),
        "lte" => numeric_cmp(field_value, &clause.value).map(|o| o != Ordering::Greater).unwrap_or(false),
        "contains" => field_value.map(|v| coerce_string(v).contains(&coerce_string(&clause.value))).unwrap_or(false),
        "startsWith" => field_value.map(|v| coerce_string(v).starts_with(&coerce_string(&clause.value))).unwrap_or(false),
        "endsWith" => field_value.map(|v| coerce_string(v).ends_with(&coerce_string(&clause.value))).unwrap_or(false),
        "in" => is_in(field_value, &clause.value),
        "notIn" => !is_in(field_value, &clause.value),
        "isNull" => field_value.is_none() || field_value == Some(&Value::Null),
        "isNotNull" => field_value.is_some() && field_value != Some(&Value::Null),
        _ => false,
    }
}

fn numeric_cmp(field_value: Option<&Value>, other: &Value) -> Option<Ordering> {
    let a = field_value.and_then(coerce_number)?;
    let b = coerce_number(other)?;
    a.partial_cmp(&b)
}

fn values_equal(field_value: Option<&Value>, other: &Value) -> bool {
    let Some(value) = field_value else {
        return matches!(other, Value::Null);
    };
    if let (Some(a), Some(b)) = (coerce_number(value), coerce_number(other)) {
        return a == b;
    }
    if value == other {
        return true;
    }
    coerce_string(value) == coerce_string(other)
}

fn is_in(field_value: Option<&Value>, other: &Value) -> bool {
    let (Some(arr), Some(value)) = (other.as_array(), field_value) else {
        return false;
    };
    arr.iter().any(|item| values_equal(Some(value), item))
}

/// Resolve `"{{path}}"`-shaped strings against `variables`; nested maps
/// and sequences are walked recursively; anything else passes through
/// unchanged.
fn resolve_params(value: &Value, variables: &Value) -> Value {
    match value {
        Value::String(s) => match s.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
            // Only the exact single-path form substitutes; a string carrying
            // more than one `{{...}}` (or stray braces) passes through as-is
            // rather than being torn apart into a bogus path.
            Some(path) if !path.contains("{{") && !path.contains("}}") => {
                get_path(variables, path.trim()).cloned().unwrap_or(Value::Null)
            }
            _ => Value::String(s.clone()),
        },
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_params(v, variables));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_params(v, variables)).collect()),
        other => other.clone(),
    }
}

fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn find_cycle<'a>(nodes: &'a [FlowNode], adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    for node in nodes {
        let id = node.id.as_str();
        if !visited.contains(id) {
            let mut on_stack = HashSet::new();
            let mut stack = Vec::new();
            if let Some(cycle) = dfs_find_cycle(id, adjacency, &mut visited, &mut on_stack, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_find_cycle<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_stack.insert(node);
    stack.push(node);
    if let Some(neighbors) = adjacency.get(node) {
        for &next in neighbors {
            if next == node {
                continue;
            }
            if on_stack.contains(next) {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            if !visited.contains(next) {
                if let Some(cycle) = dfs_find_cycle(next, adjacency, visited, on_stack, stack) {
                    return Some(cycle);
                }
            }
        }
    }
    stack.pop();
    on_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookBus;
    use crate::services::{Action, ActionContext, ActionResult, ServiceRegistry};
    use crate::flow::types::{ActionData, ConditionData, DelayData, FlowDefinition, FlowEdge, FlowNode, TriggerData};
    use async_trait::async_trait;

    struct BranchAction(&'static str);

    #[async_trait]
    impl Action for BranchAction {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
            ActionResult::ok(json!({ "branch": self.0 }))
        }
    }

    fn test_engine() -> FlowEngine {
        let registry = Arc::new(ServiceRegistry::new());
        let executor = Arc::new(Executor::new(registry));
        let hooks = Arc::new(HookBus::new());
        FlowEngine::new(executor, hooks)
    }

    fn branching_flow() -> (FlowDefinition, Arc<ServiceRegistry>) {
        let registry = Arc::new(ServiceRegistry::new());
        let def = FlowDefinition {
            id: "branch".into(),
            name: "branch".into(),
            nodes: vec![
                FlowNode {
                    id: "t".into(),
                    display_name: None,
                    data: NodeData::Trigger(TriggerData { trigger_type: "manual".into(), config: None }),
                },
                FlowNode {
                    id: "c".into(),
                    display_name: None,
                    data: NodeData::Condition(ConditionData {
                        conditions: vec![ConditionClause {
                            field: "isPremium".into(),
                            operator: "eq".into(),
                            value: json!(true),
                        }],
                        operator: ConditionCombinator::And,
                    }),
                },
                FlowNode {
                    id: "premium".into(),
                    display_name: None,
                    data: NodeData::Action(ActionData {
                        plugin_name: "demo".into(),
                        action_name: "premium".into(),
                        params: None,
                    }),
                },
                FlowNode {
                    id: "basic".into(),
                    display_name: None,
                    data: NodeData::Action(ActionData { plugin_name: "demo".into(), action_name: "basic".into(), params: None }),
                },
            ],
            edges: vec![
                FlowEdge { id: "e1".into(), source: "t".into(), target: "c".into(), ..Default::default() },
                FlowEdge {
                    id: "e2".into(),
                    source: "c".into(),
                    target: "premium".into(),
                    source_handle: Some("true".into()),
                    ..Default::default()
                },
                FlowEdge {
                    id: "e3".into(),
                    source: "c".into(),
                    target: "basic".into(),
                    source_handle: Some("false".into()),
                    ..Default::default()
                },
            ],
            created_at: 0,
            updated_at: 0,
        };
        (def, registry)
    }

    #[tokio::test]
    async fn branching_flow_takes_exactly_one_side() {
        let (def, registry) = branching_flow();
        registry.register_action(Arc::new(BranchAction("demo:premium")), "demo").await;
        registry.register_action(Arc::new(BranchAction("demo:basic")), "demo").await;
        let executor = Arc::new(Executor::new(registry));
        let engine = FlowEngine::new(executor, Arc::new(HookBus::new()));
        engine.create(def).await;

        let result = engine.execute("branch", Some(json!({ "isPremium": true }))).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.node_results.contains_key("premium"));
        assert!(!result.node_results.contains_key("basic"));

        let result = engine.execute("branch", Some(json!({ "isPremium": false }))).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.node_results.contains_key("basic"));
        assert!(!result.node_results.contains_key("premium"));
    }

    #[tokio::test]
    async fn cancellation_stops_an_in_flight_delay() {
        let engine = Arc::new(test_engine());
        let def = FlowDefinition {
            id: "cancel-flow".into(),
            name: "cancel".into(),
            nodes: vec![
                FlowNode {
                    id: "t".into(),
                    display_name: None,
                    data: NodeData::Trigger(TriggerData { trigger_type: "manual".into(), config: None }),
                },
                FlowNode {
                    id: "d".into(),
                    display_name: None,
                    data: NodeData::Delay(DelayData { delay_ms: 10_000, delay_type: DelayType::Fixed, max_delay_ms: None }),
                },
            ],
            edges: vec![FlowEdge { id: "e1".into(), source: "t".into(), target: "d".into(), ..Default::default() }],
            created_at: 0,
            updated_at: 0,
        };
        engine.create(def).await;

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("cancel-flow", None).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let ids = engine.list_executions().await;
        assert_eq!(ids.len(), 1);
        assert!(engine.cancel(&ids[0]).await);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn validate_flags_missing_trigger_and_dangling_edge() {
        let engine = test_engine();
        let def = FlowDefinition {
            id: "bad".into(),
            name: "bad".into(),
            nodes: vec![FlowNode {
                id: "a".into(),
                display_name: None,
                data: NodeData::Action(ActionData { plugin_name: "x".into(), action_name: "y".into(), params: None }),
            }],
            edges: vec![FlowEdge { id: "e1".into(), source: "a".into(), target: "ghost".into(), ..Default::default() }],
            created_at: 0,
            updated_at: 0,
        };
        let validation = engine.validate(&def);
        assert!(!validation.valid); // dangling edge is a validation error, not a warning
        assert!(validation.errors.iter().any(|e| e.contains("unknown target node")));
        assert!(validation.warnings.iter().any(|w| w.contains("no trigger")));
    }

    #[tokio::test]
    async fn crud_round_trips_and_update_preserves_id() {
        let engine = test_engine();
        let def = FlowDefinition { id: "f1".into(), name: "one".into(), nodes: vec![], edges: vec![], created_at: 0, updated_at: 0 };
        engine.create(def.clone()).await;

        let mut updated = def.clone();
        updated.id = "should-be-ignored".into();
        updated.name = "two".into();
        let after = engine.update("f1", updated).await.unwrap();
        assert_eq!(after.id, "f1");
        assert_eq!(after.name, "two");

        assert!(engine.delete("f1").await);
        assert!(engine.get("f1").await.is_none());
    }

    #[test]
    fn templating_resolves_nested_paths_and_passes_through_plain_strings() {
        let variables = json!({ "user": { "name": "ada" } });
        let params = json!({ "greeting": "hello {{not}} a template", "name": "{{user.name}}", "nested": { "x": "{{user.name}}" } });
        let resolved = resolve_params(&params, &variables);
        assert_eq!(resolved["greeting"], json!("hello {{not}} a template"));
        assert_eq!(resolved["name"], json!("ada"));
        assert_eq!(resolved["nested"]["x"], json!("ada"));
    }

    #[test]
    fn templating_leaves_strings_with_more_than_one_template_untouched() {
        let variables = json!({ "a": "A", "b": "B" });
        let params = json!("{{a}}{{b}}");
        assert_eq!(resolve_params(&params, &variables), json!("{{a}}{{b}}"));
    }

    #[tokio::test]
    async fn nested_condition_in_the_true_branch_does_not_reopen_the_outer_false_edge() {
        // trigger -> outer(isPremium) --true--> inner(tier==gold) --true--> gold
        //                                                         --false-> silver
        //                             --false-> basic
        // Inner's edges are listed true-before-false, matching scenario 5's
        // authoring order, so a stale re-read of `_conditionResult` after the
        // inner node runs would wrongly also satisfy outer's "false" edge.
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_action(Arc::new(BranchAction("demo:gold")), "demo").await;
        registry.register_action(Arc::new(BranchAction("demo:silver")), "demo").await;
        registry.register_action(Arc::new(BranchAction("demo:basic")), "demo").await;
        let executor = Arc::new(Executor::new(registry));
        let engine = FlowEngine::new(executor, Arc::new(HookBus::new()));

        let def = FlowDefinition {
            id: "nested".into(),
            name: "nested".into(),
            nodes: vec![
                FlowNode {
                    id: "t".into(),
                    display_name: None,
                    data: NodeData::Trigger(TriggerData { trigger_type: "manual".into(), config: None }),
                },
                FlowNode {
                    id: "outer".into(),
                    display_name: None,
                    data: NodeData::Condition(ConditionData {
                        conditions: vec![ConditionClause { field: "isPremium".into(), operator: "eq".into(), value: json!(true) }],
                        operator: ConditionCombinator::And,
                    }),
                },
                FlowNode {
                    id: "inner".into(),
                    display_name: None,
                    data: NodeData::Condition(ConditionData {
                        conditions: vec![ConditionClause { field: "tier".into(), operator: "eq".into(), value: json!("gold") }],
                        operator: ConditionCombinator::And,
                    }),
                },
                FlowNode {
                    id: "gold".into(),
                    display_name: None,
                    data: NodeData::Action(ActionData { plugin_name: "demo".into(), action_name: "gold".into(), params: None }),
                },
                FlowNode {
                    id: "silver".into(),
                    display_name: None,
                    data: NodeData::Action(ActionData { plugin_name: "demo".into(), action_name: "silver".into(), params: None }),
                },
                FlowNode {
                    id: "basic".into(),
                    display_name: None,
                    data: NodeData::Action(ActionData { plugin_name: "demo".into(), action_name: "basic".into(), params: None }),
                },
            ],
            edges: vec![
                FlowEdge { id: "e1".into(), source: "t".into(), target: "outer".into(), ..Default::default() },
                FlowEdge {
                    id: "e2".into(),
                    source: "outer".into(),
                    target: "inner".into(),
                    source_handle: Some("true".into()),
                    ..Default::default()
                },
                FlowEdge {
                    id: "e3".into(),
                    source: "outer".into(),
                    target: "basic".into(),
                    source_handle: Some("false".into()),
                    ..Default::default()
                },
                FlowEdge {
                    id: "e4".into(),
                    source: "inner".into(),
                    target: "gold".into(),
                    source_handle: Some("true".into()),
                    ..Default::default()
                },
                FlowEdge {
                    id: "e5".into(),
                    source: "inner".into(),
                    target: "silver".into(),
                    source_handle: Some("false".into()),
                    ..Default::default()
                },
            ],
            created_at: 0,
            updated_at: 0,
        };
        engine.create(def).await;

        let result = engine.execute("nested", Some(json!({ "isPremium": true, "tier": "silver" }))).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.node_results.contains_key("silver"));
        assert!(!result.node_results.contains_key("gold"));
        assert!(!result.node_results.contains_key("basic"));
    }
}
