use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{
    config::EngineConfig,
    error::FlowError,
    flow::{
        graph::{FlowGraph, FlowNode},
        initializer::{apply_inputs, initialize_node, prepare_node_data, truthy},
        membership::mark_loop_members,
        resolver::{SUCCESS_HANDLE, resolve_successors},
    },
    node::{Node, NodeContext, NodeOptions, NodeRole},
    notifier::ProgressEvent,
    registry::NodeRegistry,
};

pub const STATUS_SUCCESS: &str = "SUCCESS";

/// One entry per node activation, repeats included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub node_name: String,
    /// 1 for the first time this node fired in the run, 2 for the second...
    pub activation: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub status: String,
    /// Wall clock seconds from the first dequeue to completion.
    pub execution_time: f64,
    /// Plain sum of every activation's `tokenCount`.
    pub token_count: f64,
    pub results: Vec<NodeRecord>,
    pub final_result: Value,
}

impl ExecutionResult {
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// How many times the node called `name` fired.
    pub fn activations_of(&self, name: &str) -> usize {
        self.results.iter().filter(|r| r.node_name == name).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub node_count: usize,
    pub has_start_node: bool,
}

/// `tokenCount` reported by a node result; absent or non-numeric counts as 0.
pub fn token_count(result: &Value) -> f64 {
    result
        .get("tokenCount")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Drives one run over a private [`FlowGraph`].
#[derive(Debug)]
pub struct FlowExecutor {
    graph: FlowGraph,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
    registry: Option<Arc<NodeRegistry>>,
    options: NodeOptions,
}

impl FlowExecutor {
    pub fn new(graph: FlowGraph) -> Self {
        Self {
            graph,
            config: Arc::new(EngineConfig::default()),
            cancel: CancellationToken::new(),
            registry: None,
            options: NodeOptions::default(),
        }
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registry handed to composite nodes that build inner flows.
    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run-level options; progress events go to their notifier.
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> FlowStatus {
        FlowStatus {
            node_count: self.graph.len(),
            has_start_node: self.graph.start_node().is_ok(),
        }
    }

    /// Validate the graph, then run it to completion starting at the start node.
    ///
    /// `request` is only seen by the start node. Any error aborts the run and
    /// no partial result is returned.
    ///
    /// Every call is a separate execution with its own flow id and fresh node
    /// instances, so the executor can be run again.
    #[tracing::instrument(name = "flow_execute", skip(self, request), fields(flow_id = tracing::field::Empty))]
    pub async fn execute(&self, request: Option<Value>) -> Result<ExecutionResult, FlowError> {
        let flow_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("flow_id", flow_id.as_str());
        self.options.notify(ProgressEvent::FlowStarted {
            flow_id: flow_id.clone(),
            chat_id: self.options.chat_id.clone(),
        });

        let outcome = match self.config.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run(&flow_id, request.as_ref()))
                .await
                .unwrap_or(Err(FlowError::Timeout(limit))),
            None => self.run(&flow_id, request.as_ref()).await,
        };

        match &outcome {
            Ok(result) => {
                info!(
                    nodes = result.results.len(),
                    tokens = result.token_count,
                    seconds = result.execution_time,
                    "flow completed"
                );
                self.options.notify(ProgressEvent::FlowFinished {
                    flow_id: result.flow_id.clone(),
                    execution_time: result.execution_time,
                    token_count: result.token_count,
                });
            }
            Err(err) => {
                error!(error = %err, phase = ?err.phase(), "flow failed");
                self.options.notify(ProgressEvent::FlowFailed {
                    flow_id: flow_id.clone(),
                    error: err.to_string(),
                });
            }
        }
        outcome
    }

    async fn run(&self, flow_id: &str, request: Option<&Value>) -> Result<ExecutionResult, FlowError> {
        self.graph.validate()?;
        let start = self.graph.start_node()?;
        // one instance per node and execution; node state never outlives a run
        let instances: HashMap<&str, Node> = self
            .graph
            .nodes()
            .filter_map(|n| n.implementation().map(|imp| (n.id.as_str(), imp.clone())))
            .collect();

        let mut ctx = NodeContext::new(self.cancel.clone(), self.config.clone());
        if let Some(registry) = &self.registry {
            ctx = ctx.with_registry(registry.clone());
        }
        let node_timeout = self.config.node_timeout();

        let clock = Instant::now();
        let mut queue: VecDeque<&FlowNode> = VecDeque::from([start]);
        let mut executed: HashSet<String> = HashSet::new();
        let mut in_loop: HashSet<String> = HashSet::new();
        let mut latest: HashMap<String, Value> = HashMap::new();
        let mut activations: HashMap<&str, usize> = HashMap::new();
        let mut loop_start: Option<String> = None;
        let mut records: Vec<NodeRecord> = Vec::new();
        let mut previous: Option<Value> = None;
        let mut total_tokens: f64 = 0.0;

        while let Some(node) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            if executed.contains(&node.id)
                && !in_loop.contains(&node.id)
                && node.role != NodeRole::LoopEntry
            {
                trace!(node_id = %node.id, "already executed, skipping");
                continue;
            }
            if records.len() >= self.config.max_activations {
                return Err(FlowError::BudgetExceeded(self.config.max_activations));
            }

            let mut data = prepare_node_data(node);
            let seed = request.filter(|_| node.id == start.id && node.is_named_start());
            apply_inputs(node, &mut data, previous.as_ref(), seed);

            let activation = activations.entry(node.id.as_str()).or_default();
            *activation += 1;
            let activation = *activation;
            debug!(node_id = %node.id, node = %node.name, activation, "executing node");
            self.options.notify(ProgressEvent::NodeStarted {
                flow_id: flow_id.to_string(),
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                activation,
            });

            let started = Utc::now();
            let instance = instances.get(node.id.as_str());
            let result = initialize_node(node, instance, &data, &ctx, node_timeout).await?;
            let finished = Utc::now();

            let tokens = token_count(&result);
            total_tokens += tokens;
            self.options.notify(ProgressEvent::NodeFinished {
                flow_id: flow_id.to_string(),
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                activation,
                token_count: tokens,
            });
            records.push(NodeRecord {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                activation,
                started,
                finished,
                result: result.clone(),
            });
            latest.insert(node.id.clone(), result.clone());
            executed.insert(node.id.clone());

            match node.role {
                NodeRole::LoopEntry => {
                    if let Some(previous_start) = loop_start.replace(node.id.clone()) {
                        trace!(previous_start, "loop entry re-fired");
                    }
                    mark_loop_members(&self.graph, &node.id, &latest, &mut in_loop)?;
                }
                NodeRole::LoopControl if result.get(SUCCESS_HANDLE).is_some_and(truthy) => {
                    debug!(loop_start = ?loop_start.take(), "loop exited");
                    in_loop.clear();
                }
                _ => {}
            }

            let next = resolve_successors(
                &self.graph,
                &node.id,
                Some(&result),
                self.config.loop_branch_policy,
            )?;
            queue.extend(next);
            previous = Some(result);
        }

        Ok(ExecutionResult {
            flow_id: flow_id.to_string(),
            chat_id: self.options.chat_id.clone(),
            status: STATUS_SUCCESS.to_string(),
            execution_time: clock.elapsed().as_secs_f64(),
            token_count: total_tokens,
            results: records,
            final_result: previous.unwrap_or(Value::Null),
        })
    }
}
