use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    error::FlowError,
    flow::{
        builder::FlowBuilder,
        definition::{FlowDefinition, NodeDefinition, SubFlow},
        graph::{START_NODE_NAME, StartPolicy},
        initializer::{INPUT_VALUE, truthy},
    },
    node::{NodeContext, NodeData, NodeError, NodeType},
    nodes::{condition::evaluate_condition, loop_function::SUCCESS_CONDITION},
    notifier::ProgressEvent,
};

/// Hard ceiling on passes over the inner flow.
pub const MAX_LOOP_ITERATIONS: usize = 100;
const START_TYPE: &str = "StartFunction";

fn is_inner_start(node: &NodeDefinition) -> bool {
    node.data
        .as_ref()
        .is_some_and(|d| d.node_type == START_TYPE || d.name == START_NODE_NAME)
}

/// The inner flow as a standalone definition with its start node first.
fn inner_definition(flow_data: &SubFlow) -> Result<FlowDefinition, NodeError> {
    let mut nodes = flow_data.inner_nodes.clone();
    let start = nodes
        .iter()
        .position(is_inner_start)
        .ok_or_else(|| NodeError::InvalidInput("Start node not found in inner flow".to_string()))?;
    let start = nodes.remove(start);
    nodes.insert(0, start);
    Ok(FlowDefinition {
        nodes,
        edges: flow_data.inner_edges.clone(),
    })
}

/// Composite node: runs its inner flow again and again until
/// `successCondition` holds. Each pass is fed the primary value of the
/// previous pass's final result (`result` when present).
#[derive(Clone, Debug, Default)]
pub struct LoopNode;

#[async_trait]
impl NodeType for LoopNode {
    fn type_name(&self) -> String {
        "loop".to_string()
    }

    #[tracing::instrument(name = "loop_node_execute", skip_all, fields(node_id = %data.id))]
    async fn execute(&self, data: &NodeData, ctx: &NodeContext) -> Result<Value, NodeError> {
        let condition = data
            .input_str(SUCCESS_CONDITION)
            .filter(|script| !script.trim().is_empty())
            .ok_or_else(|| NodeError::InvalidInput("Success condition is required".to_string()))?;
        let registry = ctx
            .registry()
            .cloned()
            .ok_or_else(|| NodeError::Internal("loop node needs a node registry".to_string()))?;
        let inner = inner_definition(&data.flow_data)?;

        let config = EngineConfig {
            start_policy: StartPolicy::FirstInserted,
            ..ctx.config().clone()
        };
        let builder = FlowBuilder::new(registry)
            .with_config(Arc::new(config))
            .with_options(data.options.clone());

        let mut current = data.input_value().cloned().unwrap_or(Value::Null);
        let mut tokens = 0.0;

        for iteration in 1..=MAX_LOOP_ITERATIONS {
            if ctx.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let request = json!({ "a": current });
            let executor = builder
                .build(&inner, Some(&request))
                .map_err(|e| NodeError::ExecutionFailed(format!("inner flow: {}", e)))?
                .with_cancellation(ctx.cancellation().child_token());
            let outcome = executor.execute(Some(request)).await.map_err(|e| match e {
                FlowError::Cancelled => NodeError::Cancelled,
                other => NodeError::ExecutionFailed(format!("inner flow: {}", other)),
            })?;
            tokens += outcome.token_count;
            let result = outcome.final_result;

            let checked = if truthy(&result) { &result } else { &current };
            let success = evaluate_condition(condition, checked, &data.inputs, iteration)?;
            debug!(iteration, success, "inner flow pass finished");
            data.options.notify(ProgressEvent::LoopIteration {
                node_id: data.id.clone(),
                iteration,
                success,
            });

            if success {
                let mut payload = Map::new();
                payload.insert(INPUT_VALUE.to_string(), checked.clone());
                if let Value::Object(fields) = &result {
                    payload.extend(fields.clone());
                }
                payload.insert("innerFlowResult".to_string(), result);
                payload.insert("iterationCount".to_string(), json!(iteration));
                return Ok(json!({ "success": payload, "tokenCount": tokens }));
            }
            current = match result {
                Value::Object(mut fields) if fields.contains_key("result") => {
                    fields.remove("result").unwrap_or(Value::Null)
                }
                other => other,
            };
        }

        warn!(limit = MAX_LOOP_ITERATIONS, "loop never met its success condition");
        Err(NodeError::ExecutionFailed(format!(
            "Loop execution exceeded maximum iterations ({})",
            MAX_LOOP_ITERATIONS
        )))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
