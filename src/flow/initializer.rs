//! Builds the record a node executes with and runs it.
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, trace};

use crate::{
    error::FlowError,
    flow::graph::FlowNode,
    node::{Node, NodeContext, NodeData, NodeError},
};

pub const INPUT_VALUE: &str = "inputValue";

/// `sys.userId` is exposed to the start node as `sysUserId`.
pub fn sys_input_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => format!("sys{}{}", first.to_uppercase(), chars.as_str()),
        None => "sys".to_string(),
    }
}

/// JavaScript-style truthiness, which node results are written against.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Inject request-scoped values into the start node's inputs.
pub fn seed_start_inputs(inputs: &mut Map<String, Value>, request: &Value) {
    if let Some(a) = request.get("a") {
        inputs.insert(INPUT_VALUE.to_string(), a.clone());
    }
    if let Some(Value::Object(sys)) = request.get("sys") {
        for (key, value) in sys {
            inputs.insert(sys_input_key(key), value.clone());
        }
    }
}

/// Merge the previous activation's result into `inputs`.
///
/// `{result: X}` forwards `X` as `inputValue`, any other object is merged key
/// by key (last writer wins) and a primitive becomes `inputValue`.
pub fn merge_previous_result(inputs: &mut Map<String, Value>, previous: &Value) {
    match previous {
        Value::Null => {}
        Value::Object(fields) if fields.contains_key("result") => {
            inputs.insert(INPUT_VALUE.to_string(), fields["result"].clone());
        }
        Value::Object(fields) => {
            // request-shaped results carry their primary value in `a`
            if let Some(a) = fields.get("a") {
                inputs.insert(INPUT_VALUE.to_string(), a.clone());
            }
            for (key, value) in fields {
                inputs.insert(key.clone(), value.clone());
            }
        }
        primitive => {
            inputs.insert(INPUT_VALUE.to_string(), primitive.clone());
        }
    }
}

/// Copy a node's declared fields into a fresh execution record.
pub fn prepare_node_data(node: &FlowNode) -> NodeData {
    NodeData {
        id: node.id.clone(),
        name: node.name.clone(),
        label: node.label.clone().unwrap_or_else(|| node.name.clone()),
        node_type: node.node_type.clone(),
        icon: node.icon.clone(),
        version: node.version,
        category: node.category.clone(),
        base_classes: node.base_classes.clone(),
        inputs: node.inputs.clone(),
        outputs: node.outputs.clone(),
        flow_data: node.flow_data.clone(),
        previous_result: None,
        options: node.options.clone(),
    }
}

/// Fill `data.inputs` from the request (start node) or the previous result.
pub fn apply_inputs(
    node: &FlowNode,
    data: &mut NodeData,
    previous: Option<&Value>,
    request: Option<&Value>,
) {
    match request.filter(|r| !r.is_null()) {
        Some(request) => seed_start_inputs(&mut data.inputs, request),
        None => {
            data.flow_data = node.flow_data.clone();
            if let Some(previous) = previous {
                data.previous_result = Some(previous.clone());
                merge_previous_result(&mut data.inputs, previous);
            }
        }
    }
    data.options = node.options.clone();
}

/// Execute `implementation` (the run's instance of `node`) with `data`,
/// racing cancellation and the optional node timeout.
pub async fn initialize_node(
    node: &FlowNode,
    implementation: Option<&Node>,
    data: &NodeData,
    ctx: &NodeContext,
    node_timeout: Option<Duration>,
) -> Result<Value, FlowError> {
    let implementation = implementation.ok_or_else(|| {
        FlowError::InvalidNode(format!(
            "invalid node or missing execute implementation for node: {}",
            node.name
        ))
    })?;
    if data.id != node.id {
        return Err(FlowError::InvalidNodeData {
            node: node.name.clone(),
            reason: format!("node data belongs to `{}`", data.id),
        });
    }

    trace!(node_id = %node.id, inputs = ?data.inputs, "executing node");
    let execution = async {
        let result = match node_timeout {
            Some(limit) => tokio::time::timeout(limit, implementation.execute(data, ctx))
                .await
                .map_err(|_| FlowError::NodeTimeout {
                    node: node.name.clone(),
                    after: limit,
                })?,
            None => implementation.execute(data, ctx).await,
        };
        result.map_err(|source| FlowError::NodeFailed {
            node: node.name.clone(),
            source,
        })
    };

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(FlowError::NodeFailed {
            node: node.name.clone(),
            source: NodeError::Cancelled,
        }),
        outcome = execution => outcome,
    };
    if let Err(err) = &outcome {
        error!(node = %node.name, error = %err, "error initializing node");
    }
    outcome
}
