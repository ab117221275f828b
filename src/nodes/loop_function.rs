use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    node::{NodeContext, NodeData, NodeError, NodeType},
    nodes::condition::evaluate_condition,
    notifier::ProgressEvent,
};

pub const SUCCESS_CONDITION: &str = "successCondition";
pub const MAX_ITERATIONS: &str = "maxIterations";

/// Loop control node.
///
/// Each activation counts as one iteration. The `successCondition` Rhai
/// expression decides whether the loop exits (`{success: true}`) or goes
/// round again (`{failure: true}`); `maxIterations` forces an exit once the
/// count is reached. The counter restarts after every exit.
#[derive(Debug, Default)]
pub struct LoopFunctionNode {
    iterations: AtomicUsize,
}

impl Clone for LoopFunctionNode {
    fn clone(&self) -> Self {
        Self {
            iterations: AtomicUsize::new(self.iterations.load(Ordering::SeqCst)),
        }
    }
}

#[async_trait]
impl NodeType for LoopFunctionNode {
    fn type_name(&self) -> String {
        "loopFunction".to_string()
    }

    #[tracing::instrument(name = "loop_function_execute", skip_all, fields(node_id = %data.id))]
    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let condition = data
            .input_str(SUCCESS_CONDITION)
            .filter(|script| !script.trim().is_empty());
        let max_iterations = data.input(MAX_ITERATIONS).and_then(Value::as_u64);
        if condition.is_none() && max_iterations.is_none() {
            return Err(NodeError::InvalidInput(format!(
                "{} or {} is required",
                SUCCESS_CONDITION, MAX_ITERATIONS
            )));
        }

        let iteration = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        let input = data.input_value().cloned().unwrap_or(Value::Null);

        let exhausted = max_iterations.is_some_and(|max| iteration as u64 >= max);
        let success = exhausted
            || match condition {
                Some(script) => evaluate_condition(script, &input, &data.inputs, iteration)?,
                None => false,
            };
        debug!(iteration, success, exhausted, "loop condition evaluated");

        data.options.notify(ProgressEvent::LoopIteration {
            node_id: data.id.clone(),
            iteration,
            success,
        });

        if success {
            self.iterations.store(0, Ordering::SeqCst);
            Ok(json!({"success": true, "result": input, "iterationCount": iteration}))
        } else {
            Ok(json!({"failure": true, "result": input, "iterationCount": iteration}))
        }
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
