use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::node::{NodeContext, NodeData, NodeError, NodeType};

/// Logs what it receives and echoes `inputValue`.
#[derive(Clone, Debug, Default)]
pub struct DebugNode;

#[async_trait]
impl NodeType for DebugNode {
    fn type_name(&self) -> String {
        "debug".to_string()
    }

    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        info!(
            node_id = %data.id,
            previous = ?data.previous_result,
            "**** DEBUG ****: inputs {:?}",
            data.inputs
        );
        Ok(data
            .input_value()
            .cloned()
            .unwrap_or_else(|| Value::Object(data.inputs.clone())))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
