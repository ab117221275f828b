use async_trait::async_trait;
use serde_json::Value;

use crate::{
    flow::initializer::INPUT_VALUE,
    node::{NodeContext, NodeData, NodeError, NodeType},
};

/// Entry node. Hands the request-seeded inputs to the rest of the flow, with
/// the primary value under `result`.
#[derive(Clone, Debug, Default)]
pub struct StartFunctionNode;

#[async_trait]
impl NodeType for StartFunctionNode {
    fn type_name(&self) -> String {
        "startFunction".to_string()
    }

    #[tracing::instrument(name = "start_node_execute", skip_all, fields(node_id = %data.id))]
    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let mut output = data.inputs.clone();
        let primary = data
            .input_value()
            .or_else(|| data.input("a"))
            .cloned()
            .unwrap_or(Value::Null);
        output.remove(INPUT_VALUE);
        output.insert("result".to_string(), primary);
        Ok(Value::Object(output))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
