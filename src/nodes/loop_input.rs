use async_trait::async_trait;
use serde_json::{Value, json};

use crate::node::{NodeContext, NodeData, NodeError, NodeType};

/// Start of a loop pass. Forwards whatever it was fed.
#[derive(Clone, Debug, Default)]
pub struct LoopInputNode;

#[async_trait]
impl NodeType for LoopInputNode {
    fn type_name(&self) -> String {
        "loopInput".to_string()
    }

    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let value = match data.input_value() {
            Some(value) => value.clone(),
            None => Value::Object(data.inputs.clone()),
        };
        Ok(json!({ "result": value }))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
