use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::{Value, json};

use crate::node::{NodeContext, NodeData, NodeError, NodeType};

/// Renders the `template` input with Handlebars against the node's inputs.
///
/// ```handlebars
/// Hello {{inputValue}}, you asked from {{sysLocale}}.
/// {{#each items}}- {{this.name}}
/// {{/each}}
/// ```
///
/// Missing fields render as empty strings. The result is `{result: <text>}`.
#[derive(Clone, Debug, Default)]
pub struct TemplateNode;

#[async_trait]
impl NodeType for TemplateNode {
    fn type_name(&self) -> String {
        "template".to_string()
    }

    #[tracing::instrument(name = "template_node_execute", skip_all, fields(node_id = %data.id))]
    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let template = data
            .input_str("template")
            .ok_or_else(|| NodeError::InvalidInput("`template` input is required".to_string()))?;

        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        let rendered = hbs
            .render_template(template, &data.inputs)
            .map_err(|e| NodeError::InvalidInput(format!("Template render error: {}", e)))?;

        Ok(json!({ "result": rendered }))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(inputs: Value) -> NodeData {
        NodeData {
            inputs: inputs.as_object().cloned().unwrap_or_default(),
            ..NodeData::default()
        }
    }

    #[tokio::test]
    async fn renders_inputs() {
        let inputs = data(json!({
            "template": "Hi {{inputValue}} <{{missing}}>{{#each tags}} #{{this}}{{/each}}",
            "inputValue": "Ann & Bob",
            "tags": ["a", "b"]
        }));
        let out = TemplateNode.execute(&inputs, &NodeContext::dummy()).await.unwrap();
        assert_eq!(out, json!({"result": "Hi Ann & Bob <> #a #b"}));
    }

    #[tokio::test]
    async fn reports_bad_templates() {
        let err = TemplateNode
            .execute(&data(json!({"template": "{{#if}}"})), &NodeContext::dummy())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Template render error"));

        let err = TemplateNode
            .execute(&data(json!({})), &NodeContext::dummy())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)));
    }
}
