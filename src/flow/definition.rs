//! The persisted shape of a flow, as the editor saves it.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::FlowError, flow::graph::FlowEdge};

/// `{ nodes: [...], edges: [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FlowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowDefinition {
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml_bw::Error> {
        serde_yaml_bw::from_str(content)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeDefinition {
    #[serde(default)]
    pub id: String,
    /// Editor-level type. Only consulted for inner nodes without `data.type`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeDefinitionData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinitionData {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_classes: Vec<String>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_nodes: Vec<NodeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_edges: Vec<FlowEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_data: Option<SubFlow>,
}

/// Nested graph carried by composite nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubFlow {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_nodes: Vec<NodeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_edges: Vec<FlowEdge>,
}

impl SubFlow {
    pub fn is_empty(&self) -> bool {
        self.inner_nodes.is_empty() && self.inner_edges.is_empty()
    }
}

impl NodeDefinition {
    /// Best-effort name for error messages.
    pub fn display_name(&self) -> &str {
        self.data
            .as_ref()
            .map(|d| d.name.as_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("unknown")
    }
}

/// Structural checks on a persisted node before it is resolved.
pub fn validate_node_data(node: &NodeDefinition) -> Result<&NodeDefinitionData, FlowError> {
    let invalid = |reason: &str| FlowError::InvalidNodeData {
        node: node.display_name().to_string(),
        reason: reason.to_string(),
    };

    let data = node
        .data
        .as_ref()
        .ok_or_else(|| invalid("node must have a valid data object"))?;
    if data.name.trim().is_empty() {
        return Err(invalid("node must have a valid non-empty name in data object"));
    }
    if data.node_type.trim().is_empty() {
        return Err(invalid("node must have a valid type"));
    }
    if data.category.trim().is_empty() {
        return Err(invalid("node must have a valid category"));
    }
    if node.id.trim().is_empty() {
        return Err(invalid("node must have an id"));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: Value) -> NodeDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_editor_json() {
        let flow = FlowDefinition::from_json_str(
            r#"{
                "nodes": [
                    {"id": "n1", "data": {"name": "startFunction", "type": "StartFunction",
                      "category": "Utilities", "inputs": {"prompt": "hi"}, "baseClasses": ["start"]}},
                    {"id": "n2", "data": {"name": "loop", "type": "loop", "category": "Loop",
                      "innerNodes": [{"data": {"name": "startFunction"}}]}}
                ],
                "edges": [{"source": "n1", "target": "n2", "sourceHandle": "n1-output-startFunction"}]
            }"#,
        )
        .unwrap();

        assert_eq!(flow.nodes.len(), 2);
        let data = flow.nodes[0].data.as_ref().unwrap();
        assert_eq!(data.node_type, "StartFunction");
        assert_eq!(data.inputs["prompt"], json!("hi"));
        assert_eq!(data.base_classes, vec!["start".to_string()]);
        assert_eq!(flow.nodes[1].data.as_ref().unwrap().inner_nodes.len(), 1);
        assert_eq!(flow.edges[0].source_handle.as_deref(), Some("n1-output-startFunction"));
    }

    #[test]
    fn parses_yaml() {
        let flow = FlowDefinition::from_yaml_str(
            "nodes:\n  - id: a\n    data:\n      name: startFunction\n      type: StartFunction\n      category: Utilities\nedges: []\n",
        )
        .unwrap();
        assert_eq!(flow.nodes[0].id, "a");
    }

    #[test]
    fn validation_requires_data_name_type_and_category() {
        let missing_data = node(json!({"id": "x"}));
        assert!(validate_node_data(&missing_data).unwrap_err().to_string().contains("data object"));

        let no_name = node(json!({"id": "x", "data": {"name": " ", "type": "T", "category": "C"}}));
        assert!(validate_node_data(&no_name).unwrap_err().to_string().contains("non-empty name"));

        let no_type = node(json!({"id": "x", "data": {"name": "n", "type": "", "category": "C"}}));
        let err = validate_node_data(&no_type).unwrap_err().to_string();
        assert!(err.contains("`n`") && err.contains("valid type"));

        let no_category = node(json!({"id": "x", "data": {"name": "n", "type": "T"}}));
        assert!(validate_node_data(&no_category).unwrap_err().to_string().contains("category"));

        let ok = node(json!({"id": "x", "data": {"name": "n", "type": "T", "category": "C"}}));
        assert_eq!(validate_node_data(&ok).unwrap().name, "n");
    }
}
