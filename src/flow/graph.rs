use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{
    error::FlowError,
    flow::definition::SubFlow,
    node::{Node, NodeOptions, NodeRole},
};

/// Name that marks the entry node of a flow.
pub const START_NODE_NAME: &str = "startFunction";

/// How a start node is picked when none is named `startFunction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// A lone node is the start; otherwise a `startFunction` node is required.
    #[default]
    Explicit,
    /// The first node added wins.
    FirstInserted,
}

/// Directed connection `source -> target`, optionally qualified by handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    pub fn source_handle_contains(&self, needle: &str) -> bool {
        self.source_handle
            .as_deref()
            .is_some_and(|handle| handle.contains(needle))
    }
}

/// A node instance taking part in one execution.
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub role: NodeRole,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub version: Option<f64>,
    pub category: Option<String>,
    pub base_classes: Vec<String>,
    /// Declared inputs with their defaults.
    pub inputs: Map<String, Value>,
    /// Declared output slots.
    pub outputs: Option<Value>,
    pub flow_data: SubFlow,
    pub options: NodeOptions,
    implementation: Option<Node>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: id.into(),
            name: name.into(),
            role: NodeRole::from_type_tag(&node_type),
            node_type,
            label: None,
            icon: None,
            version: None,
            category: None,
            base_classes: Vec::new(),
            inputs: Map::new(),
            outputs: None,
            flow_data: SubFlow::default(),
            options: NodeOptions::default(),
            implementation: None,
        }
    }

    pub fn with_implementation(mut self, node: Node) -> Self {
        self.implementation = Some(node);
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_flow_data(mut self, flow_data: SubFlow) -> Self {
        self.flow_data = flow_data;
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn implementation(&self) -> Option<&Node> {
        self.implementation.as_ref()
    }

    pub fn is_named_start(&self) -> bool {
        self.name == START_NODE_NAME
    }
}

/// Nodes keyed by name and id, the edge list and its adjacency map.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    by_name: HashMap<String, usize>,
    node_id_map: HashMap<String, usize>,
    named_starts: Vec<usize>,
    edges: Vec<FlowEdge>,
    node_connections: HashMap<String, Vec<String>>,
    start_policy: StartPolicy,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_name: HashMap::new(),
            node_id_map: HashMap::new(),
            named_starts: Vec::new(),
            edges: Vec::new(),
            node_connections: HashMap::new(),
            start_policy: StartPolicy::default(),
        }
    }

    pub fn with_start_policy(mut self, policy: StartPolicy) -> Self {
        self.start_policy = policy;
        self
    }

    /// Replace the edge list and rebuild the adjacency map in full.
    pub fn add_edges(&mut self, edges: Vec<FlowEdge>) {
        self.node_connections.clear();
        for edge in &edges {
            self.node_connections
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
        }
        self.edges = edges;
        trace!(edges = self.edges.len(), "rebuilt node connections");
    }

    /// Register a node under its name and id.
    pub fn add_node(&mut self, node: FlowNode) -> Result<(), FlowError> {
        if node.name.trim().is_empty() {
            return Err(FlowError::InvalidNode(
                "node must have a valid non-empty name".to_string(),
            ));
        }
        if node.node_type.trim().is_empty() {
            return Err(FlowError::InvalidNode(format!(
                "node {} must have a valid type",
                node.name
            )));
        }
        if node.implementation.is_none() {
            return Err(FlowError::InvalidNode(format!(
                "node {} must have an execute implementation",
                node.name
            )));
        }
        if node.id.trim().is_empty() {
            return Err(FlowError::InvalidNode(format!(
                "node {} must have an id",
                node.name
            )));
        }
        if self.node_id_map.contains_key(&node.id) {
            return Err(FlowError::DuplicateNodeId(node.id));
        }

        let index = self.nodes.len();
        if node.is_named_start() {
            self.named_starts.push(index);
        }
        debug!(node_id = %node.id, name = %node.name, role = ?node.role, "added node");
        self.by_name.insert(node.name.clone(), index);
        self.node_id_map.insert(node.id.clone(), index);
        self.nodes.push(node);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.node_id_map.get(id).map(|&ix| &self.nodes[ix])
    }

    /// Latest node registered under `name`.
    pub fn node_by_name(&self, name: &str) -> Option<&FlowNode> {
        self.by_name.get(name).map(|&ix| &self.nodes[ix])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    /// Target ids of every edge leaving `id`, in edge order.
    pub fn connections(&self, id: &str) -> &[String] {
        self.node_connections
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |edge| edge.source == id)
    }

    pub fn start_node(&self) -> Result<&FlowNode, FlowError> {
        match self.named_starts.as_slice() {
            [ix] => return Ok(&self.nodes[*ix]),
            [] => {}
            many => {
                return Err(FlowError::AmbiguousStart(
                    many.iter().map(|&ix| self.nodes[ix].id.clone()).collect(),
                ));
            }
        }
        match (self.nodes.as_slice(), self.start_policy) {
            ([], _) => Err(FlowError::EmptyFlow),
            ([only], _) => Ok(only),
            ([first, ..], StartPolicy::FirstInserted) => Ok(first),
            (_, StartPolicy::Explicit) => Err(FlowError::NoStartNode),
        }
    }

    /// Check the whole graph before anything runs.
    pub fn validate(&self) -> Result<(), FlowError> {
        self.start_node()?;
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !self.node_id_map.contains_key(endpoint) {
                    return Err(FlowError::DanglingEdge {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
