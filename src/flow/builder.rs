//! Turns a persisted [`FlowDefinition`] into a runnable [`FlowGraph`].
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    error::{FlowError, RunError},
    flow::{
        definition::{FlowDefinition, NodeDefinition, SubFlow, validate_node_data},
        executor::FlowExecutor,
        graph::{FlowEdge, FlowGraph, FlowNode, START_NODE_NAME},
        initializer::sys_input_key,
    },
    node::{COMPOSITE_TYPE, NodeOptions},
    registry::NodeRegistry,
};

pub const HAS_INNER_FLOW: &str = "hasInnerFlow";
const UNKNOWN_INNER_TYPE: &str = "unknown";

/// Drop declared inputs the editor left unset.
pub fn sanitize_inputs(inputs: &Map<String, Value>) -> Map<String, Value> {
    inputs
        .iter()
        .filter(|(_, value)| !matches!(value, Value::Null) && value.as_str() != Some(""))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Give every inner node and edge an id, and every inner node a type.
pub fn prepare_inner_flow(nodes: Vec<NodeDefinition>, edges: Vec<FlowEdge>) -> SubFlow {
    let new_id = || uuid::Uuid::new_v4().to_string();
    let inner_nodes = nodes
        .into_iter()
        .map(|mut node| {
            if node.id.trim().is_empty() {
                node.id = new_id();
            }
            if node.kind.as_deref().is_none_or(|kind| kind.trim().is_empty()) {
                node.kind = Some(UNKNOWN_INNER_TYPE.to_string());
            }
            node
        })
        .collect();
    let inner_edges = edges
        .into_iter()
        .map(|mut edge| {
            if edge.id.is_none() {
                edge.id = Some(new_id());
            }
            edge
        })
        .collect();
    SubFlow {
        inner_nodes,
        inner_edges,
    }
}

#[derive(Debug, Clone)]
pub struct FlowBuilder {
    registry: Arc<NodeRegistry>,
    config: Arc<EngineConfig>,
    options: NodeOptions,
}

impl FlowBuilder {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            config: Arc::new(EngineConfig::default()),
            options: NodeOptions::default(),
        }
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    /// Options every node of the built flow receives.
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and resolve every node. The first bad node aborts the build
    /// with an error naming it; nothing has executed at that point.
    #[tracing::instrument(name = "flow_build", skip_all, fields(nodes = definition.nodes.len()))]
    pub fn build_graph(
        &self,
        definition: &FlowDefinition,
        request: Option<&Value>,
    ) -> Result<FlowGraph, RunError> {
        if definition.nodes.is_empty() {
            return Err(RunError::Invalid(FlowError::EmptyFlow));
        }

        let mut graph = FlowGraph::new().with_start_policy(self.config.start_policy);
        graph.add_edges(definition.edges.clone());

        for definition in &definition.nodes {
            let node = self
                .build_node(definition, request)
                .map_err(|err| RunError::node(definition.display_name(), err))?;
            if let Some(earlier) = graph.node_by_name(&node.name) {
                debug!(name = %node.name, earlier = %earlier.id, later = %node.id, "node name reused");
            }
            graph
                .add_node(node)
                .map_err(|err| RunError::node(definition.display_name(), err))?;
        }
        debug!(nodes = graph.len(), "flow graph built");
        Ok(graph)
    }

    /// Build the graph and wrap it in an executor sharing this builder's
    /// registry, config and options.
    pub fn build(
        &self,
        definition: &FlowDefinition,
        request: Option<&Value>,
    ) -> Result<FlowExecutor, RunError> {
        let graph = self.build_graph(definition, request)?;
        Ok(FlowExecutor::new(graph)
            .with_config(self.config.clone())
            .with_registry(self.registry.clone())
            .with_options(self.options.clone()))
    }

    fn build_node(
        &self,
        definition: &NodeDefinition,
        request: Option<&Value>,
    ) -> Result<FlowNode, FlowError> {
        let data = validate_node_data(definition)?;
        let implementation = self.registry.resolve(&data.name)?;

        let mut inputs = sanitize_inputs(&data.inputs);
        if data.name == START_NODE_NAME {
            if let Some(request) = request {
                if let Some(a) = request.get("a").filter(|a| !a.is_null()) {
                    inputs.insert("a".to_string(), a.clone());
                }
                if let Some(Value::Object(sys)) = request.get("sys") {
                    for (key, value) in sys {
                        inputs.insert(sys_input_key(key), value.clone());
                    }
                }
            }
        }

        let mut flow_data = data.flow_data.clone().unwrap_or_default();
        if data.node_type == COMPOSITE_TYPE {
            let nodes = if data.inner_nodes.is_empty() {
                std::mem::take(&mut flow_data.inner_nodes)
            } else {
                data.inner_nodes.clone()
            };
            let edges = if data.inner_edges.is_empty() {
                std::mem::take(&mut flow_data.inner_edges)
            } else {
                data.inner_edges.clone()
            };
            if nodes.is_empty() {
                warn!(node_id = %definition.id, "loop node has no inner nodes");
            }
            flow_data = prepare_inner_flow(nodes, edges);
            inputs.insert(HAS_INNER_FLOW.to_string(), Value::Bool(true));
        }

        let mut node = FlowNode::new(&definition.id, &data.name, &data.node_type)
            .with_implementation(implementation)
            .with_inputs(inputs)
            .with_flow_data(flow_data)
            .with_options(self.options.clone());
        node.label = data.label.clone();
        node.icon = data.icon.clone();
        node.version = data.version;
        node.category = Some(data.category.clone());
        node.base_classes = data.base_classes.clone();
        node.outputs = data.outputs.clone();
        Ok(node)
    }
}
