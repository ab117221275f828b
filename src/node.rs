use std::{fmt, sync::Arc};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig, flow::definition::SubFlow, notifier::Notifier, registry::NodeRegistry,
};

/// The contract every executable unit of a flow satisfies.
///
/// `execute` receives the node's resolved inputs (declared defaults merged with
/// whatever the previous activation produced) and returns an arbitrary JSON
/// result. By convention a result may carry a numeric `tokenCount`, and loop
/// control nodes report a truthy `success` or `failure` field.
#[async_trait]
pub trait NodeType: Send + Sync + Debug {
    fn type_name(&self) -> String;
    async fn execute(&self, data: &NodeData, ctx: &NodeContext) -> Result<Value, NodeError>;
    fn clone_box(&self) -> Box<dyn NodeType>;
}

pub struct Node(pub Box<dyn NodeType>);

impl Node {
    pub fn new(node: impl NodeType + 'static) -> Self {
        Node(Box::new(node))
    }
}

impl std::ops::Deref for Node {
    type Target = dyn NodeType;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node(self.0.clone_box())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.0).finish()
    }
}

/// Control-flow role of a node, derived once from its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Standard,
    /// `LoopInput`: starts a loop pass, may always fire again.
    LoopEntry,
    /// `LoopFunction`: its result picks the success or failure branch.
    LoopControl,
    /// `loop`: a container carrying its own inner flow.
    Composite,
}

pub const LOOP_ENTRY_TYPE: &str = "LoopInput";
pub const LOOP_CONTROL_TYPE: &str = "LoopFunction";
pub const COMPOSITE_TYPE: &str = "loop";

impl NodeRole {
    pub fn from_type_tag(tag: &str) -> Self {
        match tag {
            LOOP_ENTRY_TYPE => NodeRole::LoopEntry,
            LOOP_CONTROL_TYPE => NodeRole::LoopControl,
            COMPOSITE_TYPE => NodeRole::Composite,
            _ => NodeRole::Standard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Error)]
pub enum NodeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Processing error: {0}")]
    ExecutionFailed(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pass-through configuration handed to every node.
#[derive(Clone, Default)]
pub struct NodeOptions {
    pub chatflow_id: Option<String>,
    pub chat_id: Option<String>,
    pub session_id: Option<String>,
    /// `overrideConfig` entries from the request.
    pub config: Map<String, Value>,
    pub notifier: Option<Notifier>,
}

impl NodeOptions {
    /// Forward a progress event on the injected notifier, if any.
    pub fn notify(&self, event: crate::notifier::ProgressEvent) {
        if let Some(notifier) = &self.notifier {
            let channel = self.chatflow_id.as_deref().unwrap_or_default();
            notifier.0.notify(channel, event);
        }
    }
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("chatflow_id", &self.chatflow_id)
            .field("chat_id", &self.chat_id)
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// The record a node is executed with.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub id: String,
    pub name: String,
    pub label: String,
    pub node_type: String,
    pub icon: Option<String>,
    pub version: Option<f64>,
    pub category: Option<String>,
    pub base_classes: Vec<String>,
    pub inputs: Map<String, Value>,
    pub outputs: Option<Value>,
    pub flow_data: SubFlow,
    pub previous_result: Option<Value>,
    pub options: NodeOptions,
}

impl NodeData {
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }

    pub fn input_value(&self) -> Option<&Value> {
        self.inputs.get("inputValue")
    }
}

/// Run-scoped services available to a node while it executes.
#[derive(Clone)]
pub struct NodeContext {
    cancel: CancellationToken,
    registry: Option<Arc<NodeRegistry>>,
    config: Arc<EngineConfig>,
}

impl NodeContext {
    pub fn new(cancel: CancellationToken, config: Arc<EngineConfig>) -> Self {
        Self {
            cancel,
            registry: None,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn registry(&self) -> Option<&Arc<NodeRegistry>> {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dummy() -> Self {
        Self::new(CancellationToken::new(), Arc::new(EngineConfig::default()))
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("registry", &self.registry)
            .finish()
    }
}
