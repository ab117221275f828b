pub mod config;
pub mod error;
pub mod flow;
pub mod flow_commands;
pub mod logger;
pub mod node;
pub mod nodes;
pub mod notifier;
pub mod registry;
pub mod runner;
pub mod schema;

pub use error::{FlowError, Phase, RunError};
pub use flow::{ExecutionResult, FlowDefinition, FlowExecutor};
pub use node::{Node, NodeContext, NodeData, NodeError, NodeType};
pub use registry::NodeRegistry;
pub use runner::FlowRunner;
