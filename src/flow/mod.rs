pub mod builder;
pub mod definition;
pub mod executor;
pub mod graph;
pub mod initializer;
pub mod membership;
pub mod resolver;

pub use builder::FlowBuilder;
pub use definition::{FlowDefinition, NodeDefinition, SubFlow};
pub use executor::{ExecutionResult, FlowExecutor, FlowStatus, NodeRecord};
pub use graph::{FlowEdge, FlowGraph, FlowNode, StartPolicy};
pub use resolver::LoopBranchPolicy;
