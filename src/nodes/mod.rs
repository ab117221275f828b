//! Built-in nodes.
pub mod condition;
pub mod debug;
pub mod loop_function;
pub mod loop_input;
pub mod loop_node;
pub mod start;
pub mod template;

use crate::{node::Node, registry::NodeRegistry};

pub use debug::DebugNode;
pub use loop_function::LoopFunctionNode;
pub use loop_input::LoopInputNode;
pub use loop_node::LoopNode;
pub use start::StartFunctionNode;
pub use template::TemplateNode;

pub fn register_builtins(registry: &NodeRegistry) {
    registry.register("startFunction", || Node::new(StartFunctionNode));
    registry.register("loopInput", || Node::new(LoopInputNode));
    registry.register("loopFunction", || Node::new(LoopFunctionNode::default()));
    registry.register("template", || Node::new(TemplateNode));
    registry.register("debug", || Node::new(DebugNode));
    registry.register("loop", || Node::new(LoopNode));
}
