//! NodeRegistry: maps a node name (`data.name` in a flow definition) to a
//! factory producing a fresh implementation of that node.
use std::{fmt, sync::Arc};

use dashmap::DashMap;
use tracing::debug;

use crate::{error::FlowError, node::Node};

pub type NodeFactory = Arc<dyn Fn() -> Node + Send + Sync>;

/// Populated once at start-up and shared between runs. Every `resolve`
/// builds a new instance, so per-instance state (like a loop counter) never
/// leaks from one run into the next.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: DashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in node.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::nodes::register_builtins(&registry);
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Node + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(node = %name, "registering node factory");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted names of every registered node.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn resolve(&self, name: &str) -> Result<Node, FlowError> {
        // clone the factory out so the shard lock is released before it runs
        let factory = self
            .factories
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FlowError::UnknownNodeType(name.to_string()))?;
        Ok(factory())
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.names())
            .finish()
    }
}
