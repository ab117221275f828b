use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeError;

/// Which half of a run an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Raised while the graph is assembled or checked, before any node runs.
    Validation,
    /// Raised after the first node was dequeued.
    Execution,
}

/// Errors raised by the flow engine itself.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("invalid node data for `{node}`: {reason}")]
    InvalidNodeData { node: String, reason: String },

    #[error("duplicate node id `{0}`")]
    DuplicateNodeId(String),

    #[error("no implementation registered for node type `{0}`")]
    UnknownNodeType(String),

    #[error("no nodes in flow")]
    EmptyFlow,

    #[error("no start node: name exactly one node `startFunction`")]
    NoStartNode,

    #[error("ambiguous start node: {0:?} are all named `startFunction`")]
    AmbiguousStart(Vec<String>),

    #[error("edge `{from}` -> `{to}` references missing node `{missing}`")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("node `{0}` not found")]
    NodeNotFound(String),

    #[error("node `{node}` failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("node `{node}` timed out after {after:?}")]
    NodeTimeout { node: String, after: Duration },

    #[error("loop control node `{0}` reported neither success nor failure")]
    UnresolvedLoopBranch(String),

    #[error("activation budget exceeded after {0} node executions")]
    BudgetExceeded(usize),

    #[error("run exceeded its time budget of {0:?}")]
    Timeout(Duration),

    #[error("run cancelled")]
    Cancelled,
}

impl FlowError {
    pub fn phase(&self) -> Phase {
        match self {
            FlowError::InvalidNode(_)
            | FlowError::InvalidNodeData { .. }
            | FlowError::DuplicateNodeId(_)
            | FlowError::UnknownNodeType(_)
            | FlowError::EmptyFlow
            | FlowError::NoStartNode
            | FlowError::AmbiguousStart(_)
            | FlowError::DanglingEdge { .. } => Phase::Validation,
            FlowError::NodeNotFound(_)
            | FlowError::NodeFailed { .. }
            | FlowError::NodeTimeout { .. }
            | FlowError::UnresolvedLoopBranch(_)
            | FlowError::BudgetExceeded(_)
            | FlowError::Timeout(_)
            | FlowError::Cancelled => Phase::Execution,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.phase() == Phase::Validation
    }
}

/// What the caller of a run sees. The message text tells validation
/// failures apart from execution failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("error validating/adding node `{node}`: {source}")]
    InvalidNode {
        node: String,
        #[source]
        source: FlowError,
    },

    #[error("flow validation failed: {0}")]
    Invalid(#[source] FlowError),

    #[error("flow execution failed: {0}")]
    Execution(#[source] FlowError),
}

impl RunError {
    pub fn node(node: impl Into<String>, source: FlowError) -> Self {
        RunError::InvalidNode {
            node: node.into(),
            source,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            RunError::InvalidNode { .. } | RunError::Invalid(_) => Phase::Validation,
            RunError::Execution(_) => Phase::Execution,
        }
    }

    pub fn flow_error(&self) -> &FlowError {
        match self {
            RunError::InvalidNode { source, .. } => source,
            RunError::Invalid(err) | RunError::Execution(err) => err,
        }
    }
}

impl From<FlowError> for RunError {
    fn from(err: FlowError) -> Self {
        match err.phase() {
            Phase::Validation => RunError::Invalid(err),
            Phase::Execution => RunError::Execution(err),
        }
    }
}
