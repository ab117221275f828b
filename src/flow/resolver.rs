//! Picks the node(s) that run after a given node.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    error::FlowError,
    flow::{
        graph::{FlowEdge, FlowGraph, FlowNode},
        initializer::truthy,
    },
    node::NodeRole,
};

pub const OUTPUT_HANDLE: &str = "output";
pub const SUCCESS_HANDLE: &str = "success";
pub const FAILURE_HANDLE: &str = "failure";

/// What to do when a loop control node reports neither `success` nor `failure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopBranchPolicy {
    /// Log a warning and follow every outgoing edge.
    #[default]
    FollowAll,
    /// Abort the run.
    Fail,
}

/// Branch reported by a loop control node's latest result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBranch {
    Success,
    Failure,
}

impl LoopBranch {
    /// `failure` is checked first, so a result claiming both keeps looping.
    pub fn from_result(result: Option<&Value>) -> Option<Self> {
        let flag = |key: &str| result.and_then(|r| r.get(key)).is_some_and(truthy);
        if flag(FAILURE_HANDLE) {
            Some(LoopBranch::Failure)
        } else if flag(SUCCESS_HANDLE) {
            Some(LoopBranch::Success)
        } else {
            None
        }
    }

    fn handle(self) -> &'static str {
        match self {
            LoopBranch::Success => SUCCESS_HANDLE,
            LoopBranch::Failure => FAILURE_HANDLE,
        }
    }
}

enum Selection<'g> {
    Edges(Vec<&'g FlowEdge>),
    All,
    Unresolved,
}

fn select<'g>(graph: &'g FlowGraph, node: &'g FlowNode, latest: Option<&Value>) -> Selection<'g> {
    match node.role {
        NodeRole::LoopEntry => Selection::Edges(
            graph
                .outgoing(&node.id)
                .filter(|edge| {
                    edge.source_handle
                        .as_deref()
                        .is_none_or(|handle| handle.contains(OUTPUT_HANDLE))
                })
                .collect(),
        ),
        NodeRole::LoopControl => match LoopBranch::from_result(latest) {
            Some(branch) => Selection::Edges(
                graph
                    .outgoing(&node.id)
                    .filter(|edge| edge.source_handle_contains(branch.handle()))
                    .collect(),
            ),
            None => Selection::Unresolved,
        },
        NodeRole::Standard | NodeRole::Composite => Selection::All,
    }
}

fn lookup<'g>(graph: &'g FlowGraph, from: &str, target: &str) -> Result<&'g FlowNode, FlowError> {
    graph.node(target).ok_or_else(|| FlowError::DanglingEdge {
        from: from.to_string(),
        to: target.to_string(),
        missing: target.to_string(),
    })
}

fn all_successors<'g>(graph: &'g FlowGraph, node_id: &str) -> Result<Vec<&'g FlowNode>, FlowError> {
    graph
        .connections(node_id)
        .iter()
        .map(|target| lookup(graph, node_id, target))
        .collect()
}

fn resolve<'g>(
    graph: &'g FlowGraph,
    node_id: &str,
    latest: Option<&Value>,
    policy: LoopBranchPolicy,
    quiet: bool,
) -> Result<Vec<&'g FlowNode>, FlowError> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;

    match select(graph, node, latest) {
        Selection::Edges(edges) => edges
            .into_iter()
            .map(|edge| lookup(graph, node_id, &edge.target))
            .collect(),
        Selection::All => all_successors(graph, node_id),
        Selection::Unresolved => match policy {
            LoopBranchPolicy::Fail => Err(FlowError::UnresolvedLoopBranch(node.name.clone())),
            LoopBranchPolicy::FollowAll => {
                if !quiet {
                    warn!(
                        node_id = %node.id,
                        node = %node.name,
                        "loop control node reported neither success nor failure, following every edge"
                    );
                }
                all_successors(graph, node_id)
            }
        },
    }
}

/// Successors of `node_id`, given that node's latest result.
pub fn resolve_successors<'g>(
    graph: &'g FlowGraph,
    node_id: &str,
    latest: Option<&Value>,
    policy: LoopBranchPolicy,
) -> Result<Vec<&'g FlowNode>, FlowError> {
    resolve(graph, node_id, latest, policy, false)
}

/// Same as [`resolve_successors`] but never fails on an unresolved loop
/// branch; used while walking loop membership.
pub(crate) fn reachable_successors<'g>(
    graph: &'g FlowGraph,
    node_id: &str,
    latest: Option<&Value>,
) -> Result<Vec<&'g FlowNode>, FlowError> {
    resolve(graph, node_id, latest, LoopBranchPolicy::FollowAll, true)
}
