use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::trace;

use crate::{
    error::FlowError,
    flow::{graph::FlowGraph, resolver::reachable_successors},
    node::NodeRole,
};

/// Recompute the set of nodes inside the loop that starts at `entry_id`.
///
/// The set is cleared and rebuilt from scratch. Every node reachable from the
/// entry is a member up to and including the first loop control node on each
/// path; nothing past a loop control node is marked.
pub fn mark_loop_members(
    graph: &FlowGraph,
    entry_id: &str,
    results: &HashMap<String, Value>,
    in_loop: &mut HashSet<String>,
) -> Result<(), FlowError> {
    in_loop.clear();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![entry_id];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        in_loop.insert(node.id.clone());
        if node.role == NodeRole::LoopControl {
            continue;
        }

        let next = reachable_successors(graph, &node.id, results.get(&node.id))?;
        // reversed so the walk visits successors in edge order
        for successor in next.into_iter().rev() {
            if !visited.contains(successor.id.as_str()) {
                stack.push(successor.id.as_str());
            }
        }
    }

    trace!(entry = entry_id, members = in_loop.len(), "marked loop members");
    Ok(())
}
