//! Fan-out planner.
//!
//! Before a graph runs, the planner distributes a total concurrency budget
//! across the For nodes. The cost of the graph is an algebraic expression
//! over each For's fan-out:
//!
//! * a leaf (Value, Var) costs 1,
//! * a For costs `fanout × cost(body) + 1`,
//! * any other node costs the sum of its dependencies plus 1.
//!
//! Starting from fan-out 1 everywhere, fan-outs grow one step at a time in
//! round-robin order (outermost For first); an increment that would bring
//! the total cost to or above the budget is rolled back and that For is
//! capped. The loop ends when every For is capped.

use crate::node::{ForNode, Node, NodeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Every For node reachable from `root`, in breadth-first discovery order.
fn collect_for_nodes(root: &Arc<dyn Node>) -> Vec<Arc<dyn Node>> {
    let mut fors = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(root.clone());
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node.id()) {
            continue;
        }
        if node.as_any().is::<ForNode>() {
            fors.push(node.clone());
        }
        for dep in node.dependencies() {
            queue.push_back(dep);
        }
    }
    fors
}

fn cost(node: &Arc<dyn Node>, fanouts: &HashMap<NodeId, u64>) -> u64 {
    if let Some(for_node) = node.as_any().downcast_ref::<ForNode>() {
        let fanout = fanouts.get(&node.id()).copied().unwrap_or(1);
        fanout * cost(&for_node.body(), fanouts) + 1
    } else {
        node.dependencies()
            .iter()
            .map(|dep| cost(dep, fanouts))
            .sum::<u64>()
            + 1
    }
}

/// Distributes `max_concurrent` across the For nodes reachable from
/// `root`, installs the per-For fan-outs and returns them. Every fan-out
/// is at least 1 regardless of the budget.
pub fn set_nodes_fan_out(root: &Arc<dyn Node>, max_concurrent: i64) -> HashMap<NodeId, usize> {
    let fors = collect_for_nodes(root);
    let mut fanouts: HashMap<NodeId, u64> = fors.iter().map(|f| (f.id(), 1)).collect();
    let budget = max_concurrent.max(0) as u64;

    let mut capped: HashSet<NodeId> = HashSet::new();
    while capped.len() < fors.len() {
        for f in &fors {
            let id = f.id();
            if capped.contains(&id) {
                continue;
            }
            *fanouts.get_mut(&id).expect("fanout entry") += 1;
            if cost(root, &fanouts) >= budget {
                *fanouts.get_mut(&id).expect("fanout entry") -= 1;
                capped.insert(id);
            }
        }
    }

    let result: HashMap<NodeId, usize> = fanouts
        .into_iter()
        .map(|(id, f)| (id, f as usize))
        .collect();
    for f in &fors {
        let for_node = f.as_any().downcast_ref::<ForNode>().expect("for node");
        for_node.set_fanout(result[&f.id()]);
        tracing::debug!(id = f.id(), fanout = result[&f.id()], "installed fan-out");
    }
    result
}
