use crate::error::ConfigurationError;
use crate::graph::{Edge, NodeId, PlanNode};
use petgraph::graph::DiGraph;
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

type PlanGraph = DiGraph<PlanNode, Edge>;

/// Produces the execution order: every node after all of its inputs.
///
/// Cycles are rejected first by a DFS coloring walk so the error can name
/// the Keys on the cycle. The order itself comes from Kahn's algorithm with a
/// min-heap on `PlanNode`'s ordering, so independent nodes always come out
/// in the same sequence for the same input.
pub fn sort(graph: &PlanGraph) -> Result<Vec<NodeId>, ConfigurationError> {
    check_acyclic(graph)?;

    let count = graph.node_count();
    let mut in_degree = vec![0usize; count];
    let mut heap = BinaryHeap::with_capacity(count);
    let mut order = Vec::with_capacity(count);

    // 1. Initialize In-Degrees O(N + E)
    for node in graph.node_indices() {
        let deg = graph.edges_directed(node, Direction::Incoming).count();
        in_degree[node.index()] = deg;
        if deg == 0 {
            heap.push(Reverse((&graph[node], node)));
        }
    }

    // 2. Always release the smallest ready node
    while let Some(Reverse((_, node))) = heap.pop() {
        order.push(node);
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let target = edge.target();
            // Parallel edges each count once in in_degree, so decrement per edge.
            in_degree[target.index()] -= 1;
            if in_degree[target.index()] == 0 {
                heap.push(Reverse((&graph[target], target)));
            }
        }
    }

    debug_assert_eq!(order.len(), count, "acyclic graph must fully drain");
    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

/// DFS coloring walk over the whole graph. On a back edge, reports the
/// nodes on the cycle in path order, first node repeated at the end.
pub fn check_acyclic(graph: &PlanGraph) -> Result<(), ConfigurationError> {
    let mut state = vec![VisitState::None; graph.node_count()];
    let mut stack = Vec::new();

    let mut starts: Vec<NodeId> = graph.node_indices().collect();
    starts.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

    for start in starts {
        if state[start.index()] == VisitState::None {
            if let Err(cycle) = visit(start, graph, &mut state, &mut stack) {
                return Err(ConfigurationError::DependencyCycle {
                    keys: cycle.iter().map(|&n| graph[n].to_string()).collect(),
                });
            }
        }
    }
    Ok(())
}

fn visit(
    node: NodeId,
    graph: &PlanGraph,
    state: &mut Vec<VisitState>,
    stack: &mut Vec<NodeId>,
) -> Result<(), Vec<NodeId>> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    stack.push(node);
    let mut next: Vec<NodeId> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    for child in next {
        visit(child, graph, state, stack)?;
    }
    stack.pop();

    state[idx] = VisitState::Visited;
    Ok(())
}

/// Splits an execution order into weakly connected components, each keeping
/// the relative order of `order`. Components share no edges, so they can run
/// on separate workers.
pub fn components(graph: &PlanGraph, order: &[NodeId]) -> Vec<Vec<NodeId>> {
    let mut uf = UnionFind::new(graph.node_count());
    for edge in graph.edge_references() {
        uf.union(edge.source().index(), edge.target().index());
    }

    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<NodeId>> = Vec::new();
    for &node in order {
        let root = uf.find(node.index());
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(node);
    }
    groups
}
