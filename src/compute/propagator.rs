//! propagator.rs
//! Bottom-up combination of child Field values.
//!
//! A `Propagate` node only becomes ready once every requested child holds a
//! result for the same (hemisphere, injection, field name), which the plan's
//! `Child` edges guarantee. Children are combined by the field type's own
//! rule; ratio fields re-derive from propagated sums instead of averaging.

use super::engine::collect_dependencies;
use super::ledger::{FieldValue, Ledger};
use crate::error::ComputationError;
use crate::fields::{FieldContract, FieldInputs};
use crate::graph::{DependencyGraph, Edge, NodeId};
use crate::store::{Key, VoxelRange};

/// Values of the same field at each requested child, in structure order.
/// Fails with the first child that has no value.
pub fn child_values(graph: &DependencyGraph, ledger: &Ledger, node: NodeId) -> Result<Vec<f64>, ComputationError> {
    let mut values = Vec::new();
    for (child, edge) in graph.inputs(node) {
        if *edge != Edge::Child {
            continue;
        }
        values.push(settled(graph, ledger, child)?);
    }
    Ok(values)
}

/// Result of a finished Field node, or an `Upstream` error naming it.
pub(crate) fn settled(graph: &DependencyGraph, ledger: &Ledger, node: NodeId) -> Result<f64, ComputationError> {
    match ledger.get(node) {
        Some(Ok(v)) => Ok(*v),
        Some(Err(e)) => Err(ComputationError::Upstream {
            dependency: graph.node(node).to_string(),
            reason: e.to_string(),
        }),
        None => Err(ComputationError::Upstream {
            dependency: graph.node(node).to_string(),
            reason: "not computed".to_string(),
        }),
    }
}

pub fn propagate_node(
    graph: &DependencyGraph,
    ledger: &Ledger,
    contract: &dyn FieldContract,
    node: NodeId,
    key: &Key,
) -> FieldValue {
    let children = child_values(graph, ledger, node)?;
    let mut inputs = FieldInputs::new(VoxelRange::default());
    collect_dependencies(graph, ledger, node, &mut inputs)?;
    contract.propagate(key, &children, &inputs)
}
