//! Defines `PlanNode`, one step of the execution plan.

use crate::store::{Hemisphere, IntervalKey, Key, StructureId};
use petgraph::graph::NodeIndex;
use std::cmp::Ordering;
use std::fmt;

/// A unique, stable identifier for a node within the dependency graph.
///
/// This is a type alias for `petgraph::graph::NodeIndex` to abstract the
/// underlying graph implementation.
pub type NodeId = NodeIndex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanNode {
    /// Read one structure's voxel window from one channel.
    Load(IntervalKey),
    /// Leaf Field: computed from voxel windows and dependency values.
    Calculate(Key),
    /// Non-leaf Field: combined from requested children.
    Propagate(Key),
}

impl PlanNode {
    /// The Field key, for Field nodes.
    pub fn key(&self) -> Option<&Key> {
        match self {
            PlanNode::Load(_) => None,
            PlanNode::Calculate(k) | PlanNode::Propagate(k) => Some(k),
        }
    }

    pub fn interval(&self) -> Option<&IntervalKey> {
        match self {
            PlanNode::Load(i) => Some(i),
            _ => None,
        }
    }

    pub fn structure_id(&self) -> StructureId {
        match self {
            PlanNode::Load(i) => i.structure_id,
            PlanNode::Calculate(k) | PlanNode::Propagate(k) => k.structure_id,
        }
    }

    pub fn hemisphere(&self) -> Hemisphere {
        match self {
            PlanNode::Load(i) => i.hemisphere,
            PlanNode::Calculate(k) | PlanNode::Propagate(k) => k.hemisphere,
        }
    }

    pub fn is_field(&self) -> bool { !matches!(self, PlanNode::Load(_)) }

    /// Scheduling tie-break: structure, hemisphere, loads before fields,
    /// injection, field name (channel name for loads).
    fn order_key(&self) -> (StructureId, Hemisphere, u8, bool, &str, u8) {
        match self {
            PlanNode::Load(i) => (i.structure_id, i.hemisphere, 0, false, i.channel, 0),
            PlanNode::Calculate(k) => (k.structure_id, k.hemisphere, 1, k.injection, &k.field_name, 0),
            PlanNode::Propagate(k) => (k.structure_id, k.hemisphere, 1, k.injection, &k.field_name, 1),
        }
    }
}

impl Ord for PlanNode {
    fn cmp(&self, other: &Self) -> Ordering { self.order_key().cmp(&other.order_key()) }
}

impl PartialOrd for PlanNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanNode::Load(i) => write!(f, "load {}", i),
            PlanNode::Calculate(k) => write!(f, "calculate {}", k),
            PlanNode::Propagate(k) => write!(f, "propagate {}", k),
        }
    }
}

