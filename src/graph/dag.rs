//! dag.rs
//! Builds the dependency graph over Field and interval-load nodes.
//!
//! The graph is built once per request and consumed read-only afterwards.

use super::edge::Edge;
use super::node::{NodeId, PlanNode};
use crate::analysis::topology;
use crate::error::ConfigurationError;
use crate::fields::FieldRegistry;
use crate::store::{Hemisphere, IntervalKey, Key, Ontology, StructureId};
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub(crate) graph: DiGraph<PlanNode, Edge>,
    fields: HashMap<Key, NodeId>,
    loads: HashMap<IntervalKey, NodeId>,
}

impl DependencyGraph {
    /// Instantiates one Field per (structure, hemisphere, injection, name)
    /// and, transitively, every Field those declare through
    /// `required_fields`.
    ///
    /// Leaf structures (no requested children) get a `Calculate` node wired
    /// to one `Load` node per required channel. Other structures get a
    /// `Propagate` node wired to the same field at each requested child.
    pub fn build(
        registry: &FieldRegistry,
        ontology: &Ontology,
        field_names: &[String],
        structures: &BTreeSet<StructureId>,
        hemispheres: &[Hemisphere],
    ) -> Result<Self, ConfigurationError> {
        // Unknown names fail before anything else happens.
        for name in field_names {
            registry.get(name)?;
        }
        for &sid in structures {
            if !ontology.contains(sid) {
                return Err(ConfigurationError::UnknownStructure(sid));
            }
        }

        let mut builder = Builder {
            registry,
            ontology,
            structures,
            dag: DependencyGraph::default(),
            pending: VecDeque::new(),
        };

        let mut hemis = hemispheres.to_vec();
        hemis.sort();
        hemis.dedup();
        let mut names: Vec<&String> = field_names.iter().collect();
        names.sort();
        names.dedup();

        for &sid in structures {
            for &hemi in &hemis {
                for injection in [true, false] {
                    for name in &names {
                        builder.ensure_field(Key::new(sid, hemi, injection, name.as_str()))?;
                    }
                }
            }
        }

        while let Some(key) = builder.pending.pop_front() {
            builder.wire(key)?;
        }

        let dag = builder.dag;
        info!(
            fields = dag.fields.len(),
            loads = dag.loads.len(),
            edges = dag.graph.edge_count(),
            "dependency graph built"
        );
        Ok(dag)
    }

    pub fn node_count(&self) -> usize { self.graph.node_count() }
    pub fn edge_count(&self) -> usize { self.graph.edge_count() }
    pub fn field_count(&self) -> usize { self.fields.len() }
    pub fn load_count(&self) -> usize { self.loads.len() }

    pub fn node(&self, id: NodeId) -> &PlanNode { &self.graph[id] }

    pub fn field_node(&self, key: &Key) -> Option<NodeId> { self.fields.get(key).copied() }

    pub fn load_node(&self, key: &IntervalKey) -> Option<NodeId> { self.loads.get(key).copied() }

    /// All Field nodes, in key order.
    pub fn field_nodes(&self) -> Vec<(&Key, NodeId)> {
        let mut out: Vec<_> = self.fields.iter().map(|(k, &id)| (k, id)).collect();
        out.sort();
        out
    }

    /// Nodes consuming `id`'s output.
    pub fn consumers(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.neighbors_directed(id, Direction::Outgoing)
    }

    /// Inputs of `id` with the edge kind, sorted by the producing node.
    pub fn inputs(&self, id: NodeId) -> Vec<(NodeId, &Edge)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect();
        out.sort_by(|a, b| self.graph[a.0].cmp(&self.graph[b.0]));
        out
    }

    /// Cycle check plus deterministic topological order.
    pub fn plan(self) -> Result<ExecutionPlan, ConfigurationError> {
        let order = topology::sort(&self.graph)?;
        debug!(steps = order.len(), "execution order resolved");
        Ok(ExecutionPlan { graph: self, order })
    }
}

struct Builder<'a> {
    registry: &'a FieldRegistry,
    ontology: &'a Ontology,
    structures: &'a BTreeSet<StructureId>,
    dag: DependencyGraph,
    pending: VecDeque<Key>,
}

impl Builder<'_> {
    fn ensure_field(&mut self, key: Key) -> Result<NodeId, ConfigurationError> {
        if let Some(&id) = self.dag.fields.get(&key) {
            return Ok(id);
        }
        if !self.ontology.contains(key.structure_id) {
            return Err(ConfigurationError::UnknownStructure(key.structure_id));
        }
        self.registry.get(&key.field_name)?;

        let node = if self.children_of(key.structure_id).is_empty() {
            PlanNode::Calculate(key.clone())
        } else {
            PlanNode::Propagate(key.clone())
        };
        let id = self.dag.graph.add_node(node);
        self.dag.fields.insert(key.clone(), id);
        self.pending.push_back(key);
        Ok(id)
    }

    fn ensure_load(&mut self, key: IntervalKey) -> NodeId {
        if let Some(&id) = self.dag.loads.get(&key) {
            return id;
        }
        let id = self.dag.graph.add_node(PlanNode::Load(key));
        self.dag.loads.insert(key, id);
        id
    }

    fn children_of(&self, sid: StructureId) -> Vec<StructureId> {
        self.ontology.requested_children(sid, self.structures)
    }

    /// Adds the incoming edges of one Field node.
    fn wire(&mut self, key: Key) -> Result<(), ConfigurationError> {
        let id = self.dag.fields[&key];
        let contract = self.registry.get(&key.field_name)?.clone();

        for (role, dep) in contract.required_fields(&key) {
            let dep_id = self.ensure_field(dep)?;
            self.dag.graph.add_edge(dep_id, id, Edge::Dependency(role));
        }

        let children = self.children_of(key.structure_id);
        if children.is_empty() {
            for channel in contract.required_intervals(&key) {
                let load = self.ensure_load(IntervalKey {
                    structure_id: key.structure_id,
                    hemisphere: key.hemisphere,
                    channel,
                });
                self.dag.graph.add_edge(load, id, Edge::Interval);
            }
        } else {
            for child in children {
                let child_id = self.ensure_field(key.at_structure(child))?;
                self.dag.graph.add_edge(child_id, id, Edge::Child);
            }
        }
        Ok(())
    }
}

/// A dependency graph together with its execution order. This is what
/// `explain` hands back: it can be inspected without touching any data.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub graph: DependencyGraph,
    pub order: Vec<NodeId>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> impl Iterator<Item = &PlanNode> + '_ {
        self.order.iter().map(move |&id| self.graph.node(id))
    }

    /// Position of each node in the order.
    pub fn positions(&self) -> HashMap<NodeId, usize> {
        self.order.iter().enumerate().map(|(i, &id)| (id, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Structure;

    fn ontology() -> Ontology {
        Ontology::new(vec![
            Structure::new(1, None, "root", "R"),
            Structure::new(2, Some(1), "left leaf", "L1"),
            Structure::new(3, Some(1), "right leaf", "L2"),
        ])
        .unwrap()
    }

    fn build(names: &[&str], structures: &[StructureId]) -> Result<DependencyGraph, ConfigurationError> {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let set: BTreeSet<_> = structures.iter().copied().collect();
        DependencyGraph::build(FieldRegistry::builtin(), &ontology(), &names, &set, &[Hemisphere::Left])
    }

    #[test]
    fn test_leaves_calculate_and_parents_propagate() {
        let dag = build(&["sum_pixels"], &[1, 2, 3]).unwrap();
        assert_eq!(dag.field_count(), 6);
        let root = dag.field_node(&Key::new(1, Hemisphere::Left, true, "sum_pixels")).unwrap();
        assert!(matches!(dag.node(root), PlanNode::Propagate(_)));
        let children: Vec<_> = dag.inputs(root).into_iter().filter(|(_, e)| **e == Edge::Child).collect();
        assert_eq!(children.len(), 2);

        let leaf = dag.field_node(&Key::new(2, Hemisphere::Left, false, "sum_pixels")).unwrap();
        assert!(matches!(dag.node(leaf), PlanNode::Calculate(_)));
        // three channels for non-injection, plus the injection-side field
        assert_eq!(dag.inputs(leaf).len(), 4);
        // sum_pixels, injection_fraction, aav_exclusion_fraction per leaf
        assert_eq!(dag.load_count(), 6);
    }

    #[test]
    fn test_restricted_set_turns_parent_into_leaf() {
        let dag = build(&["sum_pixels"], &[1, 3]).unwrap();
        let root = dag.field_node(&Key::new(1, Hemisphere::Left, true, "sum_pixels")).unwrap();
        assert!(matches!(dag.node(root), PlanNode::Propagate(_)));

        let dag = build(&["sum_pixels"], &[1]).unwrap();
        let root = dag.field_node(&Key::new(1, Hemisphere::Left, true, "sum_pixels")).unwrap();
        assert!(matches!(dag.node(root), PlanNode::Calculate(_)));
        assert!(dag.field_node(&Key::new(2, Hemisphere::Left, true, "sum_pixels")).is_none());
    }

    #[test]
    fn test_density_pulls_in_sum_fields() {
        let dag = build(&["projection_density"], &[1, 2, 3]).unwrap();
        // 3 field names x 3 structures x 2 injection states
        assert_eq!(dag.field_count(), 18);
        let density_root = dag.field_node(&Key::new(1, Hemisphere::Left, false, "projection_density")).unwrap();
        let roles: Vec<_> = dag
            .inputs(density_root)
            .into_iter()
            .filter_map(|(_, e)| match e {
                Edge::Dependency(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(roles.len(), 2);
    }

    #[test]
    fn test_unknown_field_or_structure_is_rejected() {
        assert!(matches!(build(&["volume"], &[1]), Err(ConfigurationError::UnknownField(_))));
        assert!(matches!(build(&["sum_pixels"], &[42]), Err(ConfigurationError::UnknownStructure(42))));
    }

    #[test]
    fn test_plan_orders_children_before_parent() {
        let plan = build(&["sum_pixels"], &[1, 2, 3]).unwrap().plan().unwrap();
        let pos = |sid, inj| {
            let key = Key::new(sid, Hemisphere::Left, inj, "sum_pixels");
            let id = plan.graph.field_node(&key).unwrap();
            plan.order.iter().position(|&x| x == id).unwrap()
        };
        assert!(pos(2, true) < pos(1, true));
        assert!(pos(3, false) < pos(1, false));
        assert!(pos(2, true) < pos(2, false));
        assert_eq!(plan.order.len(), plan.graph.node_count());
    }
}
