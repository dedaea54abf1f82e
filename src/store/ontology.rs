//! ontology.rs
//! Immutable structure tree. Built once per run, shared read-only.

use super::types::StructureId;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    /// `None` for roots.
    #[serde(rename = "parent_structure_id", alias = "parent_id")]
    pub parent_id: Option<StructureId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub acronym: String,
}

impl Structure {
    pub fn new(id: StructureId, parent_id: Option<StructureId>, name: &str, acronym: &str) -> Self {
        Self { id, parent_id, name: name.to_string(), acronym: acronym.to_string() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ontology {
    // Columnar, sorted by id
    structures: Vec<Structure>,
    children: Vec<Vec<StructureId>>,
    index: HashMap<StructureId, usize>,
    roots: Vec<StructureId>,
}

impl Ontology {
    /// Validates and indexes a structure list.
    ///
    /// Rejects duplicate ids, parents that are not in the list, and parent
    /// chains that never reach a root.
    pub fn new(mut structures: Vec<Structure>) -> Result<Self, ConfigurationError> {
        structures.sort_by_key(|s| s.id);

        let mut index = HashMap::with_capacity(structures.len());
        for (i, s) in structures.iter().enumerate() {
            if index.insert(s.id, i).is_some() {
                return Err(ConfigurationError::DuplicateStructure(s.id));
            }
        }

        let mut children = vec![Vec::new(); structures.len()];
        let mut roots = Vec::new();
        for s in &structures {
            match s.parent_id {
                None => roots.push(s.id),
                Some(parent_id) => {
                    let p_idx = *index.get(&parent_id).ok_or(ConfigurationError::DanglingParent {
                        structure_id: s.id,
                        parent_id,
                    })?;
                    children[p_idx].push(s.id);
                }
            }
        }
        // Ids were visited in ascending order, so child lists are already sorted.

        let ontology = Self { structures, children, index, roots };
        ontology.check_acyclic()?;
        Ok(ontology)
    }

    /// Every structure must be reachable from a root; the rest sit on a cycle.
    fn check_acyclic(&self) -> Result<(), ConfigurationError> {
        let mut reached = vec![false; self.structures.len()];
        let mut queue: VecDeque<StructureId> = self.roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let idx = self.index[&id];
            if reached[idx] {
                continue;
            }
            reached[idx] = true;
            queue.extend(self.children[idx].iter().copied());
        }
        match reached.iter().position(|r| !r) {
            Some(idx) => Err(ConfigurationError::OntologyCycle(self.structures[idx].id)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize { self.structures.len() }
    pub fn is_empty(&self) -> bool { self.structures.is_empty() }
    pub fn contains(&self, id: StructureId) -> bool { self.index.contains_key(&id) }
    pub fn roots(&self) -> &[StructureId] { &self.roots }

    pub fn get(&self, id: StructureId) -> Option<&Structure> {
        self.index.get(&id).map(|&i| &self.structures[i])
    }

    pub fn parent(&self, id: StructureId) -> Option<StructureId> {
        self.get(id).and_then(|s| s.parent_id)
    }

    pub fn children(&self, id: StructureId) -> &[StructureId] {
        match self.index.get(&id) {
            Some(&i) => &self.children[i],
            None => &[],
        }
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = StructureId> + '_ {
        self.structures.iter().map(|s| s.id)
    }

    /// All structures below `id`, pre-order, excluding `id`.
    pub fn descendants(&self, id: StructureId) -> Vec<StructureId> {
        let mut out = Vec::new();
        let mut stack: Vec<StructureId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Ontological children of `id` that are in the requested set. An empty
    /// result makes `id` a leaf for that request.
    pub fn requested_children(&self, id: StructureId, requested: &BTreeSet<StructureId>) -> Vec<StructureId> {
        self.children(id).iter().copied().filter(|c| requested.contains(c)).collect()
    }
}
