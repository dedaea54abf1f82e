//! ledger.rs
//! Write-once value slots for Field nodes, indexed by `NodeId`.

use crate::error::ComputationError;
use crate::graph::NodeId;

pub type FieldValue = Result<f64, ComputationError>;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    // Dense storage of Results of Values
    values: Vec<Option<FieldValue>>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(size: usize) -> Self {
        Self { values: vec![None; size] }
    }

    #[inline(always)]
    pub fn get(&self, node_id: NodeId) -> Option<&FieldValue> {
        self.values.get(node_id.index())?.as_ref()
    }

    /// The value, if the node finished successfully.
    #[inline(always)]
    pub fn value(&self, node_id: NodeId) -> Option<f64> {
        match self.get(node_id) {
            Some(Ok(v)) => Some(*v),
            _ => None,
        }
    }

    /// Writes a slot exactly once. A second write leaves the first result in
    /// place and reports `AlreadyWritten`.
    pub fn insert(&mut self, node_id: NodeId, value: FieldValue) -> Result<(), ComputationError> {
        let idx = node_id.index();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, None);
        }
        let slot = &mut self.values[idx];
        if slot.is_some() {
            return Err(ComputationError::AlreadyWritten);
        }
        *slot = Some(value);
        Ok(())
    }

    /// Moves every written slot of `other` into `self`. Slots are disjoint
    /// when ledgers come from different plan components.
    pub fn absorb(&mut self, other: Ledger) -> Result<(), ComputationError> {
        for (idx, slot) in other.values.into_iter().enumerate() {
            if let Some(value) = slot {
                self.insert(NodeId::new(idx), value)?;
            }
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_write_once() {
        let mut ledger = Ledger::new();
        let id = NodeId::new(3);
        ledger.insert(id, Ok(2.5)).unwrap();
        assert_eq!(ledger.insert(id, Ok(9.0)), Err(ComputationError::AlreadyWritten));
        assert_eq!(ledger.value(id), Some(2.5));
        assert!(ledger.get(NodeId::new(0)).is_none());
    }

    #[test]
    fn test_absorb_merges_disjoint_ledgers() {
        let mut a = Ledger::new();
        a.insert(NodeId::new(0), Ok(1.0)).unwrap();
        let mut b = Ledger::new();
        b.insert(NodeId::new(2), Err(ComputationError::MissingInput("x".into()))).unwrap();
        a.absorb(b).unwrap();
        assert_eq!(a.written(), 2);
        assert_eq!(a.value(NodeId::new(2)), None);
    }
}
