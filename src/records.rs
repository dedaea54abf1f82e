//! records.rs
//! Flattens finished Fields into unionize records.

use crate::compute::Ledger;
use crate::error::{ComputationError, IncompleteResult, MissingField, UnionizeError};
use crate::graph::DependencyGraph;
use crate::store::{Hemisphere, Key, StructureId};
use serde::{Deserialize, Serialize};

/// One output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionizeRecord {
    pub image_series_id: i64,
    pub structure_id: StructureId,
    pub hemisphere_id: Hemisphere,
    pub injection: bool,
    pub field_name: String,
    pub value: f64,
}

impl UnionizeRecord {
    pub fn key(&self) -> Key {
        Key::new(self.structure_id, self.hemisphere_id, self.injection, self.field_name.as_str())
    }
}

/// Emits one record per Field node, in key order.
///
/// Every Field without a value is listed with its reason; if there is any,
/// the records that could be produced travel inside
/// `UnionizeError::Incomplete`.
pub fn assemble(graph: &DependencyGraph, ledger: &Ledger, image_series_id: i64) -> Result<Vec<UnionizeRecord>, UnionizeError> {
    let mut records = Vec::with_capacity(graph.field_count());
    let mut missing = Vec::new();

    for (key, node) in graph.field_nodes() {
        match ledger.get(node) {
            Some(Ok(value)) => records.push(UnionizeRecord {
                image_series_id,
                structure_id: key.structure_id,
                hemisphere_id: key.hemisphere,
                injection: key.injection,
                field_name: key.field_name.clone(),
                value: *value,
            }),
            Some(Err(reason)) => missing.push(MissingField { key: key.clone(), reason: reason.clone() }),
            None => missing.push(MissingField {
                key: key.clone(),
                reason: ComputationError::Upstream { dependency: key.to_string(), reason: "never executed".to_string() },
            }),
        }
    }

    if missing.is_empty() {
        Ok(records)
    } else {
        Err(UnionizeError::Incomplete(Box::new(IncompleteResult { records, missing })))
    }
}

/// The job's output document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnionizeOutput {
    pub unionizes: Vec<UnionizeRecord>,
}

impl UnionizeOutput {
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
