//! error.rs
//! Error taxonomy: configuration errors (fatal, before any load), per-Field
//! computation errors (stored in the ledger), and top-level run failures.

use crate::records::UnionizeRecord;
use crate::store::{Channel, Key, StructureId, VoxelRange};
use std::fmt;
use thiserror::Error;

/// Fatal problems detected before any data is touched.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown field type '{0}'")]
    UnknownField(String),
    #[error("Cyclic field dependencies: {}", .keys.join(" -> "))]
    DependencyCycle { keys: Vec<String> },
    #[error("Structure {structure_id} references missing parent {parent_id}")]
    DanglingParent { structure_id: StructureId, parent_id: StructureId },
    #[error("Structure {0} is defined more than once")]
    DuplicateStructure(StructureId),
    #[error("Structure ontology contains a cycle through structure {0}")]
    OntologyCycle(StructureId),
    #[error("Requested structure {0} is not in the ontology")]
    UnknownStructure(StructureId),
    #[error("Unknown hemisphere id {0}")]
    UnknownHemisphere(i64),
    #[error("No data handle for required channel '{0}'")]
    MissingChannel(String),
    #[error("Invalid unionize input:\n{}", .0.join("\n"))]
    InvalidInput(Vec<String>),
    #[error("Failed to read job file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse job file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single Field. Stored in the ledger in place of a value;
/// it removes the Field and its dependents from the result, nothing else.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Channel '{channel}' range {range} exceeds channel length {len}")]
    OutOfBounds { channel: Channel, range: VoxelRange, len: usize },
    #[error("Channel '{channel}' range {range} overlaps structure {other}")]
    Overlap { channel: Channel, range: VoxelRange, other: StructureId },
    #[error("No interval for structure {structure_id} in channel '{channel}'")]
    MissingInterval { structure_id: StructureId, channel: Channel },
    #[error("Channel '{channel}' window for {key} has {got} values, other channels have {expected}")]
    RangeMismatch { key: Key, channel: Channel, expected: usize, got: usize },
    #[error("Input '{0}' was not declared by the field contract")]
    MissingInput(String),
    #[error("Dependency {dependency} failed: {reason}")]
    Upstream { dependency: String, reason: String },
    #[error("Field was already written")]
    AlreadyWritten,
}

impl ComputationError {
    /// True for the DataRangeError category.
    pub fn is_data_range(&self) -> bool {
        matches!(
            self,
            ComputationError::OutOfBounds { .. }
                | ComputationError::Overlap { .. }
                | ComputationError::MissingInterval { .. }
                | ComputationError::RangeMismatch { .. }
        )
    }
}

/// One requested Key that ended the run without a value.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingField {
    pub key: Key,
    pub reason: ComputationError,
}

/// Records that could be produced plus every Key that could not.
#[derive(Debug, Clone)]
pub struct IncompleteResult {
    pub records: Vec<UnionizeRecord>,
    pub missing: Vec<MissingField>,
}

impl fmt::Display for IncompleteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} field(s) have no value:", self.missing.len())?;
        for m in &self.missing {
            writeln!(f, "  - {}: {}", m.key, m.reason)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum UnionizeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Incomplete unionize result: {0}")]
    Incomplete(Box<IncompleteResult>),
    #[error("Reading channel '{channel}' range {range} failed after {attempts} attempt(s): {source}")]
    Io {
        channel: String,
        range: VoxelRange,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

impl UnionizeError {
    pub fn incomplete(&self) -> Option<&IncompleteResult> {
        match self {
            UnionizeError::Incomplete(r) => Some(r),
            _ => None,
        }
    }
}

pub type UnionizeResult<T> = Result<T, UnionizeError>;
