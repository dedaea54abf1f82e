//! Read-only run data: keys, the structure ontology and the interval index.
pub mod intervals;
pub mod ontology;
pub mod types;

pub use intervals::{coalesce, IntervalIndex};
pub use ontology::{Ontology, Structure};
pub use types::{Channel, Hemisphere, IntervalKey, Key, StructureId, VoxelRange};
