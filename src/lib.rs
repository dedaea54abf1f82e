// Library facade: module tree and the caller-facing re-exports.
//
// A request is planned into an explicit dependency graph (`explain`), then
// executed against windowed channel reads (`resolve_and_compute`).

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod error;
pub mod fields;
pub mod graph;
pub mod records;
pub mod store;
pub mod unionize;

pub use compute::{ChannelSet, ChannelSource, LoadStats, MemoryChannel, RawFileChannel, RetryPolicy};
pub use config::{EngineConfig, UnionizeInput};
pub use error::{ComputationError, ConfigurationError, IncompleteResult, UnionizeError, UnionizeResult};
pub use fields::{FieldContract, FieldInputs, FieldKind, FieldRegistry};
pub use graph::{ExecutionPlan, PlanNode};
pub use records::{UnionizeOutput, UnionizeRecord};
pub use store::{Hemisphere, IntervalIndex, Key, Ontology, Structure, StructureId, VoxelRange};
pub use unionize::{explain, resolve_and_compute, UnionizeRequest, UnionizeRun, Unionizer};
