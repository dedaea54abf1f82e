//! Executes the plan: window loading, field calculation, propagation.
pub mod engine;
pub mod kernel;
pub mod ledger;
pub mod loader;
pub mod propagator;

pub use engine::ComputationEngine;
pub use ledger::{FieldValue, Ledger};
pub use loader::{ChannelSet, ChannelSource, LoadStats, MemoryChannel, RawFileChannel, RetryPolicy};
