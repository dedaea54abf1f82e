//! Defines the dependency graph and the execution plan built from it.
pub mod dag;
pub mod edge;
pub mod node;

// Re-export key types for convenient access
pub use dag::{DependencyGraph, ExecutionPlan};
pub use edge::Edge;
pub use node::{NodeId, PlanNode};
