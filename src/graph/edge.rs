//! Defines the `Edge` type, representing a "must complete before" relation.
use crate::fields::Role;

/// Describes why one plan node must precede another.
///
/// The engine uses this to route a finished node's output to the right
/// input slot of its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Edge {
    /// A loaded voxel window feeding a leaf `calculate`.
    Interval,
    /// A Field read by another Field under a local role name.
    /// Example: non-injection `sum_pixels` reads the injection-side
    /// `sum_pixels` as `injection_sum_pixels_field`.
    Dependency(Role),
    /// A child structure's value feeding its parent's `propagate`.
    Child,
}
