//! Field-type contracts.
//!
//! A contract says, for any Key of its type, which channels and which other
//! Fields it reads, and how its value is produced: `calculate` at leaf
//! structures, `propagate` at structures with requested children.
pub mod kinds;
pub mod registry;

pub use kinds::FieldKind;
pub use registry::FieldRegistry;

use crate::error::ComputationError;
use crate::store::{Channel, Key, VoxelRange};
use smallvec::SmallVec;
use std::fmt;

/// Local name under which a Field reads one of its dependencies.
pub type Role = &'static str;

pub type ChannelList = SmallVec<[Channel; 4]>;
pub type FieldDeps = SmallVec<[(Role, Key); 2]>;

/// Raw channel names understood by the built-in field types.
pub mod channels {
    use crate::store::Channel;

    pub const SUM_PIXELS: Channel = "sum_pixels";
    pub const INJECTION_FRACTION: Channel = "injection_fraction";
    pub const AAV_EXCLUSION_FRACTION: Channel = "aav_exclusion_fraction";
    pub const INJECTION_DENSITY: Channel = "injection_density";
    pub const PROJECTION_DENSITY: Channel = "projection_density";
}

pub trait FieldContract: Send + Sync + fmt::Debug {
    /// Channels read by `calculate`. Pure function of the key.
    fn required_intervals(&self, key: &Key) -> ChannelList;

    /// Other Fields read by `calculate` and `propagate`, by role.
    fn required_fields(&self, key: &Key) -> FieldDeps;

    /// Leaf value from the structure's voxel windows and dependency values.
    fn calculate(&self, key: &Key, inputs: &FieldInputs<'_>) -> Result<f64, ComputationError>;

    /// Parent value from the same field at each requested child, plus the
    /// parent's own dependency values.
    fn propagate(&self, key: &Key, children: &[f64], inputs: &FieldInputs<'_>) -> Result<f64, ComputationError>;
}

/// Everything a Field may read: one window per declared channel and one
/// value per declared role. Asking for anything else is an error.
#[derive(Debug, Clone, Default)]
pub struct FieldInputs<'a> {
    /// Position of the windows in the flattened channel. Empty for propagation.
    pub range: VoxelRange,
    channels: SmallVec<[(Channel, &'a [f64]); 4]>,
    fields: SmallVec<[(Role, f64); 2]>,
}

impl<'a> FieldInputs<'a> {
    pub fn new(range: VoxelRange) -> Self {
        Self { range, ..Default::default() }
    }

    pub fn with_channel(mut self, channel: Channel, window: &'a [f64]) -> Self {
        self.push_channel(channel, window);
        self
    }

    pub fn with_field(mut self, role: Role, value: f64) -> Self {
        self.push_field(role, value);
        self
    }

    pub fn push_channel(&mut self, channel: Channel, window: &'a [f64]) {
        self.channels.push((channel, window));
    }

    pub fn push_field(&mut self, role: Role, value: f64) {
        self.fields.push((role, value));
    }

    pub fn channel(&self, channel: &str) -> Result<&'a [f64], ComputationError> {
        self.channels
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, w)| *w)
            .ok_or_else(|| ComputationError::MissingInput(channel.to_string()))
    }

    pub fn field(&self, role: &str) -> Result<f64, ComputationError> {
        self.fields
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, v)| *v)
            .ok_or_else(|| ComputationError::MissingInput(role.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_inputs_are_errors() {
        let data = [1.0, 2.0];
        let inputs = FieldInputs::new(VoxelRange::new(0, 2))
            .with_channel(channels::SUM_PIXELS, &data)
            .with_field("sum_pixels_field", 3.0);
        assert_eq!(inputs.channel("sum_pixels").unwrap(), &data);
        assert_eq!(inputs.field("sum_pixels_field").unwrap(), 3.0);
        assert_eq!(
            inputs.channel("injection_density"),
            Err(ComputationError::MissingInput("injection_density".into()))
        );
        assert!(inputs.field("other").is_err());
    }
}
