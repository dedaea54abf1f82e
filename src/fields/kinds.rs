//! kinds.rs
//! Built-in unionize statistics.

use super::channels::*;
use super::{ChannelList, FieldContract, FieldDeps, FieldInputs};
use crate::compute::kernel;
use crate::error::ComputationError;
use crate::store::Key;
use smallvec::smallvec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Pixel count. Summed up the tree.
    SumPixels,
    /// Pixel count weighted by signal density. Summed up the tree.
    SumProjectingPixels,
    /// SumProjectingPixels / SumPixels, recomputed at every level.
    ProjectionDensity,
}

impl FieldKind {
    pub const ALL: [FieldKind; 3] = [FieldKind::SumPixels, FieldKind::SumProjectingPixels, FieldKind::ProjectionDensity];

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::SumPixels => "sum_pixels",
            FieldKind::SumProjectingPixels => "sum_projecting_pixels",
            FieldKind::ProjectionDensity => "projection_density",
        }
    }
}

const INJECTION_SUM_PIXELS: &str = "injection_sum_pixels_field";
const INJECTION_SUM_PROJECTING_PIXELS: &str = "injection_sum_projecting_pixels_field";
const SUM_PIXELS_FIELD: &str = "sum_pixels_field";
const SUM_PROJECTING_PIXELS_FIELD: &str = "sum_projecting_pixels_field";

impl FieldContract for FieldKind {
    fn required_intervals(&self, key: &Key) -> ChannelList {
        match (self, key.injection) {
            (FieldKind::SumPixels, true) => smallvec![SUM_PIXELS, INJECTION_FRACTION],
            (FieldKind::SumPixels, false) => smallvec![SUM_PIXELS, INJECTION_FRACTION, AAV_EXCLUSION_FRACTION],
            (FieldKind::SumProjectingPixels, true) => smallvec![SUM_PIXELS, INJECTION_DENSITY],
            (FieldKind::SumProjectingPixels, false) => {
                smallvec![SUM_PIXELS, PROJECTION_DENSITY, AAV_EXCLUSION_FRACTION, INJECTION_FRACTION]
            }
            (FieldKind::ProjectionDensity, _) => smallvec![],
        }
    }

    fn required_fields(&self, key: &Key) -> FieldDeps {
        match self {
            // Non-injection counts exclude what the injection side already counted.
            FieldKind::SumPixels if !key.injection => smallvec![(INJECTION_SUM_PIXELS, key.with_injection(true))],
            FieldKind::SumProjectingPixels if !key.injection => {
                smallvec![(INJECTION_SUM_PROJECTING_PIXELS, key.with_injection(true))]
            }
            FieldKind::SumPixels | FieldKind::SumProjectingPixels => smallvec![],
            FieldKind::ProjectionDensity => smallvec![
                (SUM_PIXELS_FIELD, key.with_name(FieldKind::SumPixels.name())),
                (SUM_PROJECTING_PIXELS_FIELD, key.with_name(FieldKind::SumProjectingPixels.name())),
            ],
        }
    }

    fn calculate(&self, key: &Key, inputs: &FieldInputs<'_>) -> Result<f64, ComputationError> {
        match self {
            FieldKind::SumPixels => {
                let pixels = inputs.channel(SUM_PIXELS)?;
                let injection = inputs.channel(INJECTION_FRACTION)?;
                if key.injection {
                    Ok(kernel::dot(pixels, injection))
                } else {
                    let exclusion = inputs.channel(AAV_EXCLUSION_FRACTION)?;
                    let total = kernel::masked_dot(pixels, None, injection, exclusion);
                    Ok(total - inputs.field(INJECTION_SUM_PIXELS)?)
                }
            }
            FieldKind::SumProjectingPixels => {
                let pixels = inputs.channel(SUM_PIXELS)?;
                if key.injection {
                    Ok(kernel::dot(pixels, inputs.channel(INJECTION_DENSITY)?))
                } else {
                    let density = inputs.channel(PROJECTION_DENSITY)?;
                    let injection = inputs.channel(INJECTION_FRACTION)?;
                    let exclusion = inputs.channel(AAV_EXCLUSION_FRACTION)?;
                    let total = kernel::masked_dot(pixels, Some(density), injection, exclusion);
                    Ok(total - inputs.field(INJECTION_SUM_PROJECTING_PIXELS)?)
                }
            }
            FieldKind::ProjectionDensity => density(inputs),
        }
    }

    fn propagate(&self, _key: &Key, children: &[f64], inputs: &FieldInputs<'_>) -> Result<f64, ComputationError> {
        match self {
            FieldKind::SumPixels | FieldKind::SumProjectingPixels => Ok(children.iter().sum()),
            // Ratio of propagated sums, not a mean of child ratios.
            FieldKind::ProjectionDensity => density(inputs),
        }
    }
}

fn density(inputs: &FieldInputs<'_>) -> Result<f64, ComputationError> {
    let numerator = inputs.field(SUM_PROJECTING_PIXELS_FIELD)?;
    let denominator = inputs.field(SUM_PIXELS_FIELD)?;
    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok(numerator / denominator)
}
