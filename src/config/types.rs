//! Configuration type definitions
//!
//! `UnionizeInput` mirrors the job document handed over by the parameter
//! service; `EngineConfig` holds the engine's own tunables.

use crate::compute::RetryPolicy;
use crate::error::ConfigurationError;
use crate::store::{Hemisphere, Structure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One unionize job.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnionizeInput {
    /// Channel name -> voxel data file.
    pub grid_paths: BTreeMap<String, PathBuf>,
    pub structures: Vec<Structure>,
    /// 1: left, 2: right, 3: both
    pub hemisphere_ids: Vec<i64>,
    /// Written to every output record.
    pub image_series_id: i64,
    /// Label volume mapping voxels to structures.
    pub annotation_path: PathBuf,
    /// Microns between successive scanned slices.
    pub slice_thickness: f64,
    /// Isometric reference-space resolution in microns.
    pub reference_spacing: f64,
    /// Length of each axis of the reference volume.
    pub reference_shape: Vec<i64>,
    /// Side length (microns) of an acquired image pixel.
    pub image_resolution: f64,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl UnionizeInput {
    pub fn hemispheres(&self) -> Result<Vec<Hemisphere>, ConfigurationError> {
        self.hemisphere_ids
            .iter()
            .map(|&id| Hemisphere::from_id(id).ok_or(ConfigurationError::UnknownHemisphere(id)))
            .collect()
    }

    /// Number of voxels in the reference volume, if the shape is usable.
    pub fn voxel_capacity(&self) -> Option<usize> {
        if self.reference_shape.len() != 3 || self.reference_shape.iter().any(|&d| d <= 0) {
            return None;
        }
        self.reference_shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
    }
}

/// Engine tunables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per channel read before an I/O failure is fatal.
    pub max_read_attempts: u32,
    /// Backoff between attempts; grows linearly with the attempt number.
    pub retry_backoff_ms: u64,
    /// Run independent plan components on the rayon pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_read_attempts: 3, retry_backoff_ms: 10, parallel: true }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_read_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
