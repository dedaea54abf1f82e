//! Job input and engine configuration.
//!
//! Loading order for engine tunables:
//! 1. Defaults
//! 2. The `engine` section of the job document
//! 3. `UNIONIZE_*` environment variables

pub mod types;
pub mod validation;

pub use types::{EngineConfig, UnionizeInput};
pub use validation::{validate_input, InputValidationError};

use crate::error::ConfigurationError;
use std::env;
use std::path::Path;
use tracing::{debug, warn};

impl UnionizeInput {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads, parses and validates a job file, then applies environment
    /// overrides to its engine section.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading unionize job");
        let text = std::fs::read_to_string(path)?;
        let mut input = Self::from_json_str(&text)?;
        input.validate()?;
        apply_environment_overrides(&mut input.engine);
        Ok(input)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_input(self)
    }
}

/// Overrides engine settings from `UNIONIZE_MAX_READ_ATTEMPTS`,
/// `UNIONIZE_RETRY_BACKOFF_MS` and `UNIONIZE_PARALLEL`.
pub fn apply_environment_overrides(config: &mut EngineConfig) {
    apply_overrides(config, |name| env::var(name).ok());
}

/// Same as `apply_environment_overrides` with an explicit variable lookup.
/// Unparsable values are ignored with a warning.
pub fn apply_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("UNIONIZE_MAX_READ_ATTEMPTS") {
        match raw.parse() {
            Ok(v) => config.max_read_attempts = v,
            Err(_) => warn!(value = %raw, "ignoring UNIONIZE_MAX_READ_ATTEMPTS"),
        }
    }
    if let Some(raw) = lookup("UNIONIZE_RETRY_BACKOFF_MS") {
        match raw.parse() {
            Ok(v) => config.retry_backoff_ms = v,
            Err(_) => warn!(value = %raw, "ignoring UNIONIZE_RETRY_BACKOFF_MS"),
        }
    }
    if let Some(raw) = lookup("UNIONIZE_PARALLEL") {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => config.parallel = true,
            "0" | "false" | "no" => config.parallel = false,
            _ => warn!(value = %raw, "ignoring UNIONIZE_PARALLEL"),
        }
    }
}
