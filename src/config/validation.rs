//! Job input validation
//!
//! Collects every problem in one pass so a broken job document is fixed in
//! one round trip.

use super::types::UnionizeInput;
use crate::error::ConfigurationError;
use crate::store::Hemisphere;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum InputValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for InputValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired { field } => write!(f, "Missing required input: {}", field),
            Self::InvalidValue { field, reason } => write!(f, "Invalid value for {}: {}", field, reason),
        }
    }
}

/// Validate a job document
///
/// # Errors
///
/// Returns `ConfigurationError::InvalidInput` listing every problem found.
pub fn validate_input(input: &UnionizeInput) -> Result<(), ConfigurationError> {
    let mut errors = Vec::new();

    validate_required(input, &mut errors);
    validate_geometry(input, &mut errors);
    validate_hemispheres(input, &mut errors);

    if errors.is_empty() {
        return Ok(());
    }
    Err(ConfigurationError::InvalidInput(errors.iter().map(|e| format!("  - {}", e)).collect()))
}

fn validate_required(input: &UnionizeInput, errors: &mut Vec<InputValidationError>) {
    if input.grid_paths.is_empty() {
        errors.push(InputValidationError::MissingRequired { field: "grid_paths".into() });
    }
    if input.structures.is_empty() {
        errors.push(InputValidationError::MissingRequired { field: "structures".into() });
    }
    if input.hemisphere_ids.is_empty() {
        errors.push(InputValidationError::MissingRequired { field: "hemisphere_ids".into() });
    }
}

fn validate_geometry(input: &UnionizeInput, errors: &mut Vec<InputValidationError>) {
    for (field, value) in [
        ("slice_thickness", input.slice_thickness),
        ("reference_spacing", input.reference_spacing),
        ("image_resolution", input.image_resolution),
    ] {
        if !(value.is_finite() && value > 0.0) {
            errors.push(InputValidationError::InvalidValue {
                field: field.into(),
                reason: format!("must be a positive number, got {}", value),
            });
        }
    }

    if input.reference_shape.len() != 3 {
        errors.push(InputValidationError::InvalidValue {
            field: "reference_shape".into(),
            reason: format!("expected 3 axes, got {}", input.reference_shape.len()),
        });
    } else if input.reference_shape.iter().any(|&d| d <= 0) {
        errors.push(InputValidationError::InvalidValue {
            field: "reference_shape".into(),
            reason: "axis lengths must be positive".into(),
        });
    }
}

fn validate_hemispheres(input: &UnionizeInput, errors: &mut Vec<InputValidationError>) {
    for &id in &input.hemisphere_ids {
        if Hemisphere::from_id(id).is_none() {
            errors.push(InputValidationError::InvalidValue {
                field: "hemisphere_ids".into(),
                reason: format!("{} is not one of 1 (left), 2 (right), 3 (both)", id),
            });
        }
    }
}
