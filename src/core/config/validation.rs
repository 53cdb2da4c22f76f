//! Validation helper functions for configuration types.

use crate::core::errors::{CovforgeError, Result};

/// Validate that a usize value is greater than zero.
pub fn validate_positive_usize(value: usize, field: &str) -> Result<()> {
    if value == 0 {
        return Err(CovforgeError::validation(format!(
            "{} must be greater than 0",
            field
        )));
    }
    Ok(())
}

/// Validate that a u64 value is greater than zero.
pub fn validate_positive_u64(value: u64, field: &str) -> Result<()> {
    if value == 0 {
        return Err(CovforgeError::validation(format!(
            "{} must be greater than 0",
            field
        )));
    }
    Ok(())
}

/// Validate that an f64 value is non-negative.
pub fn validate_non_negative(value: f64, field: &str) -> Result<()> {
    if !(value >= 0.0) {
        return Err(CovforgeError::validation(format!(
            "{} must be non-negative",
            field
        )));
    }
    Ok(())
}

/// Validate that an f64 value is in the unit range [0.0, 1.0].
pub fn validate_unit_range(value: f64, field: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CovforgeError::validation(format!(
            "{} must be between 0.0 and 1.0",
            field
        )));
    }
    Ok(())
}

/// Validate that an f64 value is a percentage in [0.0, 100.0].
pub fn validate_percentage(value: f64, field: &str) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(CovforgeError::validation(format!(
            "{} must be between 0 and 100",
            field
        )));
    }
    Ok(())
}

/// Validate that a string setting is not blank.
pub fn validate_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CovforgeError::validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
