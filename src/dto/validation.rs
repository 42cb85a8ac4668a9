//! Validation helpers for DTOs.

use validator::ValidationError;

/// Rejects text made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must contain at least one non-whitespace character".into());
        return Err(err);
    }
    Ok(())
}
