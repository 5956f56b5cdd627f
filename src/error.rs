use thiserror::Error;

pub type OpsResult<T> = Result<T, OpsError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OpsError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameters { field: &'static str, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflicting state: {0}")]
    ConflictState(String),

    #[error("internal computation error: {0}")]
    InternalComputation(String),
}

impl OpsError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        OpsError::InvalidParameters {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        OpsError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Rejects NaN/inf and negative values for a named numeric input.
pub fn check_non_negative(field: &'static str, value: f64) -> OpsResult<f64> {
    if !value.is_finite() {
        return Err(OpsError::invalid(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(OpsError::invalid(field, format!("must be >= 0, got {}", value)));
    }
    Ok(value)
}

/// Guards a computed quantity; a non-finite intermediate is a bug, not bad input.
pub fn check_finite(what: &str, value: f64) -> OpsResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OpsError::InternalComputation(format!("{} evaluated to {}", what, value)))
    }
}
