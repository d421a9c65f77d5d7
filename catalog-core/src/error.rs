//! Error types for catalog operations

use thiserror::Error;

/// Schema validation errors, raised before any command reaches the network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Update carries no fields")]
    EmptyUpdate,
}

impl ValidationError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Field the error refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::RequiredFieldMissing { field } | Self::InvalidValue { field, .. } => Some(field),
            Self::EmptyUpdate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_required() {
        let err = ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Required field missing"));
        assert!(msg.contains("name"));
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_validation_error_display_invalid_value() {
        let err = ValidationError::invalid("price", "must be non-negative");
        let msg = format!("{}", err);
        assert!(msg.contains("price"));
        assert!(msg.contains("must be non-negative"));
    }

    #[test]
    fn test_empty_update_has_no_field() {
        assert_eq!(ValidationError::EmptyUpdate.field(), None);
    }
}
