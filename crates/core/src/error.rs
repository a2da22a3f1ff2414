//! Error types for the folio document mapper
//!
//! Provides error handling for storage operations, document validation,
//! and association configuration.

use thiserror::Error;

use crate::document::ValidationErrors;

/// Result type alias for document operations
pub type OdmResult<T> = Result<T, OdmError>;

/// Core error type for the folio document mapper
#[derive(Debug, Error)]
pub enum OdmError {
    #[error("Document not found in collection '{collection}'")]
    NotFound { collection: String },

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Operation '{operation}' is not supported by the '{variant}' association")]
    Unsupported { operation: String, variant: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OdmError {
    /// Create a new not-found error for a collection
    pub fn not_found(collection: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
        }
    }

    /// Create a new unsupported-operation error
    pub fn unsupported(operation: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            variant: variant.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Check if the error is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<ValidationErrors> for OdmError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_names_the_collection() {
        let err = OdmError::not_found("lists");
        assert_eq!(err.to_string(), "Document not found in collection 'lists'");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unsupported_display_names_operation_and_variant() {
        let err = OdmError::unsupported("delete_all", "embedded");
        assert_eq!(
            err.to_string(),
            "Operation 'delete_all' is not supported by the 'embedded' association"
        );
    }

    #[test]
    fn test_validation_errors_convert_into_odm_error() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "can't be blank");
        let err: OdmError = errors.into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("can't be blank"));
    }
}
