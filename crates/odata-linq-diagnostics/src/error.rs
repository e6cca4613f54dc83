//! Query translation error types

use crate::ErrorCode;
use thiserror::Error;

/// Main query translation error type
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The expression has no OData URI equivalent
    #[error("{code}: {message}")]
    NotSupported {
        code: ErrorCode,
        message: String,
    },

    /// An invariant between passes or a caller contract was violated
    #[error("{code}: {message}")]
    Contract {
        code: ErrorCode,
        message: String,
    },

    /// An evaluation error escalated out of a value
    #[error("{code}: {message}")]
    Evaluation {
        code: ErrorCode,
        message: String,
    },

    /// Schema lookup or metadata document error
    #[error("{code}: {message}")]
    Metadata {
        code: ErrorCode,
        message: String,
        type_name: Option<String>,
    },

    /// System error
    #[error("{code}: {message}")]
    System {
        code: ErrorCode,
        message: String,
    },
}

impl QueryError {
    /// Create an unsupported-construct error
    pub fn not_supported(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::NotSupported {
            code,
            message: message.into(),
        }
    }

    /// Create a contract violation
    pub fn contract(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Contract {
            code,
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Evaluation {
            code,
            message: message.into(),
        }
    }

    /// Create a metadata error
    pub fn metadata(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Metadata {
            code,
            message: message.into(),
            type_name: None,
        }
    }

    /// Create a metadata error about a specific type
    pub fn metadata_for_type(
        code: ErrorCode,
        message: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::Metadata {
            code,
            message: message.into(),
            type_name: Some(type_name.into()),
        }
    }

    /// Create a system error
    pub fn system(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::System {
            code,
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotSupported { code, .. } => *code,
            Self::Contract { code, .. } => *code,
            Self::Evaluation { code, .. } => *code,
            Self::Metadata { code, .. } => *code,
            Self::System { code, .. } => *code,
        }
    }

    /// Get the error message without the code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::NotSupported { message, .. }
            | Self::Contract { message, .. }
            | Self::Evaluation { message, .. }
            | Self::Metadata { message, .. }
            | Self::System { message, .. } => message,
        }
    }

    /// Check whether this error reports an unsupported construct
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// The schema type a metadata error is about
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Metadata { type_name, .. } => type_name.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ODL0001, ODL0101, ODL0301};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_carries_code() {
        let err = QueryError::not_supported(ODL0001, "Join is not supported");
        assert!(err.is_not_supported());
        assert_eq!(err.code(), ODL0001);
        assert_eq!(err.message(), "Join is not supported");
        assert_eq!(err.to_string(), "ODL0001: Join is not supported");
    }

    #[test]
    fn test_contract_is_not_unsupported() {
        let err = QueryError::contract(ODL0101, "Key source is not a collection");
        assert!(!err.is_not_supported());
        assert_eq!(err.type_name(), None);
    }

    #[test]
    fn test_metadata_error_names_type() {
        let err = QueryError::metadata_for_type(ODL0301, "Type not found", "NS.Missing");
        assert_eq!(err.type_name(), Some("NS.Missing"));
        assert_eq!(err.to_string(), "ODL0301: Type not found");
    }
}
