//! Query translation error codes following a structured numbering system
//!
//! Error code ranges:
//! - ODL0001-ODL0099: Unsupported constructs (no OData URI equivalent)
//! - ODL0100-ODL0199: Contract violations (pass invariants, wrong shapes)
//! - ODL0200-ODL0299: Evaluation errors (carried as values)
//! - ODL0300-ODL0399: Metadata errors (schema, CSDL)
//! - ODL0400-ODL0499: System errors (I/O, configuration)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    /// Create a new error code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Get the numeric code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Get error information for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }

    /// Check if this is an unsupported-construct error (0001-0099)
    pub const fn is_not_supported(&self) -> bool {
        self.0 >= 1 && self.0 < 100
    }

    /// Check if this is a contract violation (0100-0199)
    pub const fn is_contract_violation(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Check if this is an evaluation error (0200-0299)
    pub const fn is_evaluation_error(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Check if this is a metadata error (0300-0399)
    pub const fn is_metadata_error(&self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Check if this is a system error (0400-0499)
    pub const fn is_system_error(&self) -> bool {
        self.0 >= 400 && self.0 < 500
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ODL{:04}", self.0)
    }
}

/// Information about an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Short description of the error
    pub description: &'static str,
    /// Detailed help text
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Unsupported constructs (0001-0099)
    map.insert(1, ErrorInfo::new("Query operator has no URI equivalent")
        .with_help("Only Where, Select, OrderBy/ThenBy, Skip, Take, Count, Expand, Key, Links and Value translate to URIs"));
    map.insert(2, ErrorInfo::new("Expression cannot be rendered in URI syntax"));
    map.insert(3, ErrorInfo::new("Recursive custom function call"));
    map.insert(4, ErrorInfo::new("Unsupported projection"));
    map.insert(5, ErrorInfo::new("Key values must be constants"));
    map.insert(6, ErrorInfo::new("Unsupported query option value"));

    // Contract violations (0100-0199)
    map.insert(100, ErrorInfo::new("Expression type not resolved")
        .with_help("Run type resolution before evaluating or translating"));
    map.insert(101, ErrorInfo::new("Key lookup source is not a collection"));
    map.insert(102, ErrorInfo::new("Unbound parameter reference"));
    map.insert(103, ErrorInfo::new("Type mismatch"));
    map.insert(104, ErrorInfo::new("Invalid argument count"));
    map.insert(105, ErrorInfo::new("Invalid property access"));
    map.insert(106, ErrorInfo::new("Invalid lambda expression"));
    map.insert(107, ErrorInfo::new("Invalid URI segment sequence"));
    map.insert(108, ErrorInfo::new("Recursion limit exceeded"));

    // Evaluation errors (0200-0299)
    map.insert(200, ErrorInfo::new("Evaluation failed"));
    map.insert(201, ErrorInfo::new("Division by zero"));
    map.insert(202, ErrorInfo::new("Arithmetic overflow"));
    map.insert(203, ErrorInfo::new("Sequence contains no elements"));
    map.insert(204, ErrorInfo::new("Sequence contains more than one element"));
    map.insert(205, ErrorInfo::new("Operator not supported over entity or complex collections"));
    map.insert(206, ErrorInfo::new("Invalid conversion"));
    map.insert(207, ErrorInfo::new("Function has no body to evaluate"));

    // Metadata errors (0300-0399)
    map.insert(300, ErrorInfo::new("Entity set not found"));
    map.insert(301, ErrorInfo::new("Type not found"));
    map.insert(302, ErrorInfo::new("Property not found"));
    map.insert(303, ErrorInfo::new("Service operation not found"));
    map.insert(304, ErrorInfo::new("Custom function not found"));
    map.insert(305, ErrorInfo::new("Invalid metadata document"));
    map.insert(306, ErrorInfo::new("Duplicate definition"));

    // System errors (0400-0499)
    map.insert(401, ErrorInfo::new("I/O error"));
    map.insert(402, ErrorInfo::new("Configuration error"));
    map.insert(406, ErrorInfo::new("Invalid format"));

    map
});

// Unsupported constructs
pub const ODL0001: ErrorCode = ErrorCode::new(1);
pub const ODL0002: ErrorCode = ErrorCode::new(2);
pub const ODL0003: ErrorCode = ErrorCode::new(3);
pub const ODL0004: ErrorCode = ErrorCode::new(4);
pub const ODL0005: ErrorCode = ErrorCode::new(5);
pub const ODL0006: ErrorCode = ErrorCode::new(6);

// Contract violations
pub const ODL0100: ErrorCode = ErrorCode::new(100);
pub const ODL0101: ErrorCode = ErrorCode::new(101);
pub const ODL0102: ErrorCode = ErrorCode::new(102);
pub const ODL0103: ErrorCode = ErrorCode::new(103);
pub const ODL0104: ErrorCode = ErrorCode::new(104);
pub const ODL0105: ErrorCode = ErrorCode::new(105);
pub const ODL0106: ErrorCode = ErrorCode::new(106);
pub const ODL0107: ErrorCode = ErrorCode::new(107);
pub const ODL0108: ErrorCode = ErrorCode::new(108);

// Evaluation errors
pub const ODL0200: ErrorCode = ErrorCode::new(200);
pub const ODL0201: ErrorCode = ErrorCode::new(201);
pub const ODL0202: ErrorCode = ErrorCode::new(202);
pub const ODL0203: ErrorCode = ErrorCode::new(203);
pub const ODL0204: ErrorCode = ErrorCode::new(204);
pub const ODL0205: ErrorCode = ErrorCode::new(205);
pub const ODL0206: ErrorCode = ErrorCode::new(206);
pub const ODL0207: ErrorCode = ErrorCode::new(207);

// Metadata errors
pub const ODL0300: ErrorCode = ErrorCode::new(300);
pub const ODL0301: ErrorCode = ErrorCode::new(301);
pub const ODL0302: ErrorCode = ErrorCode::new(302);
pub const ODL0303: ErrorCode = ErrorCode::new(303);
pub const ODL0304: ErrorCode = ErrorCode::new(304);
pub const ODL0305: ErrorCode = ErrorCode::new(305);
pub const ODL0306: ErrorCode = ErrorCode::new(306);

// System errors
pub const ODL0401: ErrorCode = ErrorCode::new(401);
pub const ODL0402: ErrorCode = ErrorCode::new(402);
pub const ODL0406: ErrorCode = ErrorCode::new(406);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ODL0001.to_string(), "ODL0001");
        assert_eq!(ODL0203.to_string(), "ODL0203");
    }

    #[test]
    fn test_error_categories() {
        assert!(ODL0001.is_not_supported());
        assert!(!ODL0001.is_contract_violation());

        assert!(ODL0101.is_contract_violation());
        assert!(ODL0205.is_evaluation_error());
        assert!(ODL0305.is_metadata_error());
        assert!(ODL0401.is_system_error());
    }

    #[test]
    fn test_error_info() {
        assert_eq!(ODL0003.info().description, "Recursive custom function call");
        assert_eq!(ErrorCode::new(999).info().description, "Unknown error");
    }
}
