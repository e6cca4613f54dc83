//! Canonical functions, custom functions and service operations

use crate::ExprRef;
use odata_linq_types::QueryType;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Closed set of canonical functions understood by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalFunction {
    // String functions
    /// `str.Contains(sub)`, rendered `substringof(sub,str)`
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Replace,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    /// Static `string.Concat(a, b)`
    Concat,

    // Date functions
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,

    // Math functions
    Round,
    Floor,
    Ceiling,
}

impl CanonicalFunction {
    pub const ALL: [CanonicalFunction; 20] = [
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Length,
        Self::IndexOf,
        Self::Replace,
        Self::Substring,
        Self::ToLower,
        Self::ToUpper,
        Self::Trim,
        Self::Concat,
        Self::Year,
        Self::Month,
        Self::Day,
        Self::Hour,
        Self::Minute,
        Self::Second,
        Self::Round,
        Self::Floor,
        Self::Ceiling,
    ];

    /// The function name in URI expressions
    pub fn uri_name(&self) -> &'static str {
        match self {
            Self::Contains => "substringof",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Length => "length",
            Self::IndexOf => "indexof",
            Self::Replace => "replace",
            Self::Substring => "substring",
            Self::ToLower => "tolower",
            Self::ToUpper => "toupper",
            Self::Trim => "trim",
            Self::Concat => "concat",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
        }
    }

    /// Look up a function by its URI name
    pub fn from_uri_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.uri_name() == name)
    }

    /// Instance-style functions are members of their first argument and
    /// propagate a null instance instead of being invoked
    pub fn is_instance(&self) -> bool {
        !matches!(self, Self::Concat | Self::Round | Self::Floor | Self::Ceiling)
    }

    /// Accepted argument counts, instance included
    pub fn arity(&self) -> RangeInclusive<usize> {
        match self {
            Self::Length | Self::ToLower | Self::ToUpper | Self::Trim => 1..=1,
            Self::Year | Self::Month | Self::Day | Self::Hour | Self::Minute | Self::Second => 1..=1,
            Self::Floor | Self::Ceiling => 1..=1,
            // round(x, digits) is accepted; the digits are dropped
            Self::Round => 1..=2,
            Self::Contains | Self::StartsWith | Self::EndsWith | Self::IndexOf | Self::Concat => 2..=2,
            Self::Substring => 2..=3,
            Self::Replace => 3..=3,
        }
    }
}

/// A named, typed function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: String,
    pub parameter_type: QueryType,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, parameter_type: QueryType) -> Self {
        Self {
            name: name.into(),
            parameter_type,
        }
    }
}

/// A user-defined function; calls with a body are inlined before translation
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFunction {
    pub namespace: String,
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: QueryType,
    /// Body referring to parameters through `FunctionParameterRef` nodes
    pub body: Option<ExprRef>,
}

impl CustomFunction {
    /// Create a function without a body
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        parameters: Vec<FunctionParameter>,
        return_type: QueryType,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            parameters,
            return_type,
            body: None,
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: ExprRef) -> Self {
        self.body = Some(body);
        self
    }

    /// Qualified name (`Namespace.Name`)
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Find a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&FunctionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A service operation (function import) exposed by the service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperation {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    /// `None` for void operations
    pub return_type: Option<QueryType>,
    /// Entity set the results belong to
    pub entity_set: Option<String>,
    /// In-memory implementation used by the evaluator
    pub body: Option<ExprRef>,
}

impl ServiceOperation {
    /// Create an operation without a body
    pub fn new(name: impl Into<String>, return_type: Option<QueryType>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type,
            entity_set: None,
            body: None,
        }
    }

    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_entity_set(mut self, entity_set: impl Into<String>) -> Self {
        self.entity_set = Some(entity_set.into());
        self
    }

    pub fn with_body(mut self, body: ExprRef) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("substringof", CanonicalFunction::Contains)]
    #[case("round", CanonicalFunction::Round)]
    #[case("tolower", CanonicalFunction::ToLower)]
    fn test_from_uri_name(#[case] name: &str, #[case] expected: CanonicalFunction) {
        assert_eq!(CanonicalFunction::from_uri_name(name), Some(expected));
    }

    #[test]
    fn test_instance_functions() {
        assert!(CanonicalFunction::Trim.is_instance());
        assert!(CanonicalFunction::Year.is_instance());
        assert!(!CanonicalFunction::Concat.is_instance());
        assert!(!CanonicalFunction::Round.is_instance());
    }
}
