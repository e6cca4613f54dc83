//! Logical Operators
//!
//! Three-valued logic over `Option<bool>`, `None` standing for null.

use odata_linq_types::{QueryType, QueryValue};

/// Logical AND: false dominates null
pub fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Logical OR: true dominates null
pub fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

pub fn not(operand: Option<bool>) -> Option<bool> {
    operand.map(|b| !b)
}

/// Wrap a three-valued result as a boolean value
pub fn boolean_value(value: Option<bool>) -> QueryValue {
    match value {
        Some(b) => QueryValue::boolean(b),
        None => QueryValue::null_of(&QueryType::boolean()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(true), Some(true), Some(true))]
    #[case(Some(true), None, None)]
    #[case(Some(false), None, Some(false))]
    #[case(None, None, None)]
    fn test_and(#[case] a: Option<bool>, #[case] b: Option<bool>, #[case] expected: Option<bool>) {
        assert_eq!(and(a, b), expected);
        assert_eq!(and(b, a), expected);
    }

    #[rstest]
    #[case(Some(false), Some(false), Some(false))]
    #[case(Some(true), None, Some(true))]
    #[case(Some(false), None, None)]
    fn test_or(#[case] a: Option<bool>, #[case] b: Option<bool>, #[case] expected: Option<bool>) {
        assert_eq!(or(a, b), expected);
        assert_eq!(or(b, a), expected);
    }

    #[test]
    fn test_not_null() {
        assert_eq!(not(None), None);
        assert!(boolean_value(None).is_null());
    }
}
