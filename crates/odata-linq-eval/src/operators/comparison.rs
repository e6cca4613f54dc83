//! Comparison operators
//!
//! Equality is null-aware (`null eq null` is true); relational operators
//! over a null operand are false. Numbers compare across widths, entities
//! compare by identity.

use odata_linq_ast::BinaryOp;
use odata_linq_types::{QueryValue, ScalarValue};
use std::cmp::Ordering;

/// Compare two non-null primitives of compatible kinds
pub fn compare_scalars(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    use ScalarValue as S;
    match (left, right) {
        (S::Null, _) | (_, S::Null) => None,
        (S::Boolean(a), S::Boolean(b)) => Some(a.cmp(b)),
        (S::String(a), S::String(b)) => Some(a.cmp(b)),
        (S::Guid(a), S::Guid(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        (S::Binary(a), S::Binary(b)) => Some(a.cmp(b)),
        (S::DateTime(a), S::DateTime(b)) => Some(a.cmp(b)),
        (S::DateTimeOffset(a), S::DateTimeOffset(b)) => Some(a.cmp(b)),
        (S::DateTime(a), S::DateTimeOffset(b)) => Some(a.cmp(&b.naive_utc())),
        (S::DateTimeOffset(a), S::DateTime(b)) => Some(a.naive_utc().cmp(b)),
        _ => compare_numbers(left, right),
    }
}

fn compare_numbers(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return Some(a.cmp(&b));
    }
    let decimal = |v: &ScalarValue| matches!(v, ScalarValue::Decimal(_));
    if decimal(left) || decimal(right) {
        if let (Some(a), Some(b)) = (left.as_decimal(), right.as_decimal()) {
            return Some(a.cmp(&b));
        }
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

/// Value equality: primitives by value, entities by identity, complex
/// values, records and collections member-wise
pub fn values_equal(left: &QueryValue, right: &QueryValue) -> bool {
    match (left, right) {
        (QueryValue::Scalar(a), QueryValue::Scalar(b)) => match (a.value.is_null(), b.value.is_null()) {
            (true, true) => true,
            (false, false) => compare_scalars(&a.value, &b.value) == Some(Ordering::Equal),
            _ => false,
        },
        (QueryValue::Structural(a), QueryValue::Structural(b)) => {
            (a.is_null() && b.is_null())
                || a.ptr_eq(b)
                || (a.value_type().is_complex() && !a.is_null() && a == b)
        }
        (QueryValue::Record(a), QueryValue::Record(b)) => {
            a.is_null() == b.is_null()
                && a.members().len() == b.members().len()
                && a.members()
                    .iter()
                    .zip(b.members())
                    .all(|(x, y)| values_equal(x, y))
        }
        (QueryValue::Collection(a), QueryValue::Collection(b)) => {
            a.is_null() == b.is_null()
                && a.len() == b.len()
                && a.elements()
                    .iter()
                    .zip(b.elements())
                    .all(|(x, y)| values_equal(x, y))
        }
        (QueryValue::Link(a), QueryValue::Link(b)) => a == b,
        _ => false,
    }
}

/// Total order used by `OrderBy`: nulls first, then by value
pub fn order_values(left: &QueryValue, right: &QueryValue) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (left.as_scalar(), right.as_scalar()) {
            (Some(a), Some(b)) => compare_scalars(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Evaluate a comparison operator over two operands
pub fn compare(op: BinaryOp, left: &QueryValue, right: &QueryValue) -> bool {
    match op {
        BinaryOp::Equal => values_equal(left, right),
        BinaryOp::NotEqual => !values_equal(left, right),
        _ => {
            let ordering = match (left.as_scalar(), right.as_scalar()) {
                (Some(a), Some(b)) => compare_scalars(a, b),
                _ => None,
            };
            ordering.is_some_and(|o| match op {
                BinaryOp::GreaterThan => o.is_gt(),
                BinaryOp::GreaterThanOrEqual => o.is_ge(),
                BinaryOp::LessThan => o.is_lt(),
                BinaryOp::LessThanOrEqual => o.is_le(),
                _ => false,
            })
        }
    }
}
