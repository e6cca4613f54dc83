//! Arithmetic Operators
//!
//! Implements: Add, Subtract, Multiply, Divide, Modulo, Negate
//!
//! Operands are promoted to the resolved result type of the node. Integral
//! and decimal math is checked; floating point follows IEEE semantics.

use crate::error::{Evaluated, division_by_zero, failed, first_error, overflow};
use odata_linq_ast::BinaryOp;
use odata_linq_types::{PrimitiveType, QueryType, QueryValue, ScalarValue};
use rust_decimal::Decimal;

/// Evaluate a binary arithmetic operator; the result is typed `ty`
pub fn arithmetic(op: BinaryOp, left: &QueryValue, right: &QueryValue, ty: &QueryType) -> QueryValue {
    if let Some(error) = first_error([left, right]) {
        return QueryValue::error_of(ty, error);
    }
    // Null propagation
    if left.is_null() || right.is_null() {
        return QueryValue::null_of(ty);
    }
    let (Some(a), Some(b)) = (left.as_scalar(), right.as_scalar()) else {
        return QueryValue::error_of(ty, failed(format!("{op:?} requires primitive operands")));
    };
    let result = match ty.as_primitive() {
        Some(p) if p.is_integral() => integral(op, a, b, p),
        Some(PrimitiveType::Decimal) => decimal(op, a, b),
        Some(PrimitiveType::Single) => floating(op, a, b).map(|v| ScalarValue::Single(v as f32)),
        Some(PrimitiveType::Double) => floating(op, a, b).map(ScalarValue::Double),
        _ => Err(failed(format!("{op:?} is not defined for {ty}"))),
    };
    match result {
        Ok(value) => QueryValue::typed_scalar(ty.clone(), value),
        Err(error) => QueryValue::error_of(ty, error),
    }
}

/// Evaluate unary negation
pub fn negate(operand: &QueryValue, ty: &QueryType) -> QueryValue {
    if let Some(error) = operand.evaluation_error() {
        return QueryValue::error_of(ty, error.clone());
    }
    let Some(value) = operand.as_scalar().filter(|v| !v.is_null()) else {
        return QueryValue::null_of(ty);
    };
    let result = match value {
        ScalarValue::Byte(v) => Ok(ScalarValue::Int16(-i16::from(*v))),
        ScalarValue::Int16(v) => v.checked_neg().map(ScalarValue::Int16).ok_or_else(|| overflow("Negate")),
        ScalarValue::Int32(v) => v.checked_neg().map(ScalarValue::Int32).ok_or_else(|| overflow("Negate")),
        ScalarValue::Int64(v) => v.checked_neg().map(ScalarValue::Int64).ok_or_else(|| overflow("Negate")),
        ScalarValue::Single(v) => Ok(ScalarValue::Single(-v)),
        ScalarValue::Double(v) => Ok(ScalarValue::Double(-v)),
        ScalarValue::Decimal(v) => Ok(ScalarValue::Decimal(-v)),
        other => Err(failed(format!("Negate is not defined for '{other}'"))),
    };
    match result {
        Ok(value) => QueryValue::typed_scalar(ty.clone(), value),
        Err(error) => QueryValue::error_of(ty, error),
    }
}

fn integral(op: BinaryOp, a: &ScalarValue, b: &ScalarValue, target: PrimitiveType) -> Evaluated<ScalarValue> {
    let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) else {
        return Err(failed(format!("{op:?} requires integral operands")));
    };
    let operation = format!("{op:?}");
    let value = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide | BinaryOp::Modulo if b == 0 => return Err(division_by_zero()),
        BinaryOp::Divide => a.checked_div(b),
        BinaryOp::Modulo => a.checked_rem(b),
        _ => return Err(failed(format!("{operation} is not an arithmetic operator"))),
    }
    .ok_or_else(|| overflow(&operation))?;

    match target {
        PrimitiveType::Byte => u8::try_from(value).map(ScalarValue::Byte).ok(),
        PrimitiveType::Int16 => i16::try_from(value).map(ScalarValue::Int16).ok(),
        PrimitiveType::Int32 => i32::try_from(value).map(ScalarValue::Int32).ok(),
        _ => Some(ScalarValue::Int64(value)),
    }
    .ok_or_else(|| overflow(&operation))
}

fn decimal(op: BinaryOp, a: &ScalarValue, b: &ScalarValue) -> Evaluated<ScalarValue> {
    let (Some(a), Some(b)) = (a.as_decimal(), b.as_decimal()) else {
        return Err(failed(format!("{op:?} requires numeric operands")));
    };
    let operation = format!("{op:?}");
    let value = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide | BinaryOp::Modulo if b == Decimal::ZERO => return Err(division_by_zero()),
        BinaryOp::Divide => a.checked_div(b),
        BinaryOp::Modulo => a.checked_rem(b),
        _ => return Err(failed(format!("{operation} is not an arithmetic operator"))),
    };
    value.map(ScalarValue::Decimal).ok_or_else(|| overflow(&operation))
}

fn floating(op: BinaryOp, a: &ScalarValue, b: &ScalarValue) -> Evaluated<f64> {
    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return Err(failed(format!("{op:?} requires numeric operands")));
    };
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => return Err(failed(format!("{op:?} is not an arithmetic operator"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_diagnostics::{ODL0201, ODL0202};
    use proptest::prelude::*;
    use rstest::rstest;

    fn double() -> QueryType {
        QueryType::primitive(PrimitiveType::Double)
    }

    #[rstest]
    #[case(BinaryOp::Add, 7, 3, 10)]
    #[case(BinaryOp::Subtract, 7, 3, 4)]
    #[case(BinaryOp::Multiply, 7, 3, 21)]
    #[case(BinaryOp::Divide, 7, 3, 2)]
    #[case(BinaryOp::Modulo, -7, 3, -1)]
    fn test_int32(#[case] op: BinaryOp, #[case] a: i32, #[case] b: i32, #[case] expected: i32) {
        let result = arithmetic(op, &QueryValue::int32(a), &QueryValue::int32(b), &QueryType::int32());
        assert_eq!(result.as_scalar(), Some(&ScalarValue::Int32(expected)));
    }

    #[test]
    fn test_int32_overflow_is_carried() {
        let result = arithmetic(
            BinaryOp::Add,
            &QueryValue::int32(i32::MAX),
            &QueryValue::int32(1),
            &QueryType::int32(),
        );
        assert!(result.is_null());
        assert_eq!(result.evaluation_error().map(|e| e.code), Some(ODL0202));
    }

    #[test]
    fn test_division_by_zero() {
        let result = arithmetic(BinaryOp::Divide, &QueryValue::int32(1), &QueryValue::int32(0), &QueryType::int32());
        assert_eq!(result.evaluation_error().map(|e| e.code), Some(ODL0201));

        let result = arithmetic(
            BinaryOp::Modulo,
            &QueryValue::decimal(Decimal::ONE),
            &QueryValue::decimal(Decimal::ZERO),
            &QueryType::primitive(PrimitiveType::Decimal),
        );
        assert_eq!(result.evaluation_error().map(|e| e.code), Some(ODL0201));
    }

    #[test]
    fn test_double_division_by_zero_is_infinite() {
        let result = arithmetic(BinaryOp::Divide, &QueryValue::double(1.0), &QueryValue::int32(0), &double());
        assert_eq!(result.as_scalar(), Some(&ScalarValue::Double(f64::INFINITY)));
    }

    #[test]
    fn test_mixed_promotes_to_decimal() {
        let result = arithmetic(
            BinaryOp::Multiply,
            &QueryValue::int32(2),
            &QueryValue::decimal(Decimal::new(15, 1)),
            &QueryType::primitive(PrimitiveType::Decimal),
        );
        assert_eq!(result.as_scalar(), Some(&ScalarValue::Decimal(Decimal::new(30, 1))));
    }

    #[test]
    fn test_null_propagates() {
        let null = QueryValue::null_of(&QueryType::int32());
        let result = arithmetic(BinaryOp::Add, &null, &QueryValue::int32(1), &QueryType::int32());
        assert!(result.is_null());
        assert!(result.evaluation_error().is_none());
    }

    #[test]
    fn test_negate_min_overflows() {
        let result = negate(&QueryValue::int32(i32::MIN), &QueryType::int32());
        assert_eq!(result.evaluation_error().map(|e| e.code), Some(ODL0202));
        let result = negate(&QueryValue::int32(5), &QueryType::int32());
        assert_eq!(result.as_scalar(), Some(&ScalarValue::Int32(-5)));
    }

    proptest! {
        #[test]
        fn int64_addition_matches_checked_add(a in any::<i64>(), b in any::<i64>()) {
            let result = arithmetic(BinaryOp::Add, &QueryValue::int64(a), &QueryValue::int64(b), &QueryType::int64());
            match a.checked_add(b) {
                Some(sum) => prop_assert_eq!(result.as_scalar(), Some(&ScalarValue::Int64(sum))),
                None => prop_assert!(result.evaluation_error().is_some()),
            }
        }
    }
}
