//! Type Operators
//!
//! Implements: As, IsOf, OfType and the primitive conversions applied when
//! a value flows into a node of a wider declared type.

use crate::context::EvaluationContext;
use crate::error::{checked, invalid_conversion};
use crate::evaluator::QueryEvaluator;
use odata_linq_ast::TypeOperationExpr;
use odata_linq_diagnostics::Result;
use odata_linq_model::coerce_scalar;
use odata_linq_types::{PrimitiveType, QueryCollectionValue, QueryType, QueryValue};

/// Check whether a non-null value is an instance of the named type
/// (entity types match their derived types as well)
pub fn is_instance_of(value: &QueryValue, type_name: &str) -> bool {
    match value {
        QueryValue::Structural(s) if !s.is_null() => match s.value_type() {
            QueryType::Entity(e) => e.is_or_derives_from(type_name),
            QueryType::Complex(c) => c.full_name() == type_name,
            _ => false,
        },
        QueryValue::Scalar(s) => match (s.value.primitive_type(), PrimitiveType::from_edm_name(type_name)) {
            (Some(actual), Some(expected)) => actual == expected,
            _ => false,
        },
        _ => false,
    }
}

/// Convert a value to the primitive `target` type; non-primitive targets
/// leave the value unchanged
pub fn convert_value(value: QueryValue, target: &QueryType) -> QueryValue {
    let Some(primitive) = target.as_primitive() else {
        return value;
    };
    match value {
        QueryValue::Scalar(scalar) => {
            if let Some(error) = scalar.error {
                return QueryValue::error_of(target, error);
            }
            let source = scalar.value.clone();
            match coerce_scalar(scalar.value, primitive) {
                Ok(converted) => QueryValue::typed_scalar(target.clone(), converted),
                Err(_) => QueryValue::error_of(target, invalid_conversion(source, primitive)),
            }
        }
        other => other,
    }
}

impl QueryEvaluator<'_> {
    /// Evaluate `As`: a value of the target type, or a typed null
    pub fn eval_as(&self, expr: &TypeOperationExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(checked(self.evaluate_in(&expr.source, ctx)?), ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let element_type = ty.element_type().unwrap_or(ty);
        let cast = |value: QueryValue| {
            if element_type.as_primitive().is_some() {
                convert_value(value, element_type)
            } else if is_instance_of(&value, &expr.type_name) {
                value
            } else {
                QueryValue::null_of(element_type)
            }
        };
        Ok(match source {
            QueryValue::Collection(collection) => {
                let elements = collection.into_elements().into_iter().map(cast).collect();
                QueryCollectionValue::from_type(ty.clone(), elements).into()
            }
            value => cast(value),
        })
    }

    /// Evaluate `IsOf`; a null operand is not an instance of anything
    pub fn eval_is_of(&self, expr: &TypeOperationExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(checked(self.evaluate_in(&expr.source, ctx)?), ty);
        Ok(QueryValue::boolean(is_instance_of(&source, &expr.type_name)))
    }

    /// Evaluate `OfType`: the elements that are instances of the type
    pub fn eval_of_type(&self, expr: &TypeOperationExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = self.evaluate_in(&expr.source, ctx)?;
        if let Some(error) = source.evaluation_error() {
            return Ok(QueryValue::error_of(ty, error.clone()));
        }
        Ok(match source {
            QueryValue::Collection(collection) if collection.is_null() => QueryValue::null_of(ty),
            QueryValue::Collection(collection) => {
                let elements = collection
                    .into_elements()
                    .into_iter()
                    .filter(|element| is_instance_of(element, &expr.type_name))
                    .collect();
                QueryCollectionValue::from_type(ty.clone(), elements).into()
            }
            // OfType over a key lookup narrows a single entity
            value if is_instance_of(&value, &expr.type_name) => value,
            _ => QueryValue::null_of(ty),
        })
    }
}
