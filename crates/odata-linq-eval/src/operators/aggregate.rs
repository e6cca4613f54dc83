//! Aggregate and Element Operators
//!
//! Implements: Count, LongCount, Any, All, Min, Max, Sum, Average, First,
//! FirstOrDefault, Single, SingleOrDefault, Contains

use crate::context::EvaluationContext;
use crate::error::{Evaluated, checked, failed, more_than_one_element, no_elements, overflow, structural_collection};
use crate::evaluator::QueryEvaluator;
use crate::operators::arithmetic::arithmetic;
use crate::operators::comparison::{order_values, values_equal};
use crate::operators::type_ops::convert_value;
use odata_linq_ast::{AggregateExpr, BinaryOp, ContainsExpr};
use odata_linq_diagnostics::Result;
use odata_linq_types::{PrimitiveType, QueryType, QueryValue, ScalarValue};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Which end of the ordering Min/Max keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

/// Element operator variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOperator {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
}

impl ElementOperator {
    fn name(self) -> &'static str {
        match self {
            Self::First => "First",
            Self::FirstOrDefault => "FirstOrDefault",
            Self::Single => "Single",
            Self::SingleOrDefault => "SingleOrDefault",
        }
    }

    fn or_default(self) -> bool {
        matches!(self, Self::FirstOrDefault | Self::SingleOrDefault)
    }

    fn single(self) -> bool {
        matches!(self, Self::Single | Self::SingleOrDefault)
    }
}

impl QueryEvaluator<'_> {
    /// Evaluate Count/LongCount, counting matches of the optional predicate
    pub fn eval_count_operator(&self, expr: &AggregateExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let Some(elements) = try_value!(self.filtered(expr, "Count", ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        let count = elements.len();
        let value = match ty.as_primitive() {
            Some(PrimitiveType::Int64) => i64::try_from(count).map(ScalarValue::Int64).ok(),
            _ => i32::try_from(count).map(ScalarValue::Int32).ok(),
        };
        Ok(match value {
            Some(value) => QueryValue::typed_scalar(ty.clone(), value),
            None => QueryValue::error_of(ty, overflow("Count")),
        })
    }

    /// Evaluate Any, with or without a predicate
    pub fn eval_any(&self, expr: &AggregateExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let Some(elements) = try_value!(self.filtered(expr, "Any", ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        Ok(QueryValue::boolean(!elements.is_empty()))
    }

    /// Evaluate All; true over an empty sequence
    pub fn eval_all(&self, expr: &AggregateExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "All", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let Some(lambda) = &expr.lambda else {
            return Ok(QueryValue::error_of(ty, failed("All requires a predicate")));
        };
        for element in source.into_elements() {
            if !try_value!(self.eval_predicate(lambda, element, ctx)?, ty) {
                return Ok(QueryValue::boolean(false));
            }
        }
        Ok(QueryValue::boolean(true))
    }

    /// Evaluate Min or Max over primitive values; nulls are ignored
    pub fn eval_extremum(
        &self,
        extremum: Extremum,
        expr: &AggregateExpr,
        ty: &QueryType,
        ctx: &mut EvaluationContext,
    ) -> Result<QueryValue> {
        let operator = format!("{extremum:?}");
        let Some(values) = try_value!(self.selected(expr, &operator, ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        if values.iter().any(|v| !matches!(v, QueryValue::Scalar(_))) {
            return Ok(QueryValue::error_of(ty, structural_collection(&operator)));
        }
        if values.is_empty() {
            return Ok(QueryValue::error_of(ty, no_elements(&operator)));
        }
        let keep = match extremum {
            Extremum::Min => Ordering::Less,
            Extremum::Max => Ordering::Greater,
        };
        let best = values
            .into_iter()
            .filter(|v| !v.is_null())
            .reduce(|best, v| if order_values(&v, &best) == keep { v } else { best });
        Ok(match best {
            Some(value) => convert_value(value, ty),
            None => QueryValue::null_of(ty),
        })
    }

    /// Evaluate Sum; nulls are skipped and an empty sequence sums to zero
    pub fn eval_sum(&self, expr: &AggregateExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let Some(values) = try_value!(self.selected(expr, "Sum", ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        let mut total = convert_value(QueryValue::int32(0), ty);
        for value in values.iter().filter(|v| !v.is_null()) {
            total = try_value!(checked(arithmetic(BinaryOp::Add, &total, value, ty)), ty);
        }
        Ok(total)
    }

    /// Evaluate Average; an empty sequence has no average
    pub fn eval_average(&self, expr: &AggregateExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let Some(values) = try_value!(self.selected(expr, "Average", ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        if values.is_empty() {
            return Ok(QueryValue::error_of(ty, no_elements("Average")));
        }
        let numbers: Vec<&ScalarValue> = values
            .iter()
            .filter_map(QueryValue::as_scalar)
            .filter(|v| !v.is_null())
            .collect();
        if numbers.is_empty() {
            return Ok(QueryValue::null_of(ty));
        }
        let count = numbers.len();
        let average = match ty.as_primitive() {
            Some(PrimitiveType::Decimal) => numbers
                .iter()
                .map(|n| n.as_decimal())
                .try_fold(Decimal::ZERO, |acc, n| acc.checked_add(n?))
                .and_then(|sum| sum.checked_div(Decimal::from(count)))
                .map(ScalarValue::Decimal),
            primitive => numbers
                .iter()
                .map(|n| n.as_f64())
                .sum::<Option<f64>>()
                .map(|sum| sum / count as f64)
                .map(|avg| match primitive {
                    Some(PrimitiveType::Single) => ScalarValue::Single(avg as f32),
                    _ => ScalarValue::Double(avg),
                }),
        };
        Ok(match average {
            Some(value) => QueryValue::typed_scalar(ty.clone(), value),
            None => QueryValue::error_of(ty, overflow("Average")),
        })
    }

    /// Evaluate First, FirstOrDefault, Single or SingleOrDefault
    pub fn eval_element(
        &self,
        operator: ElementOperator,
        expr: &AggregateExpr,
        ty: &QueryType,
        ctx: &mut EvaluationContext,
    ) -> Result<QueryValue> {
        let name = operator.name();
        let Some(mut elements) = try_value!(self.filtered(expr, name, ctx)?, ty) else {
            return Ok(QueryValue::null_of(ty));
        };
        if operator.single() && elements.len() > 1 {
            return Ok(QueryValue::error_of(ty, more_than_one_element(name)));
        }
        if elements.is_empty() {
            return Ok(if operator.or_default() {
                QueryValue::null_of(ty)
            } else {
                QueryValue::error_of(ty, no_elements(name))
            });
        }
        Ok(elements.swap_remove(0))
    }

    /// Evaluate Contains with value equality
    pub fn eval_contains(&self, expr: &ContainsExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Contains", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let value = try_value!(checked(self.evaluate_in(&expr.value, ctx)?), ty);
        let found = source.elements().iter().any(|element| values_equal(element, &value));
        Ok(QueryValue::boolean(found))
    }

    /// Source elements matching the optional predicate; `None` for a null source
    fn filtered(
        &self,
        expr: &AggregateExpr,
        operator: &str,
        ctx: &mut EvaluationContext,
    ) -> Result<Evaluated<Option<Vec<QueryValue>>>> {
        let source = match self.eval_collection(&expr.source, operator, ctx)? {
            Ok(source) => source,
            Err(error) => return Ok(Err(error)),
        };
        if source.is_null() {
            return Ok(Ok(None));
        }
        let Some(lambda) = &expr.lambda else {
            return Ok(Ok(Some(source.into_elements())));
        };
        let mut elements = Vec::new();
        for element in source.into_elements() {
            match self.eval_predicate(lambda, element.clone(), ctx)? {
                Ok(true) => elements.push(element),
                Ok(false) => {}
                Err(error) => return Ok(Err(error)),
            }
        }
        Ok(Ok(Some(elements)))
    }

    /// Source elements mapped through the optional selector; `None` for a
    /// null source
    fn selected(
        &self,
        expr: &AggregateExpr,
        operator: &str,
        ctx: &mut EvaluationContext,
    ) -> Result<Evaluated<Option<Vec<QueryValue>>>> {
        let source = match self.eval_collection(&expr.source, operator, ctx)? {
            Ok(source) => source,
            Err(error) => return Ok(Err(error)),
        };
        if source.is_null() {
            return Ok(Ok(None));
        }
        let Some(lambda) = &expr.lambda else {
            return Ok(Ok(Some(source.into_elements())));
        };
        let mut values = Vec::with_capacity(source.len());
        for element in source.into_elements() {
            match checked(self.apply_lambda(lambda, vec![element], ctx)?) {
                Ok(value) => values.push(value),
                Err(error) => return Ok(Err(error)),
            }
        }
        Ok(Ok(Some(values)))
    }
}
