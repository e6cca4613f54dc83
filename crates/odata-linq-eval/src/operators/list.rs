//! Sequence Operators
//!
//! Implements: Where, Select, SelectMany, OrderBy/ThenBy, Distinct, Skip,
//! Take, Union, Concat, Except, Intersect, Join, GroupJoin, GroupBy
//!
//! Every operator over a null source yields a typed null; an evaluation
//! error raised for one element becomes the error of the whole result.

use crate::context::EvaluationContext;
use crate::error::{checked, structural_collection};
use crate::evaluator::QueryEvaluator;
use crate::operators::comparison::{order_values, values_equal};
use odata_linq_ast::{
    GroupByExpr, JoinExpr, LambdaOperatorExpr, OrderByExpr, PagingExpr, SetOperationExpr, SourceExpr,
};
use odata_linq_diagnostics::Result;
use odata_linq_types::{QueryCollectionValue, QueryRecordValue, QueryType, QueryValue};
use std::cmp::Ordering;

/// Binary set operators over sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    /// Distinct elements of both sequences
    Union,
    /// All elements of both sequences
    Concat,
    /// Distinct elements of the first sequence absent from the second
    Except,
    /// Distinct elements of the first sequence present in the second
    Intersect,
}

impl QueryEvaluator<'_> {
    /// Evaluate Where
    pub fn eval_where(&self, expr: &LambdaOperatorExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Where", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut elements = Vec::new();
        for element in source.into_elements() {
            if try_value!(self.eval_predicate(&expr.lambda, element.clone(), ctx)?, ty) {
                elements.push(element);
            }
        }
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate Select
    pub fn eval_select(&self, expr: &LambdaOperatorExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Select", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut elements = Vec::with_capacity(source.len());
        for element in source.into_elements() {
            let projected = self.apply_lambda(&expr.lambda, vec![element], ctx)?;
            elements.push(try_value!(checked(projected), ty));
        }
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate SelectMany; null inner collections contribute nothing
    pub fn eval_select_many(&self, expr: &LambdaOperatorExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "SelectMany", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut elements = Vec::new();
        for element in source.into_elements() {
            let inner = try_value!(checked(self.apply_lambda(&expr.lambda, vec![element], ctx)?), ty);
            match inner {
                QueryValue::Collection(collection) => elements.extend(collection.into_elements()),
                other => elements.push(other),
            }
        }
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate OrderBy with its ThenBy keys as a stable sort
    pub fn eval_order_by(&self, expr: &OrderByExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "OrderBy", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut keyed = Vec::with_capacity(source.len());
        for element in source.into_elements() {
            let mut keys = Vec::with_capacity(expr.keys.len());
            for key in &expr.keys {
                let value = try_value!(checked(self.apply_lambda(&key.selector, vec![element.clone()], ctx)?), ty);
                if matches!(value, QueryValue::Structural(_) | QueryValue::Collection(_)) {
                    return Ok(QueryValue::error_of(ty, structural_collection("OrderBy")));
                }
                keys.push(value);
            }
            keyed.push((keys, element));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&expr.keys)
                .map(|((x, y), key)| {
                    let ordering = order_values(x, y);
                    if key.descending { ordering.reverse() } else { ordering }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        let elements = keyed.into_iter().map(|(_, element)| element).collect();
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate Distinct, keeping first occurrences
    pub fn eval_distinct(&self, expr: &SourceExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Distinct", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let elements = distinct(source.into_elements());
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate Skip; a negative or null count skips nothing
    pub fn eval_skip(&self, expr: &PagingExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Skip", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let count = try_value!(self.eval_count(&expr.count, ctx)?, ty);
        let elements = source.into_elements().into_iter().skip(count).collect();
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate Take; a negative or null count takes nothing
    pub fn eval_take(&self, expr: &PagingExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "Take", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let count = try_value!(self.eval_count(&expr.count, ctx)?, ty);
        let elements = source.into_elements().into_iter().take(count).collect();
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate a set operator
    pub fn eval_set_operation(
        &self,
        operator: SetOperator,
        expr: &SetOperationExpr,
        ty: &QueryType,
        ctx: &mut EvaluationContext,
    ) -> Result<QueryValue> {
        let name = format!("{operator:?}");
        let first = try_value!(self.eval_collection(&expr.first, &name, ctx)?, ty);
        let second = try_value!(self.eval_collection(&expr.second, &name, ctx)?, ty);
        if first.is_null() || second.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let (first, second) = (first.into_elements(), second.into_elements());
        let contains = |elements: &[QueryValue], value: &QueryValue| elements.iter().any(|e| values_equal(e, value));
        let elements = match operator {
            SetOperator::Concat => first.into_iter().chain(second).collect(),
            SetOperator::Union => distinct(first.into_iter().chain(second).collect()),
            SetOperator::Except => distinct(first.into_iter().filter(|e| !contains(&second, e)).collect()),
            SetOperator::Intersect => distinct(first.into_iter().filter(|e| contains(&second, e)).collect()),
        };
        Ok(QueryCollectionValue::from_type(ty.clone(), elements).into())
    }

    /// Evaluate Join (`group == false`) or GroupJoin; null keys never match
    pub fn eval_join(&self, expr: &JoinExpr, group: bool, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let operator = if group { "GroupJoin" } else { "Join" };
        let outer = try_value!(self.eval_collection(&expr.outer, operator, ctx)?, ty);
        let inner = try_value!(self.eval_collection(&expr.inner, operator, ctx)?, ty);
        if outer.is_null() || inner.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let inner_type = inner.value_type().clone();

        let mut inner_keyed = Vec::with_capacity(inner.len());
        for element in inner.into_elements() {
            let key = try_value!(checked(self.apply_lambda(&expr.inner_key, vec![element.clone()], ctx)?), ty);
            inner_keyed.push((key, element));
        }

        let mut results = Vec::new();
        for element in outer.into_elements() {
            let key = try_value!(checked(self.apply_lambda(&expr.outer_key, vec![element.clone()], ctx)?), ty);
            let matches = inner_keyed
                .iter()
                .filter(|(inner_key, _)| !key.is_null() && values_equal(&key, inner_key))
                .map(|(_, inner)| inner.clone());
            if group {
                let joined = QueryCollectionValue::from_type(inner_type.clone(), matches.collect());
                let result = self.apply_lambda(&expr.result, vec![element, joined.into()], ctx)?;
                results.push(try_value!(checked(result), ty));
            } else {
                for inner in matches.collect::<Vec<_>>() {
                    let result = self.apply_lambda(&expr.result, vec![element.clone(), inner], ctx)?;
                    results.push(try_value!(checked(result), ty));
                }
            }
        }
        Ok(QueryCollectionValue::from_type(ty.clone(), results).into())
    }

    /// Evaluate GroupBy into `{Key, Elements}` records, groups in order of
    /// first appearance
    pub fn eval_group_by(&self, expr: &GroupByExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = try_value!(self.eval_collection(&expr.source, "GroupBy", ctx)?, ty);
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut groups: Vec<(QueryValue, Vec<QueryValue>)> = Vec::new();
        for element in source.into_elements() {
            let key = try_value!(checked(self.apply_lambda(&expr.key_selector, vec![element.clone()], ctx)?), ty);
            let grouped = match &expr.element_selector {
                Some(selector) => try_value!(checked(self.apply_lambda(selector, vec![element], ctx)?), ty),
                None => element,
            };
            match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
                Some((_, elements)) => elements.push(grouped),
                None => groups.push((key, vec![grouped])),
            }
        }

        let group_type = ty.element_type().cloned().unwrap_or(QueryType::Any);
        let elements_type = group_type
            .as_record()
            .and_then(|record| record.member("Elements"))
            .cloned()
            .unwrap_or_else(|| QueryType::collection(QueryType::Any));
        let records = groups
            .into_iter()
            .map(|(key, elements)| {
                let elements = QueryCollectionValue::from_type(elements_type.clone(), elements);
                QueryValue::Record(QueryRecordValue::new(group_type.clone(), vec![key, elements.into()]))
            })
            .collect();
        Ok(QueryCollectionValue::from_type(ty.clone(), records).into())
    }
}

fn distinct(elements: Vec<QueryValue>) -> Vec<QueryValue> {
    let mut unique: Vec<QueryValue> = Vec::with_capacity(elements.len());
    for element in elements {
        if !unique.iter().any(|u| values_equal(u, &element)) {
            unique.push(element);
        }
    }
    unique
}
