//! Query Evaluator
//!
//! This module provides the [`QueryEvaluator`] which evaluates resolved
//! query trees against an in-memory [`QueryDataSet`].

use crate::context::EvaluationContext;
use crate::error::{Evaluated, checked, failed, more_than_one_element, no_body};
use crate::operators::aggregate::{ElementOperator, Extremum};
use crate::operators::arithmetic::{arithmetic, negate};
use crate::operators::comparison::{compare, values_equal};
use crate::operators::list::SetOperator;
use crate::operators::logical::{self, boolean_value};
use crate::operators::type_ops::convert_value;
use crate::registry::FunctionRegistry;
use log::{debug, trace};
use odata_linq_ast::{
    BinaryExpr, BinaryOp, CanonicalCallExpr, CustomFunction, ExprRef, Expression, FunctionCallExpr,
    KeyExpr, PropertyExpr, ServiceOperationExpr, UnaryOp, call_function,
};
use odata_linq_diagnostics::{ODL0101, ODL0102, ODL0103, ODL0104, ODL0105, ODL0106, ODL0108, QueryError, Result};
use odata_linq_model::{EntityModelSchema, QueryDataSet};
use odata_linq_semantic::TypeResolver;
use odata_linq_types::{QueryCollectionValue, QueryRecordValue, QueryType, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Default limit on expression nesting
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Evaluates resolved query trees
///
/// Every node must carry its resolved type. Failures a service would
/// report for a well-formed query come back as typed nulls carrying an
/// [`EvaluationError`](odata_linq_types::EvaluationError); malformed trees
/// are `Err`.
#[derive(Debug, Clone)]
pub struct QueryEvaluator<'a> {
    schema: &'a EntityModelSchema,
    data: &'a QueryDataSet,
    registry: &'a FunctionRegistry,
    max_depth: usize,
}

impl<'a> QueryEvaluator<'a> {
    /// Create an evaluator with the standard canonical functions
    pub fn new(schema: &'a EntityModelSchema, data: &'a QueryDataSet) -> Self {
        Self {
            schema,
            data,
            registry: FunctionRegistry::standard(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Use a custom function registry
    pub fn with_registry(mut self, registry: &'a FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn schema(&self) -> &'a EntityModelSchema {
        self.schema
    }

    pub fn data(&self) -> &'a QueryDataSet {
        self.data
    }

    /// Evaluate a resolved expression
    pub fn evaluate(&self, expr: &ExprRef) -> Result<QueryValue> {
        debug!("Evaluating {} expression", expr.expr.name());
        let mut ctx = EvaluationContext::new(self.max_depth);
        self.evaluate_in(expr, &mut ctx)
    }

    /// Evaluate an expression within an existing context
    pub fn evaluate_in(&self, expr: &ExprRef, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        if !ctx.enter_recursion() {
            return Err(QueryError::contract(
                ODL0108,
                format!("Expression nesting exceeds the limit of {}", ctx.max_depth()),
            ));
        }
        let result = self.dispatch(expr, ctx);
        ctx.exit_recursion();
        result
    }

    fn dispatch(&self, expr: &ExprRef, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let ty = expr.resolved_type()?;
        match &expr.expr {
            // === Scalars and references ===
            Expression::Constant(c) => Ok(QueryValue::typed_scalar(ty.clone(), c.value.clone())),
            Expression::Null(_) => Ok(QueryValue::null_of(ty)),
            Expression::Parameter(p) => ctx.parameter(&p.name).cloned().ok_or_else(|| {
                QueryError::contract(ODL0102, format!("Parameter '{}' is not bound", p.name))
            }),
            Expression::Lambda(_) => Err(QueryError::contract(
                ODL0106,
                "Lambda expression outside of a query operator",
            )),
            Expression::Property(p) => self.eval_property(p, ty, ctx),
            Expression::Binary(b) => self.eval_binary(b, ty, ctx),
            Expression::Unary(u) => {
                let operand = self.evaluate_in(&u.operand, ctx)?;
                Ok(match u.op {
                    UnaryOp::Negate => negate(&operand, ty),
                    UnaryOp::Not => match operand.evaluation_error() {
                        Some(error) => QueryValue::error_of(ty, error.clone()),
                        None => boolean_value(logical::not(operand.as_bool())),
                    },
                })
            }
            Expression::Conditional(c) => {
                let condition = try_value!(checked(self.evaluate_in(&c.condition, ctx)?), ty);
                // A null test takes the false branch
                let branch = if condition.as_bool() == Some(true) {
                    &c.if_true
                } else {
                    &c.if_false
                };
                let value = self.evaluate_in(branch, ctx)?;
                Ok(convert_value(value, ty))
            }
            Expression::As(t) => self.eval_as(t, ty, ctx),
            Expression::IsOf(t) => self.eval_is_of(t, ty, ctx),
            Expression::Record(r) => {
                let mut members = Vec::with_capacity(r.members.len());
                for (_, member) in &r.members {
                    members.push(try_value!(checked(self.evaluate_in(member, ctx)?), ty));
                }
                Ok(QueryValue::Record(QueryRecordValue::new(ty.clone(), members)))
            }
            Expression::FunctionCall(call) => self.eval_function_call(call, ty, ctx),
            Expression::FunctionParameterRef(r) => ctx.argument(&r.name).cloned().ok_or_else(|| {
                QueryError::contract(ODL0102, format!("Function parameter '{}' is not bound", r.name))
            }),
            Expression::CanonicalCall(c) => self.eval_canonical_call(c, ty, ctx),

            // === Roots ===
            Expression::Root(r) => Ok(self.data.entity_set_value(self.schema, &r.entity_set)?.into()),
            Expression::ServiceOperation(op) => self.eval_service_operation(op, ty, ctx),

            // === Filtering, projection, ordering ===
            Expression::Where(e) => self.eval_where(e, ty, ctx),
            Expression::Select(e) => self.eval_select(e, ty, ctx),
            Expression::SelectMany(e) => self.eval_select_many(e, ty, ctx),
            Expression::OrderBy(e) => self.eval_order_by(e, ty, ctx),
            Expression::OfType(t) => self.eval_of_type(t, ty, ctx),
            Expression::Distinct(s) => self.eval_distinct(s, ty, ctx),

            // === Paging ===
            Expression::Skip(p) => self.eval_skip(p, ty, ctx),
            Expression::Take(p) => self.eval_take(p, ty, ctx),

            // === Aggregates and element operators ===
            Expression::Count(a) | Expression::LongCount(a) => self.eval_count_operator(a, ty, ctx),
            Expression::Any(a) => self.eval_any(a, ty, ctx),
            Expression::All(a) => self.eval_all(a, ty, ctx),
            Expression::Min(a) => self.eval_extremum(Extremum::Min, a, ty, ctx),
            Expression::Max(a) => self.eval_extremum(Extremum::Max, a, ty, ctx),
            Expression::Sum(a) => self.eval_sum(a, ty, ctx),
            Expression::Average(a) => self.eval_average(a, ty, ctx),
            Expression::First(a) => self.eval_element(ElementOperator::First, a, ty, ctx),
            Expression::FirstOrDefault(a) => self.eval_element(ElementOperator::FirstOrDefault, a, ty, ctx),
            Expression::Single(a) => self.eval_element(ElementOperator::Single, a, ty, ctx),
            Expression::SingleOrDefault(a) => self.eval_element(ElementOperator::SingleOrDefault, a, ty, ctx),
            Expression::Contains(c) => self.eval_contains(c, ty, ctx),

            // === Set operators ===
            Expression::Union(s) => self.eval_set_operation(SetOperator::Union, s, ty, ctx),
            Expression::Concat(s) => self.eval_set_operation(SetOperator::Concat, s, ty, ctx),
            Expression::Except(s) => self.eval_set_operation(SetOperator::Except, s, ty, ctx),
            Expression::Intersect(s) => self.eval_set_operation(SetOperator::Intersect, s, ty, ctx),

            // === Joining and grouping ===
            Expression::Join(j) => self.eval_join(j, false, ty, ctx),
            Expression::GroupJoin(j) => self.eval_join(j, true, ty, ctx),
            Expression::GroupBy(g) => self.eval_group_by(g, ty, ctx),

            // === Protocol operators ===
            Expression::Key(k) => self.eval_key(k, ty, ctx),
            Expression::Expand(e) => self.evaluate_in(&e.source, ctx),
            Expression::Links(s) | Expression::Value(s) | Expression::InlineCount(s) => {
                self.evaluate_in(&s.source, ctx)
            }
            Expression::AddQueryOption(o) => self.evaluate_in(&o.source, ctx),
        }
    }

    fn eval_property(&self, p: &PropertyExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let instance = try_value!(checked(self.evaluate_in(&p.instance, ctx)?), ty);
        if instance.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let member = match &instance {
            QueryValue::Structural(s) => s.member(&p.name),
            QueryValue::Record(r) => r.member(&p.name).cloned(),
            other => {
                return Err(QueryError::contract(
                    ODL0105,
                    format!("Cannot access '{}' on a value of type '{}'", p.name, other.value_type()),
                ));
            }
        };
        Ok(match member {
            Some(QueryValue::Link(link)) => self.data.resolve_link(&link),
            Some(value) => value,
            // Members of a derived type read through a base-typed row
            None => QueryValue::null_of(ty),
        })
    }

    fn eval_binary(&self, b: &BinaryExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let left = try_value!(checked(self.evaluate_in(&b.left, ctx)?), ty);
        match b.op {
            BinaryOp::And | BinaryOp::Or => {
                let left = left.as_bool();
                // Short-circuit on the dominating value
                let dominant = b.op == BinaryOp::Or;
                if left == Some(dominant) {
                    return Ok(QueryValue::boolean(dominant));
                }
                let right = try_value!(checked(self.evaluate_in(&b.right, ctx)?), ty).as_bool();
                Ok(boolean_value(if dominant {
                    logical::or(left, right)
                } else {
                    logical::and(left, right)
                }))
            }
            op if op.is_comparison() => {
                let right = try_value!(checked(self.evaluate_in(&b.right, ctx)?), ty);
                Ok(QueryValue::boolean(compare(op, &left, &right)))
            }
            op => {
                let right = self.evaluate_in(&b.right, ctx)?;
                Ok(arithmetic(op, &left, &right, ty))
            }
        }
    }

    fn eval_function_call(&self, call: &FunctionCallExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let function = &call.function;
        let Some(body) = &function.body else {
            return Ok(QueryValue::error_of(ty, no_body(&function.full_name())));
        };
        if call.arguments.len() != function.parameters.len() {
            return Err(QueryError::contract(
                ODL0104,
                format!(
                    "Function '{}' expects {} argument(s), got {}",
                    function.full_name(),
                    function.parameters.len(),
                    call.arguments.len()
                ),
            ));
        }
        let mut arguments = HashMap::with_capacity(call.arguments.len());
        for (parameter, argument) in function.parameters.iter().zip(&call.arguments) {
            let value = self.evaluate_in(argument, ctx)?;
            arguments.insert(parameter.name.clone(), value);
        }
        trace!("Evaluating body of {}", function.full_name());
        ctx.push_arguments(arguments);
        let result = self.evaluate_in(body, ctx);
        ctx.pop_arguments();
        Ok(convert_value(result?, ty))
    }

    fn eval_canonical_call(&self, c: &CanonicalCallExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let mut arguments = Vec::with_capacity(c.arguments.len());
        for argument in &c.arguments {
            let value = try_value!(checked(self.evaluate_in(argument, ctx)?), ty);
            let scalar = value.as_scalar().cloned().ok_or_else(|| {
                QueryError::contract(
                    ODL0103,
                    format!("Function '{}' requires primitive arguments", c.function.uri_name()),
                )
            })?;
            arguments.push(scalar);
        }
        let result = try_value!(self.registry.invoke(c.function, &arguments), ty);
        if result.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        Ok(convert_value(QueryValue::scalar(result), ty))
    }

    /// Evaluate a service operation through its in-memory body
    fn eval_service_operation(&self, op: &ServiceOperationExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let operation = &op.operation;
        if operation.is_void() {
            return Ok(QueryValue::null_of(&QueryType::Void));
        }
        let Some(body) = &operation.body else {
            return Ok(QueryValue::error_of(ty, no_body(&operation.name)));
        };
        let function = CustomFunction::new("", operation.name.clone(), operation.parameters.clone(), ty.clone())
            .with_body(Arc::clone(body));
        let call = call_function(Arc::new(function), op.arguments.clone());
        let resolved = TypeResolver::new(self.schema)
            .with_max_depth(self.max_depth)
            .resolve_types(&call)?;
        self.evaluate_in(&resolved, ctx)
    }

    /// Evaluate a key lookup: the matching elements, collapsed to a single
    /// entity when the node is typed as one
    fn eval_key(&self, k: &KeyExpr, ty: &QueryType, ctx: &mut EvaluationContext) -> Result<QueryValue> {
        let source = match self.evaluate_in(&k.source, ctx)? {
            QueryValue::Collection(collection) => collection,
            other => {
                return Err(QueryError::contract(
                    ODL0101,
                    format!("Key lookup requires a collection, found '{}'", other.value_type()),
                ));
            }
        };
        if let Some(error) = source.evaluation_error() {
            return Ok(QueryValue::error_of(ty, error.clone()));
        }
        if source.is_null() {
            return Ok(QueryValue::null_of(ty));
        }
        let mut keys = Vec::with_capacity(k.values.len());
        for (name, value) in &k.values {
            keys.push((name, try_value!(checked(self.evaluate_in(value, ctx)?), ty)));
        }
        let matches: Vec<QueryValue> = source
            .into_elements()
            .into_iter()
            .filter(|element| {
                let Some(entity) = element.as_structural() else {
                    return false;
                };
                keys.iter().all(|(name, expected)| {
                    entity
                        .member_ref(name)
                        .is_some_and(|actual| values_equal(actual, expected))
                })
            })
            .collect();
        if ty.is_collection() {
            return Ok(QueryCollectionValue::from_type(ty.clone(), matches).into());
        }
        Ok(collapse_singleton(matches, ty, "Key"))
    }

    // === Helpers shared by the operator modules ===

    /// Evaluate an operand that must be a collection
    pub(crate) fn eval_collection(
        &self,
        expr: &ExprRef,
        operator: &str,
        ctx: &mut EvaluationContext,
    ) -> Result<Evaluated<QueryCollectionValue>> {
        match self.evaluate_in(expr, ctx)? {
            QueryValue::Collection(collection) => Ok(match collection.evaluation_error() {
                Some(error) => Err(error.clone()),
                None => Ok(collection),
            }),
            other => match other.evaluation_error() {
                Some(error) => Ok(Err(error.clone())),
                None => Err(QueryError::contract(
                    ODL0103,
                    format!("{operator} requires a collection source, found '{}'", other.value_type()),
                )),
            },
        }
    }

    /// Bind lambda parameters to `arguments` and evaluate the body
    pub(crate) fn apply_lambda(
        &self,
        lambda: &ExprRef,
        arguments: Vec<QueryValue>,
        ctx: &mut EvaluationContext,
    ) -> Result<QueryValue> {
        let Some(l) = lambda.expr.as_lambda() else {
            return Err(QueryError::contract(
                ODL0106,
                format!("Expected a lambda, found {}", lambda.expr.name()),
            ));
        };
        if l.parameters.len() != arguments.len() {
            return Err(QueryError::contract(
                ODL0106,
                format!(
                    "Lambda takes {} parameter(s), applied to {}",
                    l.parameters.len(),
                    arguments.len()
                ),
            ));
        }
        ctx.push_scope(l.parameters.iter().cloned().zip(arguments).collect());
        let result = self.evaluate_in(&l.body, ctx);
        ctx.pop_scope();
        result
    }

    /// Apply a predicate; null counts as false
    pub(crate) fn eval_predicate(
        &self,
        lambda: &ExprRef,
        element: QueryValue,
        ctx: &mut EvaluationContext,
    ) -> Result<Evaluated<bool>> {
        let value = self.apply_lambda(lambda, vec![element], ctx)?;
        Ok(checked(value).map(|v| v.as_bool() == Some(true)))
    }

    /// Evaluate a Skip/Take count; negative and null counts are zero
    pub(crate) fn eval_count(&self, expr: &ExprRef, ctx: &mut EvaluationContext) -> Result<Evaluated<usize>> {
        let value = match checked(self.evaluate_in(expr, ctx)?) {
            Ok(value) => value,
            Err(error) => return Ok(Err(error)),
        };
        if value.is_null() {
            return Ok(Ok(0));
        }
        Ok(match value.as_scalar().and_then(|s| s.as_i64()) {
            Some(count) => Ok(usize::try_from(count.max(0)).unwrap_or(usize::MAX)),
            None => Err(failed("Paging count must be an integer")),
        })
    }
}

/// Collapse the result of a single-entity lookup: no element is a typed
/// null, more than one an evaluation error
pub fn collapse_singleton(elements: Vec<QueryValue>, ty: &QueryType, operator: &str) -> QueryValue {
    let element_type = ty.element_type().unwrap_or(ty);
    let mut elements = elements.into_iter();
    match (elements.next(), elements.next()) {
        (None, _) => QueryValue::null_of(element_type),
        (Some(single), None) => single,
        (Some(_), Some(_)) => QueryValue::error_of(element_type, more_than_one_element(operator)),
    }
}
