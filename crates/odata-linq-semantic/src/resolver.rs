//! Type resolution
//!
//! Assigns a [`QueryType`] to every node of a query tree. Entity sets,
//! members and type names are looked up in the [`EntityModelSchema`];
//! lambda parameters are typed from the element type of the operator that
//! binds them.
//!
//! A `Key` lookup keeps the collection type of its source, except where it
//! is the instance of a property access: there it (and any `Links`,
//! `OfType` or `As` wrapped around it) yields a single element.

use crate::ScopeManager;
use log::{debug, trace};
use odata_linq_ast::{
    AddQueryOptionExpr, AggregateExpr, BinaryExpr, BinaryOp, CanonicalCallExpr,
    CanonicalFunction, ConditionalExpr, ContainsExpr, CustomFunction, ExpandExpr, ExprRef,
    Expression, FunctionCallExpr, GroupByExpr, JoinExpr, KeyExpr, LambdaExpr, LambdaOperatorExpr,
    OrderByExpr, OrderingKey, PagingExpr, PropertyExpr, QueryExpression, RecordExpr,
    ServiceOperationExpr, SetOperationExpr, SourceExpr, TypeOperationExpr, UnaryExpr, UnaryOp,
};
use odata_linq_diagnostics::{
    ODL0003, ODL0101, ODL0102, ODL0103, ODL0104, ODL0106, ODL0108, ODL0302, QueryError, Result,
};
use odata_linq_model::EntityModelSchema;
use odata_linq_types::{PrimitiveType, QueryType, RecordType, TypeCoercer};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const DEFAULT_MAX_DEPTH: usize = 256;

/// Populates the type of every expression node
#[derive(Debug, Clone)]
pub struct TypeResolver<'a> {
    schema: &'a EntityModelSchema,
    coercer: TypeCoercer,
    max_depth: usize,
}

/// Per-call resolution state
#[derive(Default)]
struct Context {
    parameters: ScopeManager<QueryType>,
    function_parameters: Vec<HashMap<String, QueryType>>,
    call_stack: Vec<String>,
    depth: usize,
}

impl<'a> TypeResolver<'a> {
    pub fn new(schema: &'a EntityModelSchema) -> Self {
        Self {
            schema,
            coercer: TypeCoercer::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve the types of `expr` and all of its descendants
    pub fn resolve_types(&self, expr: &ExprRef) -> Result<ExprRef> {
        let mut ctx = Context::default();
        let resolved = self.resolve(&mut ctx, expr)?;
        debug!(
            "Resolved {} expression to {}",
            resolved.expr.name(),
            resolved
                .expression_type()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
        Ok(resolved)
    }

    fn resolve(&self, ctx: &mut Context, expr: &ExprRef) -> Result<ExprRef> {
        if ctx.depth >= self.max_depth {
            return Err(QueryError::contract(
                ODL0108,
                format!("Expression nesting exceeds the limit of {}", self.max_depth),
            ));
        }
        ctx.depth += 1;
        let result = self.resolve_node(ctx, expr);
        ctx.depth -= 1;
        result
    }

    fn resolve_node(&self, ctx: &mut Context, expr: &ExprRef) -> Result<ExprRef> {
        let (node, ty) = match &expr.expr {
            // === Scalars and references ===
            Expression::Constant(c) => (
                expr.expr.clone(),
                c.value
                    .primitive_type()
                    .map(QueryType::Primitive)
                    .unwrap_or(QueryType::Any),
            ),
            Expression::Null(n) => (expr.expr.clone(), n.null_type.clone()),
            Expression::Parameter(p) => {
                let ty = ctx.parameters.lookup(&p.name).cloned().ok_or_else(|| {
                    QueryError::contract(
                        ODL0102,
                        format!("Parameter '{}' is not bound by an enclosing lambda", p.name),
                    )
                })?;
                (expr.expr.clone(), ty)
            }
            Expression::Lambda(_) => {
                return Err(QueryError::contract(
                    ODL0106,
                    "Lambda expression outside of a query operator",
                ));
            }
            Expression::Property(p) => {
                let instance = self.resolve_as_property_instance(ctx, &p.instance)?;
                let ty = self.schema.member_type(instance.resolved_type()?, &p.name)?;
                let node = Expression::Property(PropertyExpr {
                    instance,
                    name: p.name.clone(),
                });
                (node, ty)
            }
            Expression::Binary(b) => {
                let left = self.resolve(ctx, &b.left)?;
                let right = self.resolve(ctx, &b.right)?;
                let ty = self.binary_type(b.op, left.resolved_type()?, right.resolved_type()?)?;
                (Expression::Binary(BinaryExpr { left, op: b.op, right }), ty)
            }
            Expression::Unary(u) => {
                let operand = self.resolve(ctx, &u.operand)?;
                let operand_type = operand.resolved_type()?.clone();
                let ty = match u.op {
                    UnaryOp::Not => {
                        expect_boolean(&operand_type, "not")?;
                        QueryType::boolean()
                    }
                    UnaryOp::Negate if operand_type.is_numeric() || operand_type.is_any() => {
                        operand_type
                    }
                    UnaryOp::Negate => {
                        return Err(QueryError::contract(
                            ODL0103,
                            format!("Cannot negate a value of type '{operand_type}'"),
                        ));
                    }
                };
                (Expression::Unary(UnaryExpr { op: u.op, operand }), ty)
            }
            Expression::Conditional(c) => {
                let condition = self.resolve(ctx, &c.condition)?;
                expect_boolean(condition.resolved_type()?, "conditional test")?;
                let if_true = self.resolve(ctx, &c.if_true)?;
                let if_false = self.resolve(ctx, &c.if_false)?;
                let (t, f) = (if_true.resolved_type()?, if_false.resolved_type()?);
                let ty = self
                    .coercer
                    .common_type(t, f)
                    .or_else(|| self.coercer.common_type(f, t))
                    .ok_or_else(|| {
                        QueryError::contract(
                            ODL0103,
                            format!("Conditional branches have incompatible types '{t}' and '{f}'"),
                        )
                    })?;
                let node = Expression::Conditional(ConditionalExpr {
                    condition,
                    if_true,
                    if_false,
                });
                (node, ty)
            }
            Expression::As(t) => {
                let source = self.resolve(ctx, &t.source)?;
                let ty = self.cast_type(source.resolved_type()?, &t.type_name)?;
                (Expression::As(type_operation(source, t)), ty)
            }
            Expression::IsOf(t) => {
                let source = self.resolve(ctx, &t.source)?;
                self.schema.resolve_type_name(&t.type_name)?;
                (Expression::IsOf(type_operation(source, t)), QueryType::boolean())
            }
            Expression::Record(r) => {
                let members = r
                    .members
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.resolve(ctx, value)?)))
                    .collect::<Result<Vec<_>>>()?;
                let record = RecordType::new(
                    members
                        .iter()
                        .map(|(name, value)| Ok((name.clone(), value.resolved_type()?.clone())))
                        .collect::<Result<Vec<_>>>()?,
                );
                (Expression::Record(RecordExpr { members }), QueryType::record(record))
            }
            Expression::FunctionCall(call) => self.resolve_function_call(ctx, call)?,
            Expression::FunctionParameterRef(r) => {
                let ty = ctx
                    .function_parameters
                    .last()
                    .and_then(|bindings| bindings.get(&r.name))
                    .cloned()
                    .ok_or_else(|| {
                        QueryError::contract(
                            ODL0102,
                            format!("Function parameter '{}' used outside of its function", r.name),
                        )
                    })?;
                (expr.expr.clone(), ty)
            }
            Expression::CanonicalCall(c) => {
                let arguments = self.resolve_all(ctx, &c.arguments)?;
                let ty = canonical_type(c.function, &arguments)?;
                let node = Expression::CanonicalCall(CanonicalCallExpr {
                    function: c.function,
                    arguments,
                });
                (node, ty)
            }

            // === Roots ===
            Expression::Root(r) => (expr.expr.clone(), self.schema.entity_set_type(&r.entity_set)?),
            Expression::ServiceOperation(op) => {
                let Some(return_type) = &op.operation.return_type else {
                    trace!("Skipping type resolution of void operation {}", op.operation.name);
                    return Ok(QueryExpression::typed(expr.expr.clone(), QueryType::Void));
                };
                if op.arguments.len() != op.operation.parameters.len() {
                    return Err(QueryError::contract(
                        ODL0104,
                        format!(
                            "Service operation '{}' expects {} argument(s), got {}",
                            op.operation.name,
                            op.operation.parameters.len(),
                            op.arguments.len()
                        ),
                    ));
                }
                let arguments = self.resolve_all(ctx, &op.arguments)?;
                let node = Expression::ServiceOperation(ServiceOperationExpr {
                    operation: Arc::clone(&op.operation),
                    arguments,
                });
                (node, return_type.clone())
            }

            // === Filtering, projection, ordering ===
            Expression::Where(e) => {
                let (payload, source_type, body_type) = self.resolve_lambda_operator(ctx, e, "Where")?;
                expect_boolean(&body_type, "Where predicate")?;
                (Expression::Where(payload), source_type)
            }
            Expression::Select(e) => {
                let (payload, _, body_type) = self.resolve_lambda_operator(ctx, e, "Select")?;
                (Expression::Select(payload), QueryType::collection(body_type))
            }
            Expression::SelectMany(e) => {
                let (payload, _, body_type) = self.resolve_lambda_operator(ctx, e, "SelectMany")?;
                let element = body_type.element_type().cloned().ok_or_else(|| {
                    QueryError::contract(
                        ODL0103,
                        format!("SelectMany selector must return a collection, found '{body_type}'"),
                    )
                })?;
                (Expression::SelectMany(payload), QueryType::collection(element))
            }
            Expression::OrderBy(o) => {
                let source = self.resolve(ctx, &o.source)?;
                let element = element_type(&source, "OrderBy")?;
                let keys = o
                    .keys
                    .iter()
                    .map(|key| {
                        Ok(OrderingKey {
                            selector: self.resolve_lambda(ctx, &key.selector, &[element.clone()])?,
                            descending: key.descending,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let ty = source.resolved_type()?.clone();
                (Expression::OrderBy(OrderByExpr { source, keys }), ty)
            }
            Expression::OfType(t) => {
                let source = self.resolve(ctx, &t.source)?;
                element_type(&source, "OfType")?;
                let ty = self.cast_type(source.resolved_type()?, &t.type_name)?;
                (Expression::OfType(type_operation(source, t)), ty)
            }
            Expression::Distinct(s) => {
                let source = self.resolve(ctx, &s.source)?;
                element_type(&source, "Distinct")?;
                let ty = source.resolved_type()?.clone();
                (Expression::Distinct(SourceExpr { source }), ty)
            }

            // === Paging ===
            Expression::Skip(p) => {
                let (payload, ty) = self.resolve_paging(ctx, p, "Skip")?;
                (Expression::Skip(payload), ty)
            }
            Expression::Take(p) => {
                let (payload, ty) = self.resolve_paging(ctx, p, "Take")?;
                (Expression::Take(payload), ty)
            }

            // === Aggregates and element operators ===
            Expression::Count(a) => {
                let (payload, _, _) = self.resolve_aggregate(ctx, a, "Count")?;
                (Expression::Count(payload), QueryType::int32())
            }
            Expression::LongCount(a) => {
                let (payload, _, _) = self.resolve_aggregate(ctx, a, "LongCount")?;
                (Expression::LongCount(payload), QueryType::int64())
            }
            Expression::Any(a) => {
                let (payload, _, body) = self.resolve_aggregate(ctx, a, "Any")?;
                if let Some(body) = &body {
                    expect_boolean(body, "Any predicate")?;
                }
                (Expression::Any(payload), QueryType::boolean())
            }
            Expression::All(a) => {
                let (payload, _, body) = self.resolve_aggregate(ctx, a, "All")?;
                let body = body.ok_or_else(|| {
                    QueryError::contract(ODL0106, "All requires a predicate")
                })?;
                expect_boolean(&body, "All predicate")?;
                (Expression::All(payload), QueryType::boolean())
            }
            Expression::Min(a) => {
                let (payload, element, body) = self.resolve_aggregate(ctx, a, "Min")?;
                (Expression::Min(payload), body.unwrap_or(element))
            }
            Expression::Max(a) => {
                let (payload, element, body) = self.resolve_aggregate(ctx, a, "Max")?;
                (Expression::Max(payload), body.unwrap_or(element))
            }
            Expression::Sum(a) => {
                let (payload, element, body) = self.resolve_aggregate(ctx, a, "Sum")?;
                let ty = expect_numeric(body.unwrap_or(element), "Sum")?;
                (Expression::Sum(payload), ty)
            }
            Expression::Average(a) => {
                let (payload, element, body) = self.resolve_aggregate(ctx, a, "Average")?;
                let ty = match expect_numeric(body.unwrap_or(element), "Average")? {
                    QueryType::Primitive(PrimitiveType::Decimal) => {
                        QueryType::Primitive(PrimitiveType::Decimal)
                    }
                    QueryType::Primitive(PrimitiveType::Single) => {
                        QueryType::Primitive(PrimitiveType::Single)
                    }
                    _ => QueryType::Primitive(PrimitiveType::Double),
                };
                (Expression::Average(payload), ty)
            }
            Expression::First(a) => {
                let (payload, element, _) = self.resolve_aggregate(ctx, a, "First")?;
                (Expression::First(payload), element)
            }
            Expression::FirstOrDefault(a) => {
                let (payload, element, _) = self.resolve_aggregate(ctx, a, "FirstOrDefault")?;
                (Expression::FirstOrDefault(payload), element)
            }
            Expression::Single(a) => {
                let (payload, element, _) = self.resolve_aggregate(ctx, a, "Single")?;
                (Expression::Single(payload), element)
            }
            Expression::SingleOrDefault(a) => {
                let (payload, element, _) = self.resolve_aggregate(ctx, a, "SingleOrDefault")?;
                (Expression::SingleOrDefault(payload), element)
            }
            Expression::Contains(c) => {
                let source = self.resolve(ctx, &c.source)?;
                element_type(&source, "Contains")?;
                let value = self.resolve(ctx, &c.value)?;
                (Expression::Contains(ContainsExpr { source, value }), QueryType::boolean())
            }

            // === Set operators ===
            Expression::Union(s) => {
                let (payload, ty) = self.resolve_set_operation(ctx, s, "Union")?;
                (Expression::Union(payload), ty)
            }
            Expression::Concat(s) => {
                let (payload, ty) = self.resolve_set_operation(ctx, s, "Concat")?;
                (Expression::Concat(payload), ty)
            }
            Expression::Except(s) => {
                let (payload, ty) = self.resolve_set_operation(ctx, s, "Except")?;
                (Expression::Except(payload), ty)
            }
            Expression::Intersect(s) => {
                let (payload, ty) = self.resolve_set_operation(ctx, s, "Intersect")?;
                (Expression::Intersect(payload), ty)
            }

            // === Joining and grouping ===
            Expression::Join(j) => {
                let (payload, ty) = self.resolve_join(ctx, j, false)?;
                (Expression::Join(payload), ty)
            }
            Expression::GroupJoin(j) => {
                let (payload, ty) = self.resolve_join(ctx, j, true)?;
                (Expression::GroupJoin(payload), ty)
            }
            Expression::GroupBy(g) => {
                let source = self.resolve(ctx, &g.source)?;
                let element = element_type(&source, "GroupBy")?;
                let key_selector = self.resolve_lambda(ctx, &g.key_selector, &[element.clone()])?;
                let element_selector = g
                    .element_selector
                    .as_ref()
                    .map(|selector| self.resolve_lambda(ctx, selector, &[element.clone()]))
                    .transpose()?;
                let grouped = match &element_selector {
                    Some(selector) => selector.resolved_type()?.clone(),
                    None => element,
                };
                let group = RecordType::new([
                    ("Key".to_string(), key_selector.resolved_type()?.clone()),
                    ("Elements".to_string(), QueryType::collection(grouped)),
                ]);
                let node = Expression::GroupBy(GroupByExpr {
                    source,
                    key_selector,
                    element_selector,
                });
                (node, QueryType::collection(QueryType::record(group)))
            }

            // === Protocol operators ===
            Expression::Key(k) => {
                let payload = self.resolve_key(ctx, k)?;
                let ty = payload.source.resolved_type()?.clone();
                (Expression::Key(payload), ty)
            }
            Expression::Expand(e) => {
                let source = self.resolve(ctx, &e.source)?;
                let ty = source.resolved_type()?.clone();
                let node = Expression::Expand(ExpandExpr {
                    source,
                    expand: e.expand.clone(),
                });
                (node, ty)
            }
            Expression::Links(s) => {
                let source = self.resolve(ctx, &s.source)?;
                let ty = source.resolved_type()?.clone();
                (Expression::Links(SourceExpr { source }), ty)
            }
            Expression::Value(s) => {
                let source = self.resolve(ctx, &s.source)?;
                let ty = source.resolved_type()?.clone();
                (Expression::Value(SourceExpr { source }), ty)
            }
            Expression::AddQueryOption(o) => {
                let source = self.resolve(ctx, &o.source)?;
                let value = self.resolve(ctx, &o.value)?;
                let ty = source.resolved_type()?.clone();
                let node = Expression::AddQueryOption(AddQueryOptionExpr {
                    source,
                    name: o.name.clone(),
                    value,
                });
                (node, ty)
            }
            Expression::InlineCount(s) => {
                let source = self.resolve(ctx, &s.source)?;
                let ty = source.resolved_type()?.clone();
                (Expression::InlineCount(SourceExpr { source }), ty)
            }
        };
        Ok(QueryExpression::typed(node, ty))
    }

    /// Resolve the instance of a property access: Key lookups (and Links,
    /// OfType or As chains over them) yield a single element here
    fn resolve_as_property_instance(&self, ctx: &mut Context, expr: &ExprRef) -> Result<ExprRef> {
        match &expr.expr {
            Expression::Key(k) => {
                let payload = self.resolve_key(ctx, k)?;
                let element = element_type(&payload.source, "Key")?;
                trace!("Key used as property instance narrows to {element}");
                Ok(QueryExpression::typed(Expression::Key(payload), element))
            }
            Expression::Links(s) => {
                let source = self.resolve_as_property_instance(ctx, &s.source)?;
                let ty = source.resolved_type()?.clone();
                Ok(QueryExpression::typed(Expression::Links(SourceExpr { source }), ty))
            }
            Expression::OfType(t) => {
                let source = self.resolve_as_property_instance(ctx, &t.source)?;
                let ty = self.cast_type(source.resolved_type()?, &t.type_name)?;
                Ok(QueryExpression::typed(Expression::OfType(type_operation(source, t)), ty))
            }
            Expression::As(t) => {
                let source = self.resolve_as_property_instance(ctx, &t.source)?;
                let ty = self.cast_type(source.resolved_type()?, &t.type_name)?;
                Ok(QueryExpression::typed(Expression::As(type_operation(source, t)), ty))
            }
            _ => self.resolve(ctx, expr),
        }
    }

    fn resolve_key(&self, ctx: &mut Context, key: &KeyExpr) -> Result<KeyExpr> {
        let source = self.resolve(ctx, &key.source)?;
        let element = element_type(&source, "Key").map_err(|_| {
            QueryError::contract(
                ODL0101,
                format!(
                    "Key lookup requires a collection source, found '{}'",
                    source
                        .expression_type()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                ),
            )
        })?;
        if let Some(entity) = element.as_entity() {
            for (name, _) in &key.values {
                if !entity.key.contains(name) {
                    return Err(QueryError::metadata_for_type(
                        ODL0302,
                        format!("'{name}' is not a key property of '{}'", entity.full_name()),
                        entity.full_name(),
                    ));
                }
            }
        }
        let values = key
            .values
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.resolve(ctx, value)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(KeyExpr { source, values })
    }

    /// Resolve a lambda with the given parameter types
    fn resolve_lambda(
        &self,
        ctx: &mut Context,
        expr: &ExprRef,
        parameter_types: &[QueryType],
    ) -> Result<ExprRef> {
        let Expression::Lambda(lambda) = &expr.expr else {
            return Err(QueryError::contract(
                ODL0106,
                format!("Expected a lambda, found {}", expr.expr.name()),
            ));
        };
        if lambda.parameters.len() != parameter_types.len() {
            return Err(QueryError::contract(
                ODL0106,
                format!(
                    "Lambda declares {} parameter(s) where {} are expected",
                    lambda.parameters.len(),
                    parameter_types.len()
                ),
            ));
        }

        ctx.parameters.enter();
        for (name, ty) in lambda.parameters.iter().zip(parameter_types) {
            ctx.parameters.define(name.clone(), ty.clone());
        }
        let body = self.resolve(ctx, &lambda.body);
        ctx.parameters.leave();
        let body = body?;

        let ty = body.resolved_type()?.clone();
        Ok(QueryExpression::typed(
            Expression::Lambda(LambdaExpr {
                parameters: lambda.parameters.clone(),
                body,
            }),
            ty,
        ))
    }

    /// Where, Select and SelectMany: returns the payload, the source type
    /// and the lambda body type
    fn resolve_lambda_operator(
        &self,
        ctx: &mut Context,
        e: &LambdaOperatorExpr,
        operator: &str,
    ) -> Result<(LambdaOperatorExpr, QueryType, QueryType)> {
        let source = self.resolve(ctx, &e.source)?;
        let element = element_type(&source, operator)?;
        let lambda = self.resolve_lambda(ctx, &e.lambda, &[element])?;
        let source_type = source.resolved_type()?.clone();
        let body_type = lambda.resolved_type()?.clone();
        Ok((LambdaOperatorExpr { source, lambda }, source_type, body_type))
    }

    fn resolve_paging(
        &self,
        ctx: &mut Context,
        p: &PagingExpr,
        operator: &str,
    ) -> Result<(PagingExpr, QueryType)> {
        let source = self.resolve(ctx, &p.source)?;
        element_type(&source, operator)?;
        let count = self.resolve(ctx, &p.count)?;
        let count_type = count.resolved_type()?;
        if !count_type.as_primitive().is_some_and(|p| p.is_integral()) {
            return Err(QueryError::contract(
                ODL0103,
                format!("{operator} count must be integral, found '{count_type}'"),
            ));
        }
        let ty = source.resolved_type()?.clone();
        Ok((PagingExpr { source, count }, ty))
    }

    /// Returns the payload, the element type and the lambda body type
    fn resolve_aggregate(
        &self,
        ctx: &mut Context,
        a: &AggregateExpr,
        operator: &str,
    ) -> Result<(AggregateExpr, QueryType, Option<QueryType>)> {
        let source = self.resolve(ctx, &a.source)?;
        let element = element_type(&source, operator)?;
        let lambda = a
            .lambda
            .as_ref()
            .map(|l| self.resolve_lambda(ctx, l, &[element.clone()]))
            .transpose()?;
        let body_type = lambda
            .as_ref()
            .map(|l| l.resolved_type().cloned())
            .transpose()?;
        Ok((AggregateExpr { source, lambda }, element, body_type))
    }

    fn resolve_set_operation(
        &self,
        ctx: &mut Context,
        s: &SetOperationExpr,
        operator: &str,
    ) -> Result<(SetOperationExpr, QueryType)> {
        let first = self.resolve(ctx, &s.first)?;
        let second = self.resolve(ctx, &s.second)?;
        element_type(&first, operator)?;
        element_type(&second, operator)?;
        let ty = first.resolved_type()?.clone();
        Ok((SetOperationExpr { first, second }, ty))
    }

    fn resolve_join(
        &self,
        ctx: &mut Context,
        j: &JoinExpr,
        group: bool,
    ) -> Result<(JoinExpr, QueryType)> {
        let operator = if group { "GroupJoin" } else { "Join" };
        let outer = self.resolve(ctx, &j.outer)?;
        let inner = self.resolve(ctx, &j.inner)?;
        let outer_element = element_type(&outer, operator)?;
        let inner_element = element_type(&inner, operator)?;
        let outer_key = self.resolve_lambda(ctx, &j.outer_key, &[outer_element.clone()])?;
        let inner_key = self.resolve_lambda(ctx, &j.inner_key, &[inner_element.clone()])?;
        let joined = if group {
            QueryType::collection(inner_element)
        } else {
            inner_element
        };
        let result = self.resolve_lambda(ctx, &j.result, &[outer_element, joined])?;
        let ty = QueryType::collection(result.resolved_type()?.clone());
        let payload = JoinExpr {
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        };
        Ok((payload, ty))
    }

    fn resolve_function_call(
        &self,
        ctx: &mut Context,
        call: &FunctionCallExpr,
    ) -> Result<(Expression, QueryType)> {
        let function = &call.function;
        let name = function.full_name();
        if call.arguments.len() != function.parameters.len() {
            return Err(QueryError::contract(
                ODL0104,
                format!(
                    "Function '{name}' expects {} argument(s), got {}",
                    function.parameters.len(),
                    call.arguments.len()
                ),
            ));
        }
        let arguments = self.resolve_all(ctx, &call.arguments)?;

        let resolved_function = match &function.body {
            Some(body) => {
                if ctx.call_stack.contains(&name) {
                    return Err(QueryError::not_supported(
                        ODL0003,
                        format!("Recursive call to function '{name}' is not supported"),
                    ));
                }
                let bindings = function
                    .parameters
                    .iter()
                    .map(|p| (p.name.clone(), p.parameter_type.clone()))
                    .collect();
                // Bodies only see their own parameters
                let outer_parameters = std::mem::take(&mut ctx.parameters);
                ctx.call_stack.push(name);
                ctx.function_parameters.push(bindings);
                let body = self.resolve(ctx, body);
                ctx.function_parameters.pop();
                ctx.call_stack.pop();
                ctx.parameters = outer_parameters;
                Arc::new(CustomFunction {
                    body: Some(body?),
                    ..CustomFunction::clone(function)
                })
            }
            None => Arc::clone(function),
        };

        let ty = resolved_function.return_type.clone();
        let node = Expression::FunctionCall(FunctionCallExpr {
            function: resolved_function,
            arguments,
        });
        Ok((node, ty))
    }

    fn resolve_all(&self, ctx: &mut Context, exprs: &[ExprRef]) -> Result<Vec<ExprRef>> {
        exprs.iter().map(|e| self.resolve(ctx, e)).collect()
    }

    /// Result of casting `source` to `type_name`; collections cast
    /// element-wise
    fn cast_type(&self, source: &QueryType, type_name: &str) -> Result<QueryType> {
        let target = self.schema.resolve_type_name(type_name)?;
        Ok(if source.is_collection() && !target.is_collection() {
            QueryType::collection(target)
        } else {
            target
        })
    }

    fn binary_type(&self, op: BinaryOp, left: &QueryType, right: &QueryType) -> Result<QueryType> {
        if op.is_logical() {
            expect_boolean(left, op.symbol())?;
            expect_boolean(right, op.symbol())?;
            return Ok(QueryType::boolean());
        }
        if op.is_comparison() {
            return Ok(QueryType::boolean());
        }
        self.coercer.arithmetic_result(left, right).ok_or_else(|| {
            QueryError::contract(
                ODL0103,
                format!(
                    "Operator '{}' cannot be applied to '{left}' and '{right}'",
                    op.symbol()
                ),
            )
        })
    }
}

fn type_operation(source: ExprRef, original: &TypeOperationExpr) -> TypeOperationExpr {
    TypeOperationExpr {
        source,
        type_name: original.type_name.clone(),
    }
}

fn element_type(source: &ExprRef, operator: &str) -> Result<QueryType> {
    let ty = source.resolved_type()?;
    ty.element_type().cloned().ok_or_else(|| {
        QueryError::contract(
            ODL0101,
            format!("{operator} requires a collection source, found '{ty}'"),
        )
    })
}

fn expect_boolean(ty: &QueryType, context: &str) -> Result<()> {
    if ty.is_any() || *ty == QueryType::boolean() {
        Ok(())
    } else {
        Err(QueryError::contract(
            ODL0103,
            format!("{context} must be Boolean, found '{ty}'"),
        ))
    }
}

fn expect_numeric(ty: QueryType, operator: &str) -> Result<QueryType> {
    if ty.is_numeric() {
        Ok(ty)
    } else {
        Err(QueryError::contract(
            ODL0103,
            format!("{operator} requires numeric values, found '{ty}'"),
        ))
    }
}

fn canonical_type(function: CanonicalFunction, arguments: &[ExprRef]) -> Result<QueryType> {
    let arity = function.arity();
    if !arity.contains(&arguments.len()) {
        return Err(QueryError::contract(
            ODL0104,
            format!(
                "Function '{}' expects {}..={} argument(s), got {}",
                function.uri_name(),
                arity.start(),
                arity.end(),
                arguments.len()
            ),
        ));
    }
    let first = match arguments.first() {
        Some(arg) => arg.resolved_type()?.clone(),
        None => QueryType::Any,
    };
    let expect_first = |accepted: fn(PrimitiveType) -> bool| -> Result<()> {
        match first.as_primitive() {
            Some(p) if !accepted(p) => Err(QueryError::contract(
                ODL0103,
                format!("Function '{}' cannot be applied to '{first}'", function.uri_name()),
            )),
            _ => Ok(()),
        }
    };

    use CanonicalFunction as F;
    Ok(match function {
        F::Contains | F::StartsWith | F::EndsWith => {
            expect_first(|p| p == PrimitiveType::String)?;
            QueryType::boolean()
        }
        F::Length | F::IndexOf => {
            expect_first(|p| p == PrimitiveType::String)?;
            QueryType::int32()
        }
        F::Replace | F::Substring | F::ToLower | F::ToUpper | F::Trim => {
            expect_first(|p| p == PrimitiveType::String)?;
            QueryType::string()
        }
        F::Concat => QueryType::string(),
        F::Year | F::Month | F::Day | F::Hour | F::Minute | F::Second => {
            expect_first(|p| p.is_temporal())?;
            QueryType::int32()
        }
        F::Round | F::Floor | F::Ceiling => {
            expect_first(|p| p.is_numeric())?;
            match first.as_primitive() {
                Some(PrimitiveType::Decimal) => QueryType::Primitive(PrimitiveType::Decimal),
                _ => QueryType::Primitive(PrimitiveType::Double),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_ast::{
        CustomFunction, FunctionParameter, QueryBuilder, ServiceOperation, call, call_function,
        constant, function_parameter, lambda, param, root, service_operation,
    };
    use odata_linq_diagnostics::{ODL0300, ODL0301};
    use odata_linq_types::{
        EntityType, Multiplicity, NavigationProperty, StructuralProperty,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn schema() -> EntityModelSchema {
        EntityModelSchema::builder()
            .entity_type(
                EntityType::new("NS", "Customer")
                    .with_key(["Id"])
                    .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32))
                    .with_property(StructuralProperty::primitive("Name", PrimitiveType::String))
                    .with_property(StructuralProperty::primitive("Since", PrimitiveType::DateTime))
                    .with_navigation(NavigationProperty::new("Orders", "NS.Order", Multiplicity::Many))
                    .with_navigation(NavigationProperty::new("Referrer", "NS.Customer", Multiplicity::ZeroOrOne)),
            )
            .entity_type(
                EntityType::new("NS", "VipCustomer")
                    .derived_from("NS.Customer")
                    .with_property(StructuralProperty::primitive("Level", PrimitiveType::Int32)),
            )
            .entity_type(
                EntityType::new("NS", "Order")
                    .with_key(["OrderId"])
                    .with_property(StructuralProperty::primitive("OrderId", PrimitiveType::Int32))
                    .with_property(StructuralProperty::primitive("Amount", PrimitiveType::Decimal)),
            )
            .entity_set("Customers", "NS.Customer")
            .entity_set("Orders", "NS.Order")
            .build()
            .unwrap()
    }

    fn type_of(schema: &EntityModelSchema, expr: &ExprRef) -> String {
        TypeResolver::new(schema)
            .resolve_types(expr)
            .unwrap()
            .expression_type()
            .unwrap()
            .to_string()
    }

    #[rstest]
    #[case::root(root("Customers"), "Collection(NS.Customer)")]
    #[case::filter(
        root("Customers").filter(lambda("c", |c| c.prop("Id").greater_than(&constant(5)))),
        "Collection(NS.Customer)"
    )]
    #[case::select(root("Customers").select(lambda("c", |c| c.prop("Name"))), "Collection(Edm.String)")]
    #[case::select_many(root("Customers").select_many(lambda("c", |c| c.prop("Orders"))), "Collection(NS.Order)")]
    #[case::count(root("Customers").count(), "Edm.Int32")]
    #[case::long_count(root("Customers").long_count(), "Edm.Int64")]
    #[case::first(root("Customers").first(), "NS.Customer")]
    #[case::of_type(root("Customers").of_type("NS.VipCustomer"), "Collection(NS.VipCustomer)")]
    #[case::key(root("Customers").key([("Id", constant(1))]), "Collection(NS.Customer)")]
    #[case::key_navigation(root("Customers").key([("Id", constant(1))]).prop("Orders"), "Collection(NS.Order)")]
    #[case::key_single_navigation(root("Customers").key([("Id", constant(1))]).prop("Referrer"), "NS.Customer")]
    #[case::cast_navigation(
        root("Customers").key([("Id", constant(1))]).of_type("NS.VipCustomer").prop("Level"),
        "Edm.Int32"
    )]
    #[case::sum(root("Orders").sum_of(Some(lambda("o", |o| o.prop("Amount")))), "Edm.Decimal")]
    #[case::average(root("Customers").average_of(Some(lambda("c", |c| c.prop("Id")))), "Edm.Double")]
    #[case::year(
        root("Customers").select(lambda("c", |c| c.prop("Since").call(CanonicalFunction::Year, vec![]))),
        "Collection(Edm.Int32)"
    )]
    #[case::group_by(
        root("Customers").group_by(lambda("c", |c| c.prop("Name")), None),
        "Collection(Record{Key: Edm.String, Elements: Collection(NS.Customer)})"
    )]
    fn test_resolved_types(#[case] expr: ExprRef, #[case] expected: &str) {
        assert_eq!(type_of(&schema(), &expr), expected);
    }

    #[test]
    fn test_arithmetic_promotion() {
        let query = root("Orders").select(lambda("o", |o| o.prop("Amount").add(&constant(1))));
        assert_eq!(type_of(&schema(), &query), "Collection(Edm.Decimal)");
    }

    #[test]
    fn test_every_node_is_typed() {
        let query = root("Customers")
            .filter(lambda("c", |c| {
                c.prop("Orders")
                    .any_where(lambda("o", |o| o.prop("Amount").greater_than(&constant(5))))
            }))
            .order_by(lambda("c", |c| c.prop("Name")))
            .take(3);
        let resolved = TypeResolver::new(&schema()).resolve_types(&query).unwrap();
        let mut untyped = Vec::new();
        odata_linq_ast::walk(&resolved, &mut |node: &ExprRef| {
            if !node.is_resolved() {
                untyped.push(node.expr.name());
            }
        });
        assert!(untyped.is_empty(), "untyped nodes: {untyped:?}");
    }

    #[test]
    fn test_key_over_singleton_is_contract_violation() {
        let query = root("Customers").first().key([("Id", constant(1))]);
        let err = TypeResolver::new(&schema()).resolve_types(&query).unwrap_err();
        assert_eq!(err.code(), ODL0101);
        assert!(matches!(err, QueryError::Contract { .. }));
    }

    #[test]
    fn test_metadata_errors() {
        let schema = schema();
        let resolver = TypeResolver::new(&schema);
        assert_eq!(resolver.resolve_types(&root("Nope")).unwrap_err().code(), ODL0300);
        let bad_member = root("Customers").select(lambda("c", |c| c.prop("Nope")));
        assert_eq!(resolver.resolve_types(&bad_member).unwrap_err().code(), ODL0302);
        let bad_type = root("Customers").of_type("NS.Nope");
        assert_eq!(resolver.resolve_types(&bad_type).unwrap_err().code(), ODL0301);
    }

    #[test]
    fn test_unbound_parameter() {
        let query = root("Customers").filter(lambda("c", |_| param("x").prop("Id").equal(&constant(1))));
        let err = TypeResolver::new(&schema()).resolve_types(&query).unwrap_err();
        assert_eq!(err.code(), ODL0102);
    }

    #[test]
    fn test_void_service_operation_is_not_resolved() {
        let reset = Arc::new(ServiceOperation::new("Reset", None));
        // The argument refers to an unbound parameter and would fail resolution
        let query = service_operation(reset, vec![param("unbound")]);
        let resolved = TypeResolver::new(&schema()).resolve_types(&query).unwrap();
        assert_eq!(resolved.expression_type(), Some(&QueryType::Void));
    }

    #[test]
    fn test_function_body_is_typed_with_parameters() {
        let twice = Arc::new(
            CustomFunction::new(
                "NS",
                "Twice",
                vec![FunctionParameter::new("x", QueryType::int32())],
                QueryType::int32(),
            )
            .with_body(function_parameter("x").multiply(&constant(2))),
        );
        let query = root("Customers").select(lambda("c", |c| call_function(twice.clone(), vec![c.prop("Id")])));
        let resolved = TypeResolver::new(&schema()).resolve_types(&query).unwrap();
        let mut bodies = Vec::new();
        odata_linq_ast::walk(&resolved, &mut |node: &ExprRef| {
            if let Expression::FunctionCall(call) = &node.expr {
                bodies.push(call.function.body.as_ref().is_some_and(|b| b.is_resolved()));
            }
        });
        assert_eq!(bodies, vec![true]);
    }

    #[test]
    fn test_recursive_function_is_not_supported() {
        let inner = Arc::new(
            CustomFunction::new("NS", "F", Vec::new(), QueryType::boolean()).with_body(constant(true)),
        );
        let outer = Arc::new(
            CustomFunction::new("NS", "F", Vec::new(), QueryType::boolean())
                .with_body(call_function(inner, Vec::new())),
        );
        let query = root("Customers").filter(lambda("c", |_| call_function(outer.clone(), Vec::new())));
        let err = TypeResolver::new(&schema()).resolve_types(&query).unwrap_err();
        assert_eq!(err.code(), ODL0003);
    }

    #[test]
    fn test_canonical_argument_checks() {
        let schema = schema();
        let resolver = TypeResolver::new(&schema);
        let too_few = root("Customers").filter(lambda("c", |c| c.prop("Name").call(CanonicalFunction::StartsWith, vec![])));
        assert_eq!(resolver.resolve_types(&too_few).unwrap_err().code(), ODL0104);
        let wrong_type = root("Customers").select(lambda("c", |c| call(CanonicalFunction::ToUpper, vec![c.prop("Id")])));
        assert_eq!(resolver.resolve_types(&wrong_type).unwrap_err().code(), ODL0103);
    }

    #[test]
    fn test_depth_limit() {
        let mut expr = constant(1);
        for _ in 0..20 {
            expr = expr.add(&constant(1));
        }
        let query = root("Customers").select(lambda_body(expr));
        let err = TypeResolver::new(&schema())
            .with_max_depth(8)
            .resolve_types(&query)
            .unwrap_err();
        assert_eq!(err.code(), ODL0108);
    }

    fn lambda_body(body: ExprRef) -> ExprRef {
        odata_linq_ast::lambda_with(vec!["c".into()], body)
    }
}
