//! Child traversal and identity-preserving rewriting
//!
//! [`rewrite_children`] rebuilds a node only when at least one child comes
//! back as a different `Arc`; otherwise the original node is returned, so
//! `Arc::ptr_eq(&before, &after)` detects a no-op rewrite.

use crate::{
    AddQueryOptionExpr, AggregateExpr, BinaryExpr, CanonicalCallExpr, ConditionalExpr,
    ContainsExpr, ExpandExpr, ExprRef, Expression, FunctionCallExpr, GroupByExpr, JoinExpr,
    KeyExpr, LambdaExpr, LambdaOperatorExpr, OrderByExpr, OrderingKey, PagingExpr, PropertyExpr,
    QueryExpression, RecordExpr, ServiceOperationExpr, SetOperationExpr, SourceExpr,
    TypeOperationExpr, UnaryExpr,
};
use odata_linq_diagnostics::Result;
use std::sync::Arc;

impl Expression {
    /// Direct children in a fixed order
    pub fn children(&self) -> Vec<&ExprRef> {
        match self {
            Self::Constant(_)
            | Self::Null(_)
            | Self::Parameter(_)
            | Self::FunctionParameterRef(_)
            | Self::Root(_) => Vec::new(),

            Self::Lambda(e) => vec![&e.body],
            Self::Property(e) => vec![&e.instance],
            Self::Binary(e) => vec![&e.left, &e.right],
            Self::Unary(e) => vec![&e.operand],
            Self::Conditional(e) => vec![&e.condition, &e.if_true, &e.if_false],
            Self::As(e) | Self::IsOf(e) | Self::OfType(e) => vec![&e.source],
            Self::Record(e) => e.members.iter().map(|(_, v)| v).collect(),
            Self::FunctionCall(e) => e.arguments.iter().collect(),
            Self::CanonicalCall(e) => e.arguments.iter().collect(),
            Self::ServiceOperation(e) => e.arguments.iter().collect(),

            Self::Where(e) | Self::Select(e) | Self::SelectMany(e) => vec![&e.source, &e.lambda],
            Self::OrderBy(e) => std::iter::once(&e.source)
                .chain(e.keys.iter().map(|k| &k.selector))
                .collect(),
            Self::Distinct(e)
            | Self::Links(e)
            | Self::Value(e)
            | Self::InlineCount(e) => vec![&e.source],
            Self::Skip(e) | Self::Take(e) => vec![&e.source, &e.count],

            Self::Count(e)
            | Self::LongCount(e)
            | Self::Any(e)
            | Self::All(e)
            | Self::Min(e)
            | Self::Max(e)
            | Self::Sum(e)
            | Self::Average(e)
            | Self::First(e)
            | Self::FirstOrDefault(e)
            | Self::Single(e)
            | Self::SingleOrDefault(e) => std::iter::once(&e.source).chain(e.lambda.as_ref()).collect(),
            Self::Contains(e) => vec![&e.source, &e.value],

            Self::Union(e) | Self::Concat(e) | Self::Except(e) | Self::Intersect(e) => {
                vec![&e.first, &e.second]
            }
            Self::Join(e) | Self::GroupJoin(e) => {
                vec![&e.outer, &e.inner, &e.outer_key, &e.inner_key, &e.result]
            }
            Self::GroupBy(e) => std::iter::once(&e.source)
                .chain(std::iter::once(&e.key_selector))
                .chain(e.element_selector.as_ref())
                .collect(),

            Self::Key(e) => std::iter::once(&e.source)
                .chain(e.values.iter().map(|(_, v)| v))
                .collect(),
            Self::Expand(e) => vec![&e.source],
            Self::AddQueryOption(e) => vec![&e.source, &e.value],
        }
    }

    /// Map every child through `f`; returns `None` when no child changed
    pub fn try_map_children<F>(&self, f: F) -> Result<Option<Expression>>
    where
        F: FnMut(&ExprRef) -> Result<ExprRef>,
    {
        let mut m = ChildMapper { f, changed: false };
        let rebuilt = match self {
            Self::Constant(_)
            | Self::Null(_)
            | Self::Parameter(_)
            | Self::FunctionParameterRef(_)
            | Self::Root(_) => return Ok(None),

            Self::Lambda(e) => Self::Lambda(LambdaExpr {
                parameters: e.parameters.clone(),
                body: m.map(&e.body)?,
            }),
            Self::Property(e) => Self::Property(PropertyExpr {
                instance: m.map(&e.instance)?,
                name: e.name.clone(),
            }),
            Self::Binary(e) => Self::Binary(BinaryExpr {
                left: m.map(&e.left)?,
                op: e.op,
                right: m.map(&e.right)?,
            }),
            Self::Unary(e) => Self::Unary(UnaryExpr {
                op: e.op,
                operand: m.map(&e.operand)?,
            }),
            Self::Conditional(e) => Self::Conditional(ConditionalExpr {
                condition: m.map(&e.condition)?,
                if_true: m.map(&e.if_true)?,
                if_false: m.map(&e.if_false)?,
            }),
            Self::As(e) => Self::As(m.type_operation(e)?),
            Self::IsOf(e) => Self::IsOf(m.type_operation(e)?),
            Self::OfType(e) => Self::OfType(m.type_operation(e)?),
            Self::Record(e) => Self::Record(RecordExpr {
                members: e
                    .members
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), m.map(value)?)))
                    .collect::<Result<_>>()?,
            }),
            Self::FunctionCall(e) => Self::FunctionCall(FunctionCallExpr {
                function: Arc::clone(&e.function),
                arguments: m.map_all(&e.arguments)?,
            }),
            Self::CanonicalCall(e) => Self::CanonicalCall(CanonicalCallExpr {
                function: e.function,
                arguments: m.map_all(&e.arguments)?,
            }),
            Self::ServiceOperation(e) => Self::ServiceOperation(ServiceOperationExpr {
                operation: Arc::clone(&e.operation),
                arguments: m.map_all(&e.arguments)?,
            }),

            Self::Where(e) => Self::Where(m.lambda_operator(e)?),
            Self::Select(e) => Self::Select(m.lambda_operator(e)?),
            Self::SelectMany(e) => Self::SelectMany(m.lambda_operator(e)?),
            Self::OrderBy(e) => Self::OrderBy(OrderByExpr {
                source: m.map(&e.source)?,
                keys: e
                    .keys
                    .iter()
                    .map(|k| {
                        Ok(OrderingKey {
                            selector: m.map(&k.selector)?,
                            descending: k.descending,
                        })
                    })
                    .collect::<Result<_>>()?,
            }),
            Self::Distinct(e) => Self::Distinct(m.source(e)?),
            Self::Links(e) => Self::Links(m.source(e)?),
            Self::Value(e) => Self::Value(m.source(e)?),
            Self::InlineCount(e) => Self::InlineCount(m.source(e)?),
            Self::Skip(e) => Self::Skip(m.paging(e)?),
            Self::Take(e) => Self::Take(m.paging(e)?),

            Self::Count(e) => Self::Count(m.aggregate(e)?),
            Self::LongCount(e) => Self::LongCount(m.aggregate(e)?),
            Self::Any(e) => Self::Any(m.aggregate(e)?),
            Self::All(e) => Self::All(m.aggregate(e)?),
            Self::Min(e) => Self::Min(m.aggregate(e)?),
            Self::Max(e) => Self::Max(m.aggregate(e)?),
            Self::Sum(e) => Self::Sum(m.aggregate(e)?),
            Self::Average(e) => Self::Average(m.aggregate(e)?),
            Self::First(e) => Self::First(m.aggregate(e)?),
            Self::FirstOrDefault(e) => Self::FirstOrDefault(m.aggregate(e)?),
            Self::Single(e) => Self::Single(m.aggregate(e)?),
            Self::SingleOrDefault(e) => Self::SingleOrDefault(m.aggregate(e)?),
            Self::Contains(e) => Self::Contains(ContainsExpr {
                source: m.map(&e.source)?,
                value: m.map(&e.value)?,
            }),

            Self::Union(e) => Self::Union(m.set_operation(e)?),
            Self::Concat(e) => Self::Concat(m.set_operation(e)?),
            Self::Except(e) => Self::Except(m.set_operation(e)?),
            Self::Intersect(e) => Self::Intersect(m.set_operation(e)?),
            Self::Join(e) => Self::Join(m.join(e)?),
            Self::GroupJoin(e) => Self::GroupJoin(m.join(e)?),
            Self::GroupBy(e) => Self::GroupBy(GroupByExpr {
                source: m.map(&e.source)?,
                key_selector: m.map(&e.key_selector)?,
                element_selector: m.map_opt(e.element_selector.as_ref())?,
            }),

            Self::Key(e) => Self::Key(KeyExpr {
                source: m.map(&e.source)?,
                values: e
                    .values
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), m.map(value)?)))
                    .collect::<Result<_>>()?,
            }),
            Self::Expand(e) => Self::Expand(ExpandExpr {
                source: m.map(&e.source)?,
                expand: e.expand.clone(),
            }),
            Self::AddQueryOption(e) => Self::AddQueryOption(AddQueryOptionExpr {
                source: m.map(&e.source)?,
                name: e.name.clone(),
                value: m.map(&e.value)?,
            }),
        };
        Ok(m.changed.then_some(rebuilt))
    }
}

struct ChildMapper<F> {
    f: F,
    changed: bool,
}

impl<F> ChildMapper<F>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    fn map(&mut self, child: &ExprRef) -> Result<ExprRef> {
        let mapped = (self.f)(child)?;
        if !Arc::ptr_eq(child, &mapped) {
            self.changed = true;
        }
        Ok(mapped)
    }

    fn map_opt(&mut self, child: Option<&ExprRef>) -> Result<Option<ExprRef>> {
        child.map(|c| self.map(c)).transpose()
    }

    fn map_all(&mut self, children: &[ExprRef]) -> Result<Vec<ExprRef>> {
        children.iter().map(|c| self.map(c)).collect()
    }

    fn type_operation(&mut self, e: &TypeOperationExpr) -> Result<TypeOperationExpr> {
        Ok(TypeOperationExpr {
            source: self.map(&e.source)?,
            type_name: e.type_name.clone(),
        })
    }

    fn lambda_operator(&mut self, e: &LambdaOperatorExpr) -> Result<LambdaOperatorExpr> {
        Ok(LambdaOperatorExpr {
            source: self.map(&e.source)?,
            lambda: self.map(&e.lambda)?,
        })
    }

    fn source(&mut self, e: &SourceExpr) -> Result<SourceExpr> {
        Ok(SourceExpr {
            source: self.map(&e.source)?,
        })
    }

    fn paging(&mut self, e: &PagingExpr) -> Result<PagingExpr> {
        Ok(PagingExpr {
            source: self.map(&e.source)?,
            count: self.map(&e.count)?,
        })
    }

    fn aggregate(&mut self, e: &AggregateExpr) -> Result<AggregateExpr> {
        Ok(AggregateExpr {
            source: self.map(&e.source)?,
            lambda: self.map_opt(e.lambda.as_ref())?,
        })
    }

    fn set_operation(&mut self, e: &SetOperationExpr) -> Result<SetOperationExpr> {
        Ok(SetOperationExpr {
            first: self.map(&e.first)?,
            second: self.map(&e.second)?,
        })
    }

    fn join(&mut self, e: &JoinExpr) -> Result<JoinExpr> {
        Ok(JoinExpr {
            outer: self.map(&e.outer)?,
            inner: self.map(&e.inner)?,
            outer_key: self.map(&e.outer_key)?,
            inner_key: self.map(&e.inner_key)?,
            result: self.map(&e.result)?,
        })
    }
}

/// Rewrite the children of `node` through `f`, keeping the node's type.
/// Returns `node` itself when no child changed.
pub fn rewrite_children<F>(node: &ExprRef, f: F) -> Result<ExprRef>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    match node.expr.try_map_children(f)? {
        Some(expr) => Ok(Arc::new(QueryExpression {
            expr,
            expression_type: node.expression_type.clone(),
        })),
        None => Ok(Arc::clone(node)),
    }
}

/// A bottom-up rewriting pass
///
/// The default `rewrite` only recurses; implementors override it for the
/// node kinds they transform and fall back to [`rewrite_children`] for the
/// rest.
pub trait ExpressionRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.rewrite_children(expr)
    }

    fn rewrite_children(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        rewrite_children(expr, |child| self.rewrite(child))
    }
}

/// Visit `expr` and all descendants in pre-order
pub fn walk<'a, F>(expr: &'a ExprRef, visit: &mut F)
where
    F: FnMut(&'a ExprRef),
{
    visit(expr);
    for child in expr.expr.children() {
        walk(child, visit);
    }
}
