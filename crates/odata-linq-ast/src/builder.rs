//! Fluent construction of query trees
//!
//! Mirrors the LINQ surface a query provider would hand over:
//!
//! ```
//! use odata_linq_ast::{QueryBuilder, constant, lambda, root};
//!
//! let query = root("Customers")
//!     .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(5))))
//!     .order_by(lambda("c", |c| c.prop("Name")))
//!     .skip(2)
//!     .take(3);
//! ```

use crate::{
    AddQueryOptionExpr, AggregateExpr, BinaryExpr, BinaryOp, CanonicalCallExpr,
    CanonicalFunction, ConditionalExpr, ConstantExpr, ContainsExpr, CustomFunction, ExpandExpr,
    ExprRef, Expression, FunctionCallExpr, FunctionParameterRefExpr, GroupByExpr, JoinExpr,
    KeyExpr, LambdaExpr, LambdaOperatorExpr, NullExpr, OrderByExpr, OrderingKey, PagingExpr,
    ParameterExpr, PropertyExpr, RecordExpr, RootExpr, ServiceOperation, ServiceOperationExpr,
    SetOperationExpr, SourceExpr, TypeOperationExpr, UnaryExpr, UnaryOp,
};
use odata_linq_types::{QueryType, ScalarValue};
use std::sync::Arc;

/// Entity set root
pub fn root(entity_set: impl Into<String>) -> ExprRef {
    Expression::Root(RootExpr {
        entity_set: entity_set.into(),
    })
    .into_ref()
}

/// Lambda parameter reference
pub fn param(name: impl Into<String>) -> ExprRef {
    Expression::Parameter(ParameterExpr { name: name.into() }).into_ref()
}

/// Constant scalar
pub fn constant(value: impl Into<ScalarValue>) -> ExprRef {
    Expression::Constant(ConstantExpr {
        value: value.into(),
    })
    .into_ref()
}

/// Typed null literal
pub fn null_of(null_type: QueryType) -> ExprRef {
    Expression::Null(NullExpr { null_type }).into_ref()
}

/// Single-parameter lambda built from a closure over the parameter
pub fn lambda(name: &str, body: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
    lambda_with(vec![name.to_string()], body(param(name)))
}

/// Two-parameter lambda (join result selectors)
pub fn lambda2(
    first: &str,
    second: &str,
    body: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
) -> ExprRef {
    lambda_with(
        vec![first.to_string(), second.to_string()],
        body(param(first), param(second)),
    )
}

/// Lambda with explicit parameter names and body
pub fn lambda_with(parameters: Vec<String>, body: ExprRef) -> ExprRef {
    Expression::Lambda(LambdaExpr { parameters, body }).into_ref()
}

/// Anonymous record `new { name = value, .. }`
pub fn record<I, S>(members: I) -> ExprRef
where
    I: IntoIterator<Item = (S, ExprRef)>,
    S: Into<String>,
{
    Expression::Record(RecordExpr {
        members: members.into_iter().map(|(n, v)| (n.into(), v)).collect(),
    })
    .into_ref()
}

/// Conditional `condition ? if_true : if_false`
pub fn conditional(condition: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
    Expression::Conditional(ConditionalExpr {
        condition,
        if_true,
        if_false,
    })
    .into_ref()
}

/// Canonical function call
pub fn call(function: CanonicalFunction, arguments: Vec<ExprRef>) -> ExprRef {
    Expression::CanonicalCall(CanonicalCallExpr {
        function,
        arguments,
    })
    .into_ref()
}

/// Custom function call
pub fn call_function(function: Arc<CustomFunction>, arguments: Vec<ExprRef>) -> ExprRef {
    Expression::FunctionCall(FunctionCallExpr {
        function,
        arguments,
    })
    .into_ref()
}

/// Reference to a custom function parameter, for function bodies
pub fn function_parameter(name: impl Into<String>) -> ExprRef {
    Expression::FunctionParameterRef(FunctionParameterRefExpr { name: name.into() }).into_ref()
}

/// Service operation invocation
pub fn service_operation(operation: Arc<ServiceOperation>, arguments: Vec<ExprRef>) -> ExprRef {
    Expression::ServiceOperation(ServiceOperationExpr {
        operation,
        arguments,
    })
    .into_ref()
}

fn binary(left: &ExprRef, op: BinaryOp, right: &ExprRef) -> ExprRef {
    Expression::Binary(BinaryExpr {
        left: Arc::clone(left),
        op,
        right: Arc::clone(right),
    })
    .into_ref()
}

fn aggregate(
    source: &ExprRef,
    lambda: Option<ExprRef>,
    make: fn(AggregateExpr) -> Expression,
) -> ExprRef {
    make(AggregateExpr {
        source: Arc::clone(source),
        lambda,
    })
    .into_ref()
}

fn set_operation(
    first: &ExprRef,
    second: &ExprRef,
    make: fn(SetOperationExpr) -> Expression,
) -> ExprRef {
    make(SetOperationExpr {
        first: Arc::clone(first),
        second: Arc::clone(second),
    })
    .into_ref()
}

fn join_with(
    outer: &ExprRef,
    inner: &ExprRef,
    outer_key: ExprRef,
    inner_key: ExprRef,
    result: ExprRef,
    make: fn(JoinExpr) -> Expression,
) -> ExprRef {
    make(JoinExpr {
        outer: Arc::clone(outer),
        inner: Arc::clone(inner),
        outer_key,
        inner_key,
        result,
    })
    .into_ref()
}

/// LINQ-style extension methods on expression references
pub trait QueryBuilder {
    // === Scalar ===
    fn prop(&self, name: &str) -> ExprRef;
    fn equal(&self, other: &ExprRef) -> ExprRef;
    fn not_equal(&self, other: &ExprRef) -> ExprRef;
    fn greater_than(&self, other: &ExprRef) -> ExprRef;
    fn greater_or_equal(&self, other: &ExprRef) -> ExprRef;
    fn less_than(&self, other: &ExprRef) -> ExprRef;
    fn less_or_equal(&self, other: &ExprRef) -> ExprRef;
    fn and(&self, other: &ExprRef) -> ExprRef;
    fn or(&self, other: &ExprRef) -> ExprRef;
    fn add(&self, other: &ExprRef) -> ExprRef;
    fn subtract(&self, other: &ExprRef) -> ExprRef;
    fn multiply(&self, other: &ExprRef) -> ExprRef;
    fn divide(&self, other: &ExprRef) -> ExprRef;
    fn modulo(&self, other: &ExprRef) -> ExprRef;
    fn not(&self) -> ExprRef;
    fn negate(&self) -> ExprRef;
    fn as_type(&self, type_name: &str) -> ExprRef;
    fn is_of(&self, type_name: &str) -> ExprRef;
    /// Instance-style canonical call with `self` as first argument
    fn call(&self, function: CanonicalFunction, arguments: Vec<ExprRef>) -> ExprRef;

    // === Query operators ===
    fn filter(&self, predicate: ExprRef) -> ExprRef;
    fn select(&self, selector: ExprRef) -> ExprRef;
    fn select_many(&self, selector: ExprRef) -> ExprRef;
    fn order_by(&self, selector: ExprRef) -> ExprRef;
    fn order_by_descending(&self, selector: ExprRef) -> ExprRef;
    fn then_by(&self, selector: ExprRef) -> ExprRef;
    fn then_by_descending(&self, selector: ExprRef) -> ExprRef;
    fn skip(&self, count: i32) -> ExprRef;
    fn take(&self, count: i32) -> ExprRef;
    fn count(&self) -> ExprRef;
    fn count_where(&self, predicate: ExprRef) -> ExprRef;
    fn long_count(&self) -> ExprRef;
    fn any(&self) -> ExprRef;
    fn any_where(&self, predicate: ExprRef) -> ExprRef;
    fn all(&self, predicate: ExprRef) -> ExprRef;
    fn first(&self) -> ExprRef;
    fn first_or_default(&self) -> ExprRef;
    fn single(&self) -> ExprRef;
    fn single_or_default(&self) -> ExprRef;
    fn min_of(&self, selector: Option<ExprRef>) -> ExprRef;
    fn max_of(&self, selector: Option<ExprRef>) -> ExprRef;
    fn sum_of(&self, selector: Option<ExprRef>) -> ExprRef;
    fn average_of(&self, selector: Option<ExprRef>) -> ExprRef;
    fn contains_value(&self, value: ExprRef) -> ExprRef;
    fn of_type(&self, type_name: &str) -> ExprRef;
    fn distinct(&self) -> ExprRef;
    fn union(&self, other: &ExprRef) -> ExprRef;
    fn concat(&self, other: &ExprRef) -> ExprRef;
    fn except(&self, other: &ExprRef) -> ExprRef;
    fn intersect(&self, other: &ExprRef) -> ExprRef;
    fn join(&self, inner: &ExprRef, outer_key: ExprRef, inner_key: ExprRef, result: ExprRef) -> ExprRef;
    fn group_join(&self, inner: &ExprRef, outer_key: ExprRef, inner_key: ExprRef, result: ExprRef) -> ExprRef;
    fn group_by(&self, key_selector: ExprRef, element_selector: Option<ExprRef>) -> ExprRef;

    // === Protocol-specific ===
    fn key<I, S>(&self, values: I) -> ExprRef
    where
        I: IntoIterator<Item = (S, ExprRef)>,
        S: Into<String>;
    fn expand(&self, paths: &str) -> ExprRef;
    fn links(&self) -> ExprRef;
    fn value(&self) -> ExprRef;
    fn add_query_option(&self, name: &str, value: ExprRef) -> ExprRef;
    fn inline_count(&self) -> ExprRef;
}

impl QueryBuilder for ExprRef {
    fn prop(&self, name: &str) -> ExprRef {
        Expression::Property(PropertyExpr {
            instance: Arc::clone(self),
            name: name.to_string(),
        })
        .into_ref()
    }

    fn equal(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Equal, other)
    }

    fn not_equal(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::NotEqual, other)
    }

    fn greater_than(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::GreaterThan, other)
    }

    fn greater_or_equal(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::GreaterThanOrEqual, other)
    }

    fn less_than(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::LessThan, other)
    }

    fn less_or_equal(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::LessThanOrEqual, other)
    }

    fn and(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::And, other)
    }

    fn or(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Or, other)
    }

    fn add(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Add, other)
    }

    fn subtract(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Subtract, other)
    }

    fn multiply(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Multiply, other)
    }

    fn divide(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Divide, other)
    }

    fn modulo(&self, other: &ExprRef) -> ExprRef {
        binary(self, BinaryOp::Modulo, other)
    }

    fn not(&self) -> ExprRef {
        Expression::Unary(UnaryExpr {
            op: UnaryOp::Not,
            operand: Arc::clone(self),
        })
        .into_ref()
    }

    fn negate(&self) -> ExprRef {
        Expression::Unary(UnaryExpr {
            op: UnaryOp::Negate,
            operand: Arc::clone(self),
        })
        .into_ref()
    }

    fn as_type(&self, type_name: &str) -> ExprRef {
        Expression::As(TypeOperationExpr {
            source: Arc::clone(self),
            type_name: type_name.to_string(),
        })
        .into_ref()
    }

    fn is_of(&self, type_name: &str) -> ExprRef {
        Expression::IsOf(TypeOperationExpr {
            source: Arc::clone(self),
            type_name: type_name.to_string(),
        })
        .into_ref()
    }

    fn call(&self, function: CanonicalFunction, arguments: Vec<ExprRef>) -> ExprRef {
        let mut all = Vec::with_capacity(arguments.len() + 1);
        all.push(Arc::clone(self));
        all.extend(arguments);
        call(function, all)
    }

    fn filter(&self, predicate: ExprRef) -> ExprRef {
        Expression::Where(LambdaOperatorExpr {
            source: Arc::clone(self),
            lambda: predicate,
        })
        .into_ref()
    }

    fn select(&self, selector: ExprRef) -> ExprRef {
        Expression::Select(LambdaOperatorExpr {
            source: Arc::clone(self),
            lambda: selector,
        })
        .into_ref()
    }

    fn select_many(&self, selector: ExprRef) -> ExprRef {
        Expression::SelectMany(LambdaOperatorExpr {
            source: Arc::clone(self),
            lambda: selector,
        })
        .into_ref()
    }

    fn order_by(&self, selector: ExprRef) -> ExprRef {
        order(self, selector, false, false)
    }

    fn order_by_descending(&self, selector: ExprRef) -> ExprRef {
        order(self, selector, true, false)
    }

    fn then_by(&self, selector: ExprRef) -> ExprRef {
        order(self, selector, false, true)
    }

    fn then_by_descending(&self, selector: ExprRef) -> ExprRef {
        order(self, selector, true, true)
    }

    fn skip(&self, count: i32) -> ExprRef {
        Expression::Skip(PagingExpr {
            source: Arc::clone(self),
            count: constant(count),
        })
        .into_ref()
    }

    fn take(&self, count: i32) -> ExprRef {
        Expression::Take(PagingExpr {
            source: Arc::clone(self),
            count: constant(count),
        })
        .into_ref()
    }

    fn count(&self) -> ExprRef {
        aggregate(self, None, Expression::Count)
    }

    fn count_where(&self, predicate: ExprRef) -> ExprRef {
        aggregate(self, Some(predicate), Expression::Count)
    }

    fn long_count(&self) -> ExprRef {
        aggregate(self, None, Expression::LongCount)
    }

    fn any(&self) -> ExprRef {
        aggregate(self, None, Expression::Any)
    }

    fn any_where(&self, predicate: ExprRef) -> ExprRef {
        aggregate(self, Some(predicate), Expression::Any)
    }

    fn all(&self, predicate: ExprRef) -> ExprRef {
        aggregate(self, Some(predicate), Expression::All)
    }

    fn first(&self) -> ExprRef {
        aggregate(self, None, Expression::First)
    }

    fn first_or_default(&self) -> ExprRef {
        aggregate(self, None, Expression::FirstOrDefault)
    }

    fn single(&self) -> ExprRef {
        aggregate(self, None, Expression::Single)
    }

    fn single_or_default(&self) -> ExprRef {
        aggregate(self, None, Expression::SingleOrDefault)
    }

    fn min_of(&self, selector: Option<ExprRef>) -> ExprRef {
        aggregate(self, selector, Expression::Min)
    }

    fn max_of(&self, selector: Option<ExprRef>) -> ExprRef {
        aggregate(self, selector, Expression::Max)
    }

    fn sum_of(&self, selector: Option<ExprRef>) -> ExprRef {
        aggregate(self, selector, Expression::Sum)
    }

    fn average_of(&self, selector: Option<ExprRef>) -> ExprRef {
        aggregate(self, selector, Expression::Average)
    }

    fn contains_value(&self, value: ExprRef) -> ExprRef {
        Expression::Contains(ContainsExpr {
            source: Arc::clone(self),
            value,
        })
        .into_ref()
    }

    fn of_type(&self, type_name: &str) -> ExprRef {
        Expression::OfType(TypeOperationExpr {
            source: Arc::clone(self),
            type_name: type_name.to_string(),
        })
        .into_ref()
    }

    fn distinct(&self) -> ExprRef {
        Expression::Distinct(SourceExpr {
            source: Arc::clone(self),
        })
        .into_ref()
    }

    fn union(&self, other: &ExprRef) -> ExprRef {
        set_operation(self, other, Expression::Union)
    }

    fn concat(&self, other: &ExprRef) -> ExprRef {
        set_operation(self, other, Expression::Concat)
    }

    fn except(&self, other: &ExprRef) -> ExprRef {
        set_operation(self, other, Expression::Except)
    }

    fn intersect(&self, other: &ExprRef) -> ExprRef {
        set_operation(self, other, Expression::Intersect)
    }

    fn join(&self, inner: &ExprRef, outer_key: ExprRef, inner_key: ExprRef, result: ExprRef) -> ExprRef {
        join_with(self, inner, outer_key, inner_key, result, Expression::Join)
    }

    fn group_join(&self, inner: &ExprRef, outer_key: ExprRef, inner_key: ExprRef, result: ExprRef) -> ExprRef {
        join_with(self, inner, outer_key, inner_key, result, Expression::GroupJoin)
    }

    fn group_by(&self, key_selector: ExprRef, element_selector: Option<ExprRef>) -> ExprRef {
        Expression::GroupBy(GroupByExpr {
            source: Arc::clone(self),
            key_selector,
            element_selector,
        })
        .into_ref()
    }

    fn key<I, S>(&self, values: I) -> ExprRef
    where
        I: IntoIterator<Item = (S, ExprRef)>,
        S: Into<String>,
    {
        Expression::Key(KeyExpr {
            source: Arc::clone(self),
            values: values.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        })
        .into_ref()
    }

    fn expand(&self, paths: &str) -> ExprRef {
        Expression::Expand(ExpandExpr {
            source: Arc::clone(self),
            expand: paths.to_string(),
        })
        .into_ref()
    }

    fn links(&self) -> ExprRef {
        Expression::Links(SourceExpr {
            source: Arc::clone(self),
        })
        .into_ref()
    }

    fn value(&self) -> ExprRef {
        Expression::Value(SourceExpr {
            source: Arc::clone(self),
        })
        .into_ref()
    }

    fn add_query_option(&self, name: &str, value: ExprRef) -> ExprRef {
        Expression::AddQueryOption(AddQueryOptionExpr {
            source: Arc::clone(self),
            name: name.to_string(),
            value,
        })
        .into_ref()
    }

    fn inline_count(&self) -> ExprRef {
        Expression::InlineCount(SourceExpr {
            source: Arc::clone(self),
        })
        .into_ref()
    }
}

/// OrderBy starts a new key chain; ThenBy extends the chain of an
/// OrderBy source
fn order(source: &ExprRef, selector: ExprRef, descending: bool, then: bool) -> ExprRef {
    let key = OrderingKey {
        selector,
        descending,
    };
    match (&source.expr, then) {
        (Expression::OrderBy(existing), true) => {
            let mut keys = existing.keys.clone();
            keys.push(key);
            Expression::OrderBy(OrderByExpr {
                source: Arc::clone(&existing.source),
                keys,
            })
            .into_ref()
        }
        _ => Expression::OrderBy(OrderByExpr {
            source: Arc::clone(source),
            keys: vec![key],
        })
        .into_ref(),
    }
}
