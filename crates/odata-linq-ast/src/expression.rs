//! Query expression nodes
//!
//! This module defines every node kind of the query tree: scalar operators,
//! structural access, LINQ query operators and the protocol-specific
//! operators (Key, Expand, Links, Value, AddQueryOption, InlineCount).

use crate::{BinaryOp, CanonicalFunction, CustomFunction, ExprRef, ServiceOperation, UnaryOp};
use odata_linq_types::{QueryType, ScalarValue};
use std::sync::Arc;

/// All query expression kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    // === Scalar and Reference Expressions ===
    /// Constant scalar value
    Constant(ConstantExpr),
    /// Typed null literal
    Null(NullExpr),
    /// Reference to a lambda parameter
    Parameter(ParameterExpr),
    /// Lambda with named parameters
    Lambda(LambdaExpr),
    /// Property or navigation access (instance.Name)
    Property(PropertyExpr),
    /// Binary operation
    Binary(BinaryExpr),
    /// Unary operation
    Unary(UnaryExpr),
    /// Conditional (test ? a : b)
    Conditional(ConditionalExpr),
    /// Type cast yielding null on mismatch (x as T)
    As(TypeOperationExpr),
    /// Type test (x is T)
    IsOf(TypeOperationExpr),
    /// Anonymous record construction (new { A = .., B = .. })
    Record(RecordExpr),
    /// Call to a custom function
    FunctionCall(FunctionCallExpr),
    /// Reference to a custom function parameter inside its body
    FunctionParameterRef(FunctionParameterRefExpr),
    /// Call to a canonical function
    CanonicalCall(CanonicalCallExpr),

    // === Query Roots ===
    /// Entity set root
    Root(RootExpr),
    /// Service operation invocation
    ServiceOperation(ServiceOperationExpr),

    // === Filtering, Projection and Ordering ===
    /// Filter (Where)
    Where(LambdaOperatorExpr),
    /// Projection (Select)
    Select(LambdaOperatorExpr),
    /// Flattening projection (SelectMany)
    SelectMany(LambdaOperatorExpr),
    /// Ordering with its ThenBy chain
    OrderBy(OrderByExpr),
    /// Type filter (OfType)
    OfType(TypeOperationExpr),
    /// Duplicate elimination
    Distinct(SourceExpr),

    // === Paging ===
    /// Skip the first N elements
    Skip(PagingExpr),
    /// Take the first N elements
    Take(PagingExpr),

    // === Aggregation and Element Operators ===
    Count(AggregateExpr),
    LongCount(AggregateExpr),
    Any(AggregateExpr),
    All(AggregateExpr),
    Min(AggregateExpr),
    Max(AggregateExpr),
    Sum(AggregateExpr),
    Average(AggregateExpr),
    First(AggregateExpr),
    FirstOrDefault(AggregateExpr),
    Single(AggregateExpr),
    SingleOrDefault(AggregateExpr),
    /// Membership test (source.Contains(value))
    Contains(ContainsExpr),

    // === Set Operators ===
    Union(SetOperationExpr),
    Concat(SetOperationExpr),
    Except(SetOperationExpr),
    Intersect(SetOperationExpr),

    // === Joining and Grouping ===
    Join(JoinExpr),
    GroupJoin(JoinExpr),
    GroupBy(GroupByExpr),

    // === Protocol-Specific Operators ===
    /// Key lookup (Customers(1))
    Key(KeyExpr),
    /// Expand navigation paths
    Expand(ExpandExpr),
    /// Links to a navigation property ($links)
    Links(SourceExpr),
    /// Raw value of a property ($value)
    Value(SourceExpr),
    /// Custom query option
    AddQueryOption(AddQueryOptionExpr),
    /// Request the total count alongside results ($inlinecount)
    InlineCount(SourceExpr),
}

impl Expression {
    /// Wrap into an untyped shared node
    pub fn into_ref(self) -> ExprRef {
        crate::QueryExpression::new(self)
    }

    /// Node kind name, for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "Constant",
            Self::Null(_) => "Null",
            Self::Parameter(_) => "Parameter",
            Self::Lambda(_) => "Lambda",
            Self::Property(_) => "Property",
            Self::Binary(_) => "Binary",
            Self::Unary(_) => "Unary",
            Self::Conditional(_) => "Conditional",
            Self::As(_) => "As",
            Self::IsOf(_) => "IsOf",
            Self::Record(_) => "Record",
            Self::FunctionCall(_) => "FunctionCall",
            Self::FunctionParameterRef(_) => "FunctionParameterRef",
            Self::CanonicalCall(_) => "CanonicalCall",
            Self::Root(_) => "Root",
            Self::ServiceOperation(_) => "ServiceOperation",
            Self::Where(_) => "Where",
            Self::Select(_) => "Select",
            Self::SelectMany(_) => "SelectMany",
            Self::OrderBy(_) => "OrderBy",
            Self::OfType(_) => "OfType",
            Self::Distinct(_) => "Distinct",
            Self::Skip(_) => "Skip",
            Self::Take(_) => "Take",
            Self::Count(_) => "Count",
            Self::LongCount(_) => "LongCount",
            Self::Any(_) => "Any",
            Self::All(_) => "All",
            Self::Min(_) => "Min",
            Self::Max(_) => "Max",
            Self::Sum(_) => "Sum",
            Self::Average(_) => "Average",
            Self::First(_) => "First",
            Self::FirstOrDefault(_) => "FirstOrDefault",
            Self::Single(_) => "Single",
            Self::SingleOrDefault(_) => "SingleOrDefault",
            Self::Contains(_) => "Contains",
            Self::Union(_) => "Union",
            Self::Concat(_) => "Concat",
            Self::Except(_) => "Except",
            Self::Intersect(_) => "Intersect",
            Self::Join(_) => "Join",
            Self::GroupJoin(_) => "GroupJoin",
            Self::GroupBy(_) => "GroupBy",
            Self::Key(_) => "Key",
            Self::Expand(_) => "Expand",
            Self::Links(_) => "Links",
            Self::Value(_) => "Value",
            Self::AddQueryOption(_) => "AddQueryOption",
            Self::InlineCount(_) => "InlineCount",
        }
    }

    /// The lambda node, if this is one
    pub fn as_lambda(&self) -> Option<&LambdaExpr> {
        match self {
            Self::Lambda(l) => Some(l),
            _ => None,
        }
    }

    /// The constant value, if this is a constant
    pub fn as_constant(&self) -> Option<&ScalarValue> {
        match self {
            Self::Constant(c) => Some(&c.value),
            _ => None,
        }
    }
}

/// Constant scalar value
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantExpr {
    pub value: ScalarValue,
}

/// Typed null literal
#[derive(Debug, Clone, PartialEq)]
pub struct NullExpr {
    pub null_type: QueryType,
}

/// Reference to a lambda parameter by name
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterExpr {
    pub name: String,
}

/// Lambda expression
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpr {
    pub parameters: Vec<String>,
    pub body: ExprRef,
}

/// Property or navigation access
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyExpr {
    pub instance: ExprRef,
    pub name: String,
}

/// Binary operation
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub left: ExprRef,
    pub op: BinaryOp,
    pub right: ExprRef,
}

/// Unary operation
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: ExprRef,
}

/// Conditional expression
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpr {
    pub condition: ExprRef,
    pub if_true: ExprRef,
    pub if_false: ExprRef,
}

/// Type operation (As, IsOf, OfType) against a qualified type name
#[derive(Debug, Clone, PartialEq)]
pub struct TypeOperationExpr {
    pub source: ExprRef,
    pub type_name: String,
}

/// Anonymous record construction
#[derive(Debug, Clone, PartialEq)]
pub struct RecordExpr {
    pub members: Vec<(String, ExprRef)>,
}

/// Custom function call
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallExpr {
    pub function: Arc<CustomFunction>,
    pub arguments: Vec<ExprRef>,
}

/// Reference to a custom function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameterRefExpr {
    pub name: String,
}

/// Canonical function call; instance functions take the instance first
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCallExpr {
    pub function: CanonicalFunction,
    pub arguments: Vec<ExprRef>,
}

/// Entity set root
#[derive(Debug, Clone, PartialEq)]
pub struct RootExpr {
    pub entity_set: String,
}

/// Service operation invocation with positional arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperationExpr {
    pub operation: Arc<ServiceOperation>,
    pub arguments: Vec<ExprRef>,
}

/// Query operator taking a lambda (Where, Select, SelectMany)
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaOperatorExpr {
    pub source: ExprRef,
    pub lambda: ExprRef,
}

/// A single ordering key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingKey {
    /// Key selector lambda
    pub selector: ExprRef,
    pub descending: bool,
}

/// OrderBy followed by its ThenBy keys
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub source: ExprRef,
    pub keys: Vec<OrderingKey>,
}

/// Query operator with only a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceExpr {
    pub source: ExprRef,
}

/// Skip or Take
#[derive(Debug, Clone, PartialEq)]
pub struct PagingExpr {
    pub source: ExprRef,
    pub count: ExprRef,
}

/// Aggregate or element operator with an optional lambda
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub source: ExprRef,
    pub lambda: Option<ExprRef>,
}

/// source.Contains(value)
#[derive(Debug, Clone, PartialEq)]
pub struct ContainsExpr {
    pub source: ExprRef,
    pub value: ExprRef,
}

/// Union, Concat, Except, Intersect
#[derive(Debug, Clone, PartialEq)]
pub struct SetOperationExpr {
    pub first: ExprRef,
    pub second: ExprRef,
}

/// Join and GroupJoin
#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpr {
    pub outer: ExprRef,
    pub inner: ExprRef,
    pub outer_key: ExprRef,
    pub inner_key: ExprRef,
    /// Two-parameter lambda (outer, inner) or (outer, inner group)
    pub result: ExprRef,
}

/// GroupBy with an optional element selector
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByExpr {
    pub source: ExprRef,
    pub key_selector: ExprRef,
    pub element_selector: Option<ExprRef>,
}

/// Key lookup with named key values
#[derive(Debug, Clone, PartialEq)]
pub struct KeyExpr {
    pub source: ExprRef,
    pub values: Vec<(String, ExprRef)>,
}

/// Expand with a raw, comma separated path string
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandExpr {
    pub source: ExprRef,
    pub expand: String,
}

/// Custom query option
#[derive(Debug, Clone, PartialEq)]
pub struct AddQueryOptionExpr {
    pub source: ExprRef,
    pub name: String,
    pub value: ExprRef,
}
