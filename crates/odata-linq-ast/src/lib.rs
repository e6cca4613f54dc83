//! OData LINQ query expression tree
//!
//! This crate defines the immutable expression model consumed by the
//! resolution passes, the URI builder and the in-memory evaluator.
//! Nodes are shared as [`ExprRef`] (`Arc<QueryExpression>`); rewriting
//! produces new nodes and returns the very same `Arc` when nothing changed.

mod builder;
mod expression;
mod function;
mod operator;
mod rewrite;

pub use builder::*;
pub use expression::*;
pub use function::*;
pub use operator::*;
pub use rewrite::*;

use odata_linq_diagnostics::{ODL0100, QueryError, Result};
use odata_linq_types::QueryType;
use std::sync::Arc;

/// Shared reference to an expression node
pub type ExprRef = Arc<QueryExpression>;

/// An expression node with its resolved type
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExpression {
    /// The node kind and its children
    pub expr: Expression,
    /// Resolved output type; `None` before type resolution
    pub expression_type: Option<QueryType>,
}

impl QueryExpression {
    /// Create an untyped node
    pub fn new(expr: Expression) -> ExprRef {
        Arc::new(Self {
            expr,
            expression_type: None,
        })
    }

    /// Create a node with a known type
    pub fn typed(expr: Expression, expression_type: QueryType) -> ExprRef {
        Arc::new(Self {
            expr,
            expression_type: Some(expression_type),
        })
    }

    /// The resolved type, if type resolution has run
    pub fn expression_type(&self) -> Option<&QueryType> {
        self.expression_type.as_ref()
    }

    /// The resolved type, or a contract violation when unresolved
    pub fn resolved_type(&self) -> Result<&QueryType> {
        self.expression_type.as_ref().ok_or_else(|| {
            QueryError::contract(ODL0100, format!("{} expression has no resolved type", self.expr.name()))
        })
    }

    /// Check if the node carries a type
    pub fn is_resolved(&self) -> bool {
        self.expression_type.is_some()
    }
}
