//! Resolution passes over OData LINQ query trees
//!
//! The passes run in a fixed order:
//! 1. [`ParameterNameResolver`] gives every lambda parameter a unique name
//! 2. [`CustomFunctionResolver`] inlines custom function bodies (and re-runs
//!    parameter naming when it changed the tree)
//! 3. [`TypeResolver`] assigns a [`QueryType`](odata_linq_types::QueryType)
//!    to every node
//!
//! [`QueryResolver`] bundles the three.

mod functions;
mod parameters;
mod resolver;
mod scope;

pub use functions::CustomFunctionResolver;
pub use parameters::ParameterNameResolver;
pub use resolver::TypeResolver;
pub use scope::ScopeManager;

use log::debug;
use odata_linq_ast::ExprRef;
use odata_linq_diagnostics::Result;
use odata_linq_model::EntityModelSchema;
use std::sync::Arc;

/// Runs all resolution passes against a schema
#[derive(Debug, Clone, Copy)]
pub struct QueryResolver<'a> {
    schema: &'a EntityModelSchema,
    max_depth: usize,
}

impl<'a> QueryResolver<'a> {
    pub fn new(schema: &'a EntityModelSchema) -> Self {
        Self {
            schema,
            max_depth: resolver::DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit the nesting depth accepted by type resolution
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Name parameters, inline custom functions and resolve types
    pub fn resolve(&self, expr: &ExprRef) -> Result<ExprRef> {
        let named = ParameterNameResolver::new().resolve(expr)?;
        let inlined = CustomFunctionResolver::new().resolve(&named)?;
        let inlined = if Arc::ptr_eq(&inlined, &named) {
            inlined
        } else {
            debug!("Custom functions inlined, renaming parameters again");
            ParameterNameResolver::new().resolve(&inlined)?
        };
        TypeResolver::new(self.schema)
            .with_max_depth(self.max_depth)
            .resolve_types(&inlined)
    }
}
