//! OData LINQ query translation for Rust
//!
//! This crate bundles the translation pipeline:
//! - Building query trees with a LINQ-like API
//! - Parameter naming, function inlining and type resolution
//! - OData URI generation
//! - In-memory evaluation of queries and URIs, to predict service responses
//!
//! [`QueryTranslator`] is the usual entry point; the member crates are
//! re-exported for finer control.

mod translator;

// Re-export all public APIs from internal crates
pub use odata_linq_ast as ast;
pub use odata_linq_diagnostics as diagnostics;
pub use odata_linq_eval as eval;
pub use odata_linq_model as model;
pub use odata_linq_semantic as semantic;
pub use odata_linq_types as types;
pub use odata_linq_uri as uri;

// Convenience re-exports
pub use odata_linq_ast::{ExprRef, QueryBuilder, constant, lambda, lambda2, param, record, root};
pub use odata_linq_diagnostics::{QueryError, Result};
pub use odata_linq_types::{QueryType, QueryValue};
pub use translator::QueryTranslator;
