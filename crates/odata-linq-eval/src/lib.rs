//! In-memory evaluation of OData LINQ queries
//!
//! This crate evaluates resolved query trees against a [`QueryDataSet`],
//! predicting what an OData service would return for the same query. It
//! provides:
//!
//! - **Query operators**: Where, Select, SelectMany, OrderBy/ThenBy, Skip,
//!   Take, set operators, joins and GroupBy
//! - **Aggregates**: Count, Any, All, Min, Max, Sum, Average and the element
//!   operators (First, Single and their `OrDefault` forms)
//! - **Canonical functions**: string, date and math functions through a
//!   [`FunctionRegistry`]
//! - **URI evaluation**: [`ODataUriEvaluator`] answers a
//!   [`QueryBasedODataUri`](odata_linq_uri::QueryBasedODataUri) with server
//!   paging and `$select`/`$expand` masking
//!
//! # Example
//!
//! ```
//! use odata_linq_ast::{QueryBuilder, constant, lambda, root};
//! use odata_linq_eval::QueryEvaluator;
//! use odata_linq_model::{EntityModelSchema, QueryDataSet};
//! use odata_linq_semantic::QueryResolver;
//! use odata_linq_types::{EntityType, PrimitiveType, StructuralProperty};
//!
//! let schema = EntityModelSchema::builder()
//!     .entity_type(
//!         EntityType::new("NS", "Customer")
//!             .with_key(["Id"])
//!             .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32))
//!             .with_property(StructuralProperty::primitive("Name", PrimitiveType::String)),
//!     )
//!     .entity_set("Customers", "NS.Customer")
//!     .build()?;
//! let data = QueryDataSet::from_json(
//!     &schema,
//!     r#"{"Customers": [{"Id": 1, "Name": "Ann"}, {"Id": 2, "Name": "Bob"}]}"#,
//! )?;
//!
//! let query = root("Customers")
//!     .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(1))))
//!     .count();
//! let resolved = QueryResolver::new(&schema).resolve(&query)?;
//! let count = QueryEvaluator::new(&schema, &data).evaluate(&resolved)?;
//! assert_eq!(count.as_scalar().and_then(|v| v.as_i64()), Some(1));
//! # Ok::<(), odata_linq_diagnostics::QueryError>(())
//! ```
//!
//! # Errors
//!
//! Problems with the query itself (unresolved types, unbound parameters,
//! invalid URI paths) are returned as [`QueryError`](odata_linq_diagnostics::QueryError).
//! Failures that depend on the data, such as division by zero or `Single`
//! over two elements, are carried by the returned value as an
//! [`EvaluationError`](odata_linq_types::EvaluationError), matching the way
//! a service reports them per response.

#[macro_use]
pub mod error;

pub mod context;
pub mod evaluator;
pub mod masking;
pub mod operators;
pub mod registry;
pub mod settings;
pub mod uri_evaluator;

pub use context::EvaluationContext;
pub use error::Evaluated;
pub use evaluator::{DEFAULT_MAX_DEPTH, QueryEvaluator, collapse_singleton};
pub use masking::{MemberMask, SelectExpandMask, SelectExpandMasker};
pub use registry::{CanonicalFn, FunctionKind, FunctionRegistry};
pub use settings::EvaluationSettings;
pub use uri_evaluator::ODataUriEvaluator;

pub use odata_linq_model::QueryDataSet;
