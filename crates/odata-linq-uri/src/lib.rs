//! OData URI generation for resolved LINQ query trees
//!
//! [`UriQueryVisitor`] collects path segments and query options into a
//! [`QueryBasedODataUri`]; [`ExpressionToStringConverter`] renders the
//! filter, ordering and key expressions through a [`LiteralConverter`].
//!
//! ```
//! use odata_linq_ast::{QueryBuilder, constant, lambda, root};
//! use odata_linq_model::EntityModelSchema;
//! use odata_linq_semantic::QueryResolver;
//! use odata_linq_types::{EntityType, PrimitiveType, StructuralProperty};
//! use odata_linq_uri::{DefaultLiteralConverter, ExpressionToStringConverter, UriQueryVisitor};
//!
//! let schema = EntityModelSchema::builder()
//!     .entity_type(
//!         EntityType::new("NS", "Customer")
//!             .with_key(["Id"])
//!             .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32)),
//!     )
//!     .entity_set("Customers", "NS.Customer")
//!     .build()?;
//! let query = root("Customers").filter(lambda("c", |c| c.prop("Id").greater_than(&constant(5))));
//! let resolved = QueryResolver::new(&schema).resolve(&query)?;
//!
//! let converter = ExpressionToStringConverter::new(&DefaultLiteralConverter);
//! let uri = UriQueryVisitor::new(converter).compute_uri(&resolved)?;
//! assert_eq!(uri.to_string(), "Customers?$filter=Id gt 5");
//! # Ok::<(), odata_linq_diagnostics::QueryError>(())
//! ```

mod converter;
mod literal;
mod segment;
mod settings;
mod visitor;

pub use converter::ExpressionToStringConverter;
pub use literal::{DefaultLiteralConverter, LiteralConverter, escape_literal};
pub use segment::{FilterClause, KeyValue, ODataUriSegment, OrderingClause, QueryBasedODataUri};
pub use settings::UriBuilderSettings;
pub use visitor::UriQueryVisitor;
