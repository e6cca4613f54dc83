//! OData LINQ type system
//!
//! This crate defines:
//! - Primitive (EDM) types and the [`QueryType`] lattice attached to resolved expressions
//! - Entity and complex type definitions with keys and navigation properties
//! - The [`QueryValue`] graph produced by in-memory evaluation
//! - Numeric promotion and assignability rules

pub mod coercion;
pub mod structural;
pub mod type_system;
pub mod value;

pub use coercion::TypeCoercer;
pub use structural::*;
pub use type_system::*;
pub use value::*;
