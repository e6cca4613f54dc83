//! Entity model metadata and in-memory data
//!
//! This crate provides:
//! - [`EntityModelSchema`]: entity sets, entity/complex types, service
//!   operations and custom functions used by type resolution
//! - A CSDL (EDMX) loader built on quick-xml
//! - [`QueryDataSet`]: rows per entity set with navigation links, used by
//!   the in-memory evaluator

pub mod csdl;
mod data_set;
mod schema;

pub use csdl::CsdlError;
pub use data_set::*;
pub use schema::*;
