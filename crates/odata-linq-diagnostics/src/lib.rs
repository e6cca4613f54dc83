//! OData LINQ diagnostics and error handling
//!
//! This crate provides the error taxonomy shared by the translation and
//! evaluation passes: structured error codes and the [`QueryError`] enum.

mod error;
mod error_code;

pub use error::*;
pub use error_code::*;

/// Result type for query translation operations
pub type Result<T> = std::result::Result<T, QueryError>;
