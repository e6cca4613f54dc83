//! Operator implementations
//!
//! Scalar operators are free functions over evaluated operands:
//! - Arithmetic (`add`, `sub`, `mul`, `div`, `mod`, negation) with checked
//!   integer and decimal math
//! - Comparison and equality, including the null-first ordering used by
//!   `OrderBy`
//! - Three-valued logic
//!
//! Query operators are `impl QueryEvaluator` blocks:
//! - Sequence operators (Where, Select, OrderBy, paging, set operators,
//!   joins and grouping)
//! - Aggregates and element operators
//! - Type operators (As, IsOf, OfType)

pub mod aggregate;
pub mod arithmetic;
pub mod comparison;
pub mod list;
pub mod logical;
pub mod type_ops;

pub use arithmetic::{arithmetic, negate};
pub use comparison::{compare, compare_scalars, order_values, values_equal};
pub use list::SetOperator;
pub use logical::{and, not, or};
pub use type_ops::{convert_value, is_instance_of};
