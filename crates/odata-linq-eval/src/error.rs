//! Evaluation errors carried as values
//!
//! Failures a real service would report for a well-formed query (division
//! by zero, empty sequences, overflow) become [`EvaluationError`]s attached
//! to typed null results. Contract violations stay `Err(QueryError)`.

use odata_linq_diagnostics::{ODL0200, ODL0201, ODL0202, ODL0203, ODL0204, ODL0205, ODL0206, ODL0207};
use odata_linq_types::{EvaluationError, QueryValue};

/// Outcome of evaluating an operand: a value, or the error it carries
pub type Evaluated<T> = std::result::Result<T, EvaluationError>;

/// Unwrap an [`Evaluated`] or return the error as a typed null of `$ty`
macro_rules! try_value {
    ($evaluated:expr, $ty:expr) => {
        match $evaluated {
            Ok(value) => value,
            Err(error) => return Ok(odata_linq_types::QueryValue::error_of($ty, error)),
        }
    };
}

pub fn failed(message: impl Into<String>) -> EvaluationError {
    EvaluationError::new(ODL0200, message)
}

pub fn division_by_zero() -> EvaluationError {
    EvaluationError::new(ODL0201, "Attempted to divide by zero")
}

pub fn overflow(operation: &str) -> EvaluationError {
    EvaluationError::new(ODL0202, format!("Arithmetic overflow in {operation}"))
}

pub fn no_elements(operator: &str) -> EvaluationError {
    EvaluationError::new(ODL0203, format!("{operator}: sequence contains no elements"))
}

pub fn more_than_one_element(operator: &str) -> EvaluationError {
    EvaluationError::new(ODL0204, format!("{operator}: sequence contains more than one element"))
}

pub fn structural_collection(operator: &str) -> EvaluationError {
    EvaluationError::new(
        ODL0205,
        format!("{operator} is not supported over entity or complex values"),
    )
}

pub fn invalid_conversion(from: impl std::fmt::Display, to: impl std::fmt::Display) -> EvaluationError {
    EvaluationError::new(ODL0206, format!("Cannot convert '{from}' to '{to}'"))
}

pub fn no_body(name: &str) -> EvaluationError {
    EvaluationError::new(ODL0207, format!("'{name}' has no body to evaluate"))
}

/// The first evaluation error carried by any of `values`
pub fn first_error<'v>(values: impl IntoIterator<Item = &'v QueryValue>) -> Option<EvaluationError> {
    values
        .into_iter()
        .find_map(|v| v.evaluation_error().cloned())
}

/// Turn a value into an [`Evaluated`] by splitting off its error
pub fn checked(value: QueryValue) -> Evaluated<QueryValue> {
    match value.evaluation_error() {
        Some(error) => Err(error.clone()),
        None => Ok(value),
    }
}
