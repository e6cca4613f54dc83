//! Canonical function registry
//!
//! Maps each [`CanonicalFunction`] to its implementation over primitive
//! arguments. Instance functions (the string and date members) propagate a
//! null instance without being invoked; static functions receive nulls and
//! decide for themselves.

use crate::error::{Evaluated, failed};
use chrono::{Datelike, NaiveDateTime, Timelike};
use log::trace;
use odata_linq_ast::CanonicalFunction;
use odata_linq_types::ScalarValue;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Implementation of a canonical function
pub type CanonicalFn = Arc<dyn Fn(&[ScalarValue]) -> Evaluated<ScalarValue> + Send + Sync>;

/// How a function treats its first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Member of the first argument; a null instance yields null
    Instance,
    /// Free function over all arguments
    Static,
}

/// A registered implementation
#[derive(Clone)]
pub struct CanonicalEntry {
    pub kind: FunctionKind,
    pub implementation: CanonicalFn,
}

/// Registry of canonical function implementations
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<CanonicalFunction, CanonicalEntry>,
}

static STANDARD: LazyLock<FunctionRegistry> = LazyLock::new(FunctionRegistry::with_standard_functions);

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared registry with every canonical function
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    /// Create a registry with every canonical function
    pub fn with_standard_functions() -> Self {
        use CanonicalFunction as F;
        let mut registry = Self::new();

        // String functions
        registry.register(F::Contains, |args| {
            Ok(ScalarValue::Boolean(string_arg(args, 0, "substringof")?.contains(string_arg(args, 1, "substringof")?)))
        });
        registry.register(F::StartsWith, |args| {
            Ok(ScalarValue::Boolean(string_arg(args, 0, "startswith")?.starts_with(string_arg(args, 1, "startswith")?)))
        });
        registry.register(F::EndsWith, |args| {
            Ok(ScalarValue::Boolean(string_arg(args, 0, "endswith")?.ends_with(string_arg(args, 1, "endswith")?)))
        });
        registry.register(F::Length, |args| {
            let length = string_arg(args, 0, "length")?.chars().count();
            int32(length, "length")
        });
        registry.register(F::IndexOf, index_of);
        registry.register(F::Replace, replace);
        registry.register(F::Substring, substring);
        registry.register(F::ToLower, |args| Ok(ScalarValue::String(string_arg(args, 0, "tolower")?.to_lowercase())));
        registry.register(F::ToUpper, |args| Ok(ScalarValue::String(string_arg(args, 0, "toupper")?.to_uppercase())));
        registry.register(F::Trim, |args| Ok(ScalarValue::String(string_arg(args, 0, "trim")?.trim().to_string())));
        registry.register(F::Concat, concat);

        // Date parts
        registry.register(F::Year, |args| Ok(ScalarValue::Int32(temporal_arg(args, "year")?.year())));
        registry.register(F::Month, |args| date_part(temporal_arg(args, "month")?.month()));
        registry.register(F::Day, |args| date_part(temporal_arg(args, "day")?.day()));
        registry.register(F::Hour, |args| date_part(temporal_arg(args, "hour")?.hour()));
        registry.register(F::Minute, |args| date_part(temporal_arg(args, "minute")?.minute()));
        registry.register(F::Second, |args| date_part(temporal_arg(args, "second")?.second()));

        // Math functions
        registry.register(F::Round, |args| {
            rounding(args, "round", |d| d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero), f64::round)
        });
        registry.register(F::Floor, |args| rounding(args, "floor", |d| d.floor(), f64::floor));
        registry.register(F::Ceiling, |args| rounding(args, "ceiling", |d| d.ceil(), f64::ceil));

        registry
    }

    /// Register (or replace) the implementation of a function
    pub fn register<F>(&mut self, function: CanonicalFunction, implementation: F)
    where
        F: Fn(&[ScalarValue]) -> Evaluated<ScalarValue> + Send + Sync + 'static,
    {
        let kind = if function.is_instance() {
            FunctionKind::Instance
        } else {
            FunctionKind::Static
        };
        self.functions.insert(
            function,
            CanonicalEntry {
                kind,
                implementation: Arc::new(implementation),
            },
        );
    }

    pub fn get(&self, function: CanonicalFunction) -> Option<&CanonicalEntry> {
        self.functions.get(&function)
    }

    pub fn contains(&self, function: CanonicalFunction) -> bool {
        self.functions.contains_key(&function)
    }

    /// Invoke a function; a null instance short-circuits to null
    pub fn invoke(&self, function: CanonicalFunction, arguments: &[ScalarValue]) -> Evaluated<ScalarValue> {
        let entry = self
            .get(function)
            .ok_or_else(|| failed(format!("Function '{}' is not registered", function.uri_name())))?;
        if entry.kind == FunctionKind::Instance && arguments.first().is_none_or(ScalarValue::is_null) {
            trace!("Null instance for {}, skipping invocation", function.uri_name());
            return Ok(ScalarValue::Null);
        }
        (entry.implementation)(arguments)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

fn argument<'a>(args: &'a [ScalarValue], index: usize, function: &str) -> Evaluated<&'a ScalarValue> {
    match args.get(index) {
        None => Err(failed(format!("{function}: missing argument {}", index + 1))),
        Some(ScalarValue::Null) => Err(failed(format!("{function}: argument {} is null", index + 1))),
        Some(value) => Ok(value),
    }
}

fn string_arg<'a>(args: &'a [ScalarValue], index: usize, function: &str) -> Evaluated<&'a str> {
    let value = argument(args, index, function)?;
    value
        .as_str()
        .ok_or_else(|| failed(format!("{function}: expected a string, found '{value}'")))
}

fn int_arg(args: &[ScalarValue], index: usize, function: &str) -> Evaluated<i64> {
    let value = argument(args, index, function)?;
    value
        .as_i64()
        .ok_or_else(|| failed(format!("{function}: expected an integer, found '{value}'")))
}

fn temporal_arg(args: &[ScalarValue], function: &str) -> Evaluated<NaiveDateTime> {
    match argument(args, 0, function)? {
        ScalarValue::DateTime(dt) => Ok(*dt),
        ScalarValue::DateTimeOffset(dt) => Ok(dt.naive_local()),
        other => Err(failed(format!("{function}: expected a date/time, found '{other}'"))),
    }
}

fn int32(value: usize, function: &str) -> Evaluated<ScalarValue> {
    i32::try_from(value)
        .map(ScalarValue::Int32)
        .map_err(|_| failed(format!("{function}: result out of range")))
}

fn date_part(value: u32) -> Evaluated<ScalarValue> {
    int32(value as usize, "date part")
}

fn index_of(args: &[ScalarValue]) -> Evaluated<ScalarValue> {
    let s = string_arg(args, 0, "indexof")?;
    let search = string_arg(args, 1, "indexof")?;
    match s.find(search) {
        Some(byte_index) => int32(s[..byte_index].chars().count(), "indexof"),
        None => Ok(ScalarValue::Int32(-1)),
    }
}

fn replace(args: &[ScalarValue]) -> Evaluated<ScalarValue> {
    let s = string_arg(args, 0, "replace")?;
    let find = string_arg(args, 1, "replace")?;
    let with = string_arg(args, 2, "replace")?;
    if find.is_empty() {
        return Err(failed("replace: the search string must not be empty"));
    }
    Ok(ScalarValue::String(s.replace(find, with)))
}

/// Character-based substring; start and length are clamped to the string
fn substring(args: &[ScalarValue]) -> Evaluated<ScalarValue> {
    let s = string_arg(args, 0, "substring")?;
    let char_count = s.chars().count();
    let start = usize::try_from(int_arg(args, 1, "substring")?.max(0))
        .unwrap_or(usize::MAX)
        .min(char_count);
    let length = match args.get(2) {
        Some(_) => usize::try_from(int_arg(args, 2, "substring")?.max(0)).unwrap_or(usize::MAX),
        None => char_count,
    };
    Ok(ScalarValue::String(s.chars().skip(start).take(length).collect()))
}

/// Concatenation renders non-string operands; null counts as empty
fn concat(args: &[ScalarValue]) -> Evaluated<ScalarValue> {
    let rendered: String = args
        .iter()
        .map(|arg| match arg {
            ScalarValue::Null => String::new(),
            other => other.to_string(),
        })
        .collect();
    Ok(ScalarValue::String(rendered))
}

/// Apply a rounding function to the first argument; further arguments are
/// ignored
fn rounding(
    args: &[ScalarValue],
    function: &str,
    decimal: impl Fn(Decimal) -> Decimal,
    double: impl Fn(f64) -> f64,
) -> Evaluated<ScalarValue> {
    match args.first() {
        None | Some(ScalarValue::Null) => Ok(ScalarValue::Null),
        Some(ScalarValue::Decimal(d)) => Ok(ScalarValue::Decimal(decimal(*d))),
        Some(other) => other
            .as_f64()
            .map(|v| ScalarValue::Double(double(v)))
            .ok_or_else(|| failed(format!("{function}: expected a number, found '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use odata_linq_diagnostics::ODL0200;
    use rstest::rstest;

    fn invoke(function: CanonicalFunction, args: &[ScalarValue]) -> Evaluated<ScalarValue> {
        FunctionRegistry::standard().invoke(function, args)
    }

    fn s(value: &str) -> ScalarValue {
        ScalarValue::from(value)
    }

    #[test]
    fn test_every_function_is_registered() {
        let registry = FunctionRegistry::standard();
        for function in CanonicalFunction::ALL {
            assert!(registry.contains(function), "{function:?} is not registered");
        }
    }

    #[rstest]
    #[case(CanonicalFunction::Contains, vec![s("Alfreds"), s("fred")], ScalarValue::Boolean(true))]
    #[case(CanonicalFunction::StartsWith, vec![s("Alfreds"), s("Alf")], ScalarValue::Boolean(true))]
    #[case(CanonicalFunction::EndsWith, vec![s("Alfreds"), s("x")], ScalarValue::Boolean(false))]
    #[case(CanonicalFunction::Length, vec![s("héllo")], ScalarValue::Int32(5))]
    #[case(CanonicalFunction::IndexOf, vec![s("héllo"), s("llo")], ScalarValue::Int32(2))]
    #[case(CanonicalFunction::IndexOf, vec![s("hello"), s("z")], ScalarValue::Int32(-1))]
    #[case(CanonicalFunction::Replace, vec![s("a-b-c"), s("-"), s("+")], s("a+b+c"))]
    #[case(CanonicalFunction::Substring, vec![s("hello"), ScalarValue::Int32(1)], s("ello"))]
    #[case(CanonicalFunction::Substring, vec![s("hello"), ScalarValue::Int32(1), ScalarValue::Int32(3)], s("ell"))]
    #[case(CanonicalFunction::Substring, vec![s("hello"), ScalarValue::Int32(10)], s(""))]
    #[case(CanonicalFunction::Substring, vec![s("hello"), ScalarValue::Int32(3), ScalarValue::Int32(10)], s("lo"))]
    #[case(CanonicalFunction::ToUpper, vec![s("abc")], s("ABC"))]
    #[case(CanonicalFunction::Trim, vec![s("  abc ")], s("abc"))]
    #[case(CanonicalFunction::Concat, vec![s("a"), ScalarValue::Int32(1)], s("a1"))]
    #[case(CanonicalFunction::Concat, vec![ScalarValue::Null, s("b")], s("b"))]
    fn test_string_functions(
        #[case] function: CanonicalFunction,
        #[case] args: Vec<ScalarValue>,
        #[case] expected: ScalarValue,
    ) {
        assert_eq!(invoke(function, &args).unwrap(), expected);
    }

    #[rstest]
    #[case(ScalarValue::Decimal(Decimal::new(25, 1)), ScalarValue::Decimal(Decimal::from(3)))]
    #[case(ScalarValue::Decimal(Decimal::new(-25, 1)), ScalarValue::Decimal(Decimal::from(-3)))]
    #[case(ScalarValue::Double(2.5), ScalarValue::Double(3.0))]
    #[case(ScalarValue::Int32(2), ScalarValue::Double(2.0))]
    fn test_round_midpoint_away_from_zero(#[case] input: ScalarValue, #[case] expected: ScalarValue) {
        assert_eq!(invoke(CanonicalFunction::Round, &[input]).unwrap(), expected);
    }

    #[test]
    fn test_round_ignores_digits() {
        let result = invoke(
            CanonicalFunction::Round,
            &[ScalarValue::Decimal(Decimal::new(1234, 2)), ScalarValue::Int32(1)],
        );
        assert_eq!(result.unwrap(), ScalarValue::Decimal(Decimal::from(12)));
    }

    #[test]
    fn test_floor_and_ceiling() {
        let value = [ScalarValue::Decimal(Decimal::new(-15, 1))];
        assert_eq!(
            invoke(CanonicalFunction::Floor, &value).unwrap(),
            ScalarValue::Decimal(Decimal::from(-2))
        );
        assert_eq!(
            invoke(CanonicalFunction::Ceiling, &value).unwrap(),
            ScalarValue::Decimal(Decimal::from(-1))
        );
    }

    #[test]
    fn test_date_parts() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(10, 20, 30).unwrap();
        let args = [ScalarValue::DateTime(dt)];
        assert_eq!(invoke(CanonicalFunction::Year, &args).unwrap(), ScalarValue::Int32(2024));
        assert_eq!(invoke(CanonicalFunction::Month, &args).unwrap(), ScalarValue::Int32(3));
        assert_eq!(invoke(CanonicalFunction::Second, &args).unwrap(), ScalarValue::Int32(30));

        let offset = DateTime::parse_from_rfc3339("2024-03-15T23:30:00+05:00").unwrap();
        let args = [ScalarValue::DateTimeOffset(offset)];
        assert_eq!(invoke(CanonicalFunction::Day, &args).unwrap(), ScalarValue::Int32(15));
        assert_eq!(invoke(CanonicalFunction::Hour, &args).unwrap(), ScalarValue::Int32(23));
    }

    #[test]
    fn test_null_instance_propagates() {
        assert_eq!(
            invoke(CanonicalFunction::ToLower, &[ScalarValue::Null]).unwrap(),
            ScalarValue::Null
        );
        assert_eq!(
            invoke(CanonicalFunction::Length, &[ScalarValue::Null]).unwrap(),
            ScalarValue::Null
        );
    }

    #[test]
    fn test_null_argument_fails() {
        let err = invoke(CanonicalFunction::StartsWith, &[s("abc"), ScalarValue::Null]).unwrap_err();
        assert_eq!(err.code, ODL0200);
        let err = invoke(CanonicalFunction::Replace, &[s("abc"), s(""), s("x")]).unwrap_err();
        assert_eq!(err.code, ODL0200);
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = FunctionRegistry::new();
        registry.register(CanonicalFunction::Length, |_| Ok(ScalarValue::Int32(42)));
        assert_eq!(
            registry.invoke(CanonicalFunction::Length, &[s("x")]).unwrap(),
            ScalarValue::Int32(42)
        );
        assert!(registry.invoke(CanonicalFunction::Trim, &[s("x")]).is_err());
    }
}
