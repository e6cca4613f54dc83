//! Custom function inlining
//!
//! Calls to custom functions that carry a body are replaced by the body,
//! with every function parameter reference substituted by the matching
//! call-site argument. Calls inside bodies are inlined first, so nested
//! functions expand completely. Recursion is rejected.
//!
//! Lambda parameters declared in a body are renamed away from every
//! parameter name of the enclosing tree before substitution, so an argument
//! referring to an outer lambda is never captured by a body lambda.

use crate::parameters::Renamer;
use log::{debug, trace};
use odata_linq_ast::{ExprRef, Expression, ExpressionRewriter, FunctionCallExpr};
use odata_linq_diagnostics::{ODL0003, ODL0102, ODL0104, QueryError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Inlines custom function bodies at their call sites
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomFunctionResolver;

impl CustomFunctionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Inline every call with a body; returns the same tree when there is
    /// nothing to inline
    pub fn resolve(&self, expr: &ExprRef) -> Result<ExprRef> {
        let mut inliner = Inliner {
            reserved: parameter_names(expr),
            ..Default::default()
        };
        let result = inliner.rewrite(expr)?;
        debug!("Custom function resolution inlined {} call(s)", inliner.inlined);
        Ok(result)
    }
}

/// Every lambda parameter and parameter reference name in a tree
fn parameter_names(expr: &ExprRef) -> HashSet<String> {
    let mut names = HashSet::new();
    odata_linq_ast::walk(expr, &mut |node: &ExprRef| match &node.expr {
        Expression::Lambda(lambda) => names.extend(lambda.parameters.iter().cloned()),
        Expression::Parameter(parameter) => {
            names.insert(parameter.name.clone());
        }
        _ => {}
    });
    names
}

#[derive(Default)]
struct Inliner {
    call_stack: Vec<String>,
    reserved: HashSet<String>,
    inlined: usize,
}

impl Inliner {
    fn inline(&mut self, call: &FunctionCallExpr, body: &ExprRef) -> Result<ExprRef> {
        let function = &call.function;
        let name = function.full_name();
        if self.call_stack.contains(&name) {
            let chain = self
                .call_stack
                .iter()
                .chain(std::iter::once(&name))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(QueryError::not_supported(
                ODL0003,
                format!("Recursive function calls are not supported: {chain}"),
            ));
        }
        if call.arguments.len() != function.parameters.len() {
            return Err(QueryError::contract(
                ODL0104,
                format!(
                    "Function '{name}' expects {} argument(s), got {}",
                    function.parameters.len(),
                    call.arguments.len()
                ),
            ));
        }

        let arguments = call
            .arguments
            .iter()
            .map(|argument| self.rewrite(argument))
            .collect::<Result<Vec<_>>>()?;

        self.call_stack.push(name.clone());
        let expanded = self.rewrite(body);
        self.call_stack.pop();
        let expanded = expanded?;

        let mut renamer = Renamer::reserving(std::mem::take(&mut self.reserved));
        let expanded = renamer.rewrite(&expanded);
        self.reserved = renamer.into_used();
        let expanded = expanded?;

        let bindings: HashMap<&str, ExprRef> = function
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .zip(arguments)
            .collect();
        let mut substitution = Substitution {
            function: &name,
            bindings: &bindings,
        };
        trace!("Inlined call to {name}");
        self.inlined += 1;
        substitution.rewrite(&expanded)
    }
}

impl ExpressionRewriter for Inliner {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match &expr.expr {
            Expression::FunctionCall(call) => match &call.function.body {
                Some(body) => self.inline(call, body),
                None => self.rewrite_children(expr),
            },
            _ => self.rewrite_children(expr),
        }
    }
}

/// Replaces function parameter references with call-site arguments
struct Substitution<'a> {
    function: &'a str,
    bindings: &'a HashMap<&'a str, ExprRef>,
}

impl ExpressionRewriter for Substitution<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match &expr.expr {
            Expression::FunctionParameterRef(reference) => self
                .bindings
                .get(reference.name.as_str())
                .map(Arc::clone)
                .ok_or_else(|| {
                    QueryError::contract(
                        ODL0102,
                        format!(
                            "Function '{}' has no parameter '{}'",
                            self.function, reference.name
                        ),
                    )
                }),
            _ => self.rewrite_children(expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_ast::{
        CustomFunction, FunctionParameter, QueryBuilder, call_function, constant, function_parameter,
        lambda, root,
    };
    use odata_linq_types::QueryType;
    use pretty_assertions::assert_eq;

    fn is_adult() -> Arc<CustomFunction> {
        Arc::new(
            CustomFunction::new(
                "NS",
                "IsAdult",
                vec![FunctionParameter::new("age", QueryType::int32())],
                QueryType::boolean(),
            )
            .with_body(function_parameter("age").greater_or_equal(&constant(18))),
        )
    }

    #[test]
    fn test_inline_substitutes_arguments() {
        let query = root("People")
            .filter(lambda("p", |p| call_function(is_adult(), vec![p.prop("Age")])));
        let expected = root("People")
            .filter(lambda("p", |p| p.prop("Age").greater_or_equal(&constant(18))));
        let resolved = CustomFunctionResolver::new().resolve(&query).unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_nested_functions_expand() {
        let is_senior_adult = Arc::new(
            CustomFunction::new(
                "NS",
                "IsSeniorAdult",
                vec![FunctionParameter::new("years", QueryType::int32())],
                QueryType::boolean(),
            )
            .with_body(
                call_function(is_adult(), vec![function_parameter("years")])
                    .and(&function_parameter("years").greater_than(&constant(65))),
            ),
        );
        let query = root("People")
            .filter(lambda("p", |p| call_function(is_senior_adult.clone(), vec![p.prop("Age")])));
        let expected = root("People").filter(lambda("p", |p| {
            p.prop("Age")
                .greater_or_equal(&constant(18))
                .and(&p.prop("Age").greater_than(&constant(65)))
        }));
        assert_eq!(CustomFunctionResolver::new().resolve(&query).unwrap(), expected);
    }

    #[test]
    fn test_functions_without_body_are_kept() {
        let opaque = Arc::new(CustomFunction::new("NS", "Opaque", Vec::new(), QueryType::int32()));
        let query = root("People").filter(lambda("p", |p| {
            p.prop("Age").equal(&call_function(opaque.clone(), Vec::new()))
        }));
        let resolved = CustomFunctionResolver::new().resolve(&query).unwrap();
        assert!(Arc::ptr_eq(&resolved, &query));
    }

    #[test]
    fn test_recursion_is_not_supported() {
        // Functions are identified by qualified name
        let inner = Arc::new(
            CustomFunction::new("NS", "Loop", Vec::new(), QueryType::boolean())
                .with_body(constant(true)),
        );
        let outer = Arc::new(
            CustomFunction::new("NS", "Loop", Vec::new(), QueryType::boolean())
                .with_body(call_function(inner, Vec::new())),
        );
        let query = root("People").filter(lambda("p", |_| call_function(outer.clone(), Vec::new())));
        let err = CustomFunctionResolver::new().resolve(&query).unwrap_err();
        assert_eq!(err.code(), ODL0003);
        assert!(err.is_not_supported());
    }

    #[test]
    fn test_argument_count_mismatch() {
        let query = root("People").filter(lambda("p", |_| call_function(is_adult(), Vec::new())));
        let err = CustomFunctionResolver::new().resolve(&query).unwrap_err();
        assert_eq!(err.code(), odata_linq_diagnostics::ODL0104);
    }
}
