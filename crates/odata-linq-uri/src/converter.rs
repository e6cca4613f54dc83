//! Expression-to-string conversion
//!
//! Renders scalar and boolean expressions in OData URI expression syntax.
//! There is no precedence analysis: arithmetic is always parenthesized,
//! comparisons and logical operators never are.
//!
//! The first parameter met in the outermost scope is the implicit `$it`
//! and renders as nothing; parameters introduced by `any`/`all` are named
//! (`Orders/any(o:o/Amount gt 5)`).

use crate::{LiteralConverter, UriBuilderSettings, escape_literal};
use log::trace;
use odata_linq_ast::{
    AggregateExpr, BinaryOp, CanonicalFunction, ExprRef, Expression, UnaryOp,
};
use odata_linq_diagnostics::{ODL0002, ODL0106, QueryError, Result};
use odata_linq_types::ScalarValue;

/// Converts expressions into OData expression syntax
#[derive(Clone, Copy)]
pub struct ExpressionToStringConverter<'a> {
    literals: &'a dyn LiteralConverter,
    escape_literals: bool,
}

impl std::fmt::Debug for ExpressionToStringConverter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionToStringConverter")
            .field("escape_literals", &self.escape_literals)
            .finish_non_exhaustive()
    }
}

/// Parameter naming state of one conversion
#[derive(Default)]
struct Scope {
    implicit: Option<String>,
    lambda_depth: usize,
}

impl<'a> ExpressionToStringConverter<'a> {
    pub fn new(literals: &'a dyn LiteralConverter) -> Self {
        Self {
            literals,
            escape_literals: true,
        }
    }

    pub fn with_settings(mut self, settings: &UriBuilderSettings) -> Self {
        self.escape_literals = settings.escape_literals;
        self
    }

    /// Convert an expression; a lambda renders as its body with its first
    /// parameter implicit
    pub fn convert(&self, expr: &ExprRef) -> Result<String> {
        let mut scope = Scope::default();
        match &expr.expr {
            Expression::Lambda(lambda) => {
                scope.implicit = lambda.parameters.first().cloned();
                self.visit(&mut scope, &lambda.body)
            }
            _ => self.visit(&mut scope, expr),
        }
    }

    /// Render a scalar as an escaped literal
    pub fn literal(&self, value: &ScalarValue) -> Result<String> {
        let literal = self.literals.to_literal(value)?;
        Ok(if self.escape_literals {
            escape_literal(&literal)
        } else {
            literal
        })
    }

    /// Escape free text, such as a query option value, unless escaping is
    /// turned off
    pub fn escape(&self, text: &str) -> String {
        if self.escape_literals {
            escape_literal(text)
        } else {
            text.to_string()
        }
    }

    fn visit(&self, scope: &mut Scope, expr: &ExprRef) -> Result<String> {
        match &expr.expr {
            Expression::Constant(c) => self.literal(&c.value),
            Expression::Null(_) => self.literal(&ScalarValue::Null),
            Expression::Parameter(p) => {
                if scope.implicit.is_none() && scope.lambda_depth == 0 {
                    trace!("Parameter '{}' is the implicit range variable", p.name);
                    scope.implicit = Some(p.name.clone());
                }
                if scope.implicit.as_deref() == Some(p.name.as_str()) {
                    Ok(String::new())
                } else {
                    Ok(p.name.clone())
                }
            }
            Expression::Property(p) => {
                let instance = self.visit(scope, &p.instance)?;
                Ok(join_path(&instance, &p.name))
            }
            Expression::Binary(b) => {
                let left = self.visit(scope, &b.left)?;
                let right = self.visit(scope, &b.right)?;
                Ok(binary_template(b.op, &left, &right))
            }
            Expression::Unary(u) => {
                let operand = self.visit(scope, &u.operand)?;
                Ok(match u.op {
                    UnaryOp::Not => format!("not({operand})"),
                    UnaryOp::Negate => format!("-{operand}"),
                })
            }
            Expression::IsOf(t) => {
                let source = self.visit(scope, &t.source)?;
                Ok(type_function("isof", &source, &t.type_name))
            }
            Expression::As(t) => {
                let source = self.visit(scope, &t.source)?;
                Ok(type_function("cast", &source, &t.type_name))
            }
            Expression::CanonicalCall(c) => self.canonical(scope, c.function, &c.arguments),
            Expression::Any(a) => self.lambda_operator(scope, "any", a),
            Expression::All(a) => self.lambda_operator(scope, "all", a),
            other => Err(QueryError::not_supported(
                ODL0002,
                format!("{} cannot be rendered as an OData expression", other.name()),
            )),
        }
    }

    fn canonical(
        &self,
        scope: &mut Scope,
        function: CanonicalFunction,
        arguments: &[ExprRef],
    ) -> Result<String> {
        let arguments = match function {
            CanonicalFunction::Round => &arguments[..arguments.len().min(1)],
            _ => arguments,
        };
        let mut rendered = arguments
            .iter()
            .map(|arg| self.visit(scope, arg))
            .collect::<Result<Vec<_>>>()?;
        // substringof takes the searched-for string first
        if function == CanonicalFunction::Contains {
            rendered.reverse();
        }
        Ok(format!("{}({})", function.uri_name(), rendered.join(",")))
    }

    fn lambda_operator(&self, scope: &mut Scope, name: &str, a: &AggregateExpr) -> Result<String> {
        let source = self.visit(scope, &a.source)?;
        let Some(lambda) = &a.lambda else {
            return Ok(join_path(&source, &format!("{name}()")));
        };
        let Expression::Lambda(l) = &lambda.expr else {
            return Err(QueryError::contract(
                ODL0106,
                format!("{name} expects a lambda, found {}", lambda.expr.name()),
            ));
        };
        let [parameter] = l.parameters.as_slice() else {
            return Err(QueryError::contract(
                ODL0106,
                format!("{name} lambda must take one parameter"),
            ));
        };
        scope.lambda_depth += 1;
        let body = self.visit(scope, &l.body);
        scope.lambda_depth -= 1;
        Ok(join_path(&source, &format!("{name}({parameter}:{})", body?)))
    }
}

fn join_path(instance: &str, member: &str) -> String {
    if instance.is_empty() {
        member.to_string()
    } else {
        format!("{instance}/{member}")
    }
}

fn type_function(name: &str, source: &str, type_name: &str) -> String {
    if source.is_empty() {
        format!("{name}('{type_name}')")
    } else {
        format!("{name}({source},'{type_name}')")
    }
}

fn binary_template(op: BinaryOp, left: &str, right: &str) -> String {
    let keyword = match op {
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Equal => "eq",
        BinaryOp::NotEqual => "ne",
        BinaryOp::GreaterThan => "gt",
        BinaryOp::GreaterThanOrEqual => "ge",
        BinaryOp::LessThan => "lt",
        BinaryOp::LessThanOrEqual => "le",
        BinaryOp::Add => "add",
        BinaryOp::Subtract => "sub",
        BinaryOp::Multiply => "mul",
        BinaryOp::Divide => "div",
        BinaryOp::Modulo => "mod",
    };
    if op.is_arithmetic() {
        format!("({left} {keyword} {right})")
    } else {
        format!("{left} {keyword} {right}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DefaultLiteralConverter;
    use odata_linq_ast::{QueryBuilder, call, constant, lambda, null_of, param, root};
    use odata_linq_types::QueryType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn convert(expr: &ExprRef) -> String {
        ExpressionToStringConverter::new(&DefaultLiteralConverter)
            .convert(expr)
            .unwrap()
    }

    #[rstest]
    #[case::arithmetic_nesting(
        lambda("x", |x| x.prop("A").add(&x.prop("B").multiply(&x.prop("C")))),
        "(A add (B mul C))"
    )]
    #[case::logical_flat(
        lambda("x", |x| x.prop("A").equal(&x.prop("B")).and(&x.prop("C").equal(&x.prop("D")))),
        "A eq B and C eq D"
    )]
    #[case::not(lambda("x", |x| x.prop("Active").not()), "not(Active)")]
    #[case::negate(lambda("x", |x| x.prop("Amount").negate()), "-Amount")]
    #[case::null(lambda("x", |x| x.prop("Name").not_equal(&null_of(QueryType::string()))), "Name ne null")]
    #[case::nested_property(lambda("x", |x| x.prop("Address").prop("City")), "Address/City")]
    #[case::string_literal(
        lambda("x", |x| x.prop("Name").equal(&constant("O'Brien & Sons"))),
        "Name eq 'O''Brien%20%26%20Sons'"
    )]
    #[case::substringof(
        lambda("x", |x| x.prop("Name").call(CanonicalFunction::Contains, vec![constant("a")])),
        "substringof('a',Name)"
    )]
    #[case::startswith(
        lambda("x", |x| x.prop("Name").call(CanonicalFunction::StartsWith, vec![constant("A")])),
        "startswith(Name,'A')"
    )]
    #[case::year(
        lambda("x", |x| x.prop("Since").call(CanonicalFunction::Year, vec![]).equal(&constant(2020))),
        "year(Since) eq 2020"
    )]
    #[case::concat(
        lambda("x", |x| call(CanonicalFunction::Concat, vec![x.prop("First"), x.prop("Last")])),
        "concat(First,Last)"
    )]
    #[case::isof(lambda("x", |x| x.is_of("NS.Vip")), "isof('NS.Vip')")]
    #[case::isof_member(lambda("x", |x| x.prop("Owner").is_of("NS.Vip")), "isof(Owner,'NS.Vip')")]
    #[case::cast(
        lambda("x", |x| x.as_type("NS.Vip").prop("Level").greater_than(&constant(1))),
        "cast('NS.Vip')/Level gt 1"
    )]
    #[case::any(
        lambda("c", |c| c.prop("Orders").any_where(lambda("o", |o| o.prop("Amount").greater_than(&constant(5))))),
        "Orders/any(o:o/Amount gt 5)"
    )]
    #[case::any_outer_reference(
        lambda("c", |c| c.prop("Orders").any_where(lambda("o", |o| o.prop("Amount").greater_than(&c.prop("Limit"))))),
        "Orders/any(o:o/Amount gt Limit)"
    )]
    #[case::all(
        lambda("c", |c| c.prop("Orders").all(lambda("o", |o| o.prop("Paid")))),
        "Orders/all(o:o/Paid)"
    )]
    #[case::any_without_predicate(lambda("c", |c| c.prop("Orders").any()), "Orders/any()")]
    fn test_convert(#[case] expr: ExprRef, #[case] expected: &str) {
        assert_eq!(convert(&expr), expected);
    }

    #[test]
    fn test_round_drops_digits() {
        // round(x, 2) keeps only its first argument
        let expr = lambda("x", |x| {
            call(CanonicalFunction::Round, vec![x.prop("Amount"), constant(2)]).equal(&constant(3))
        });
        assert_eq!(convert(&expr), "round(Amount) eq 3");
    }

    #[test]
    fn test_first_parameter_outside_lambda_is_implicit() {
        let expr = param("it").prop("Id").equal(&param("other").prop("Id"));
        assert_eq!(convert(&expr), "Id eq other/Id");
    }

    #[test]
    fn test_unescaped_literals() {
        let settings = UriBuilderSettings {
            escape_literals: false,
            ..Default::default()
        };
        let converter = ExpressionToStringConverter::new(&DefaultLiteralConverter).with_settings(&settings);
        let expr = lambda("x", |x| x.prop("Name").equal(&constant("a b")));
        assert_eq!(converter.convert(&expr).unwrap(), "Name eq 'a b'");
    }

    #[rstest]
    #[case::count(lambda("c", |c| c.prop("Orders").count().greater_than(&constant(1))))]
    #[case::query(lambda("c", |_| root("Orders").count().greater_than(&constant(1))))]
    #[case::conditional(lambda("c", |c| odata_linq_ast::conditional(c.prop("Flag"), constant(1), constant(2))))]
    #[case::record(lambda("c", |c| odata_linq_ast::record([("Id", c.prop("Id"))])))]
    fn test_not_renderable(#[case] expr: ExprRef) {
        let err = ExpressionToStringConverter::new(&DefaultLiteralConverter)
            .convert(&expr)
            .unwrap_err();
        assert_eq!(err.code(), ODL0002);
        assert!(err.is_not_supported());
    }

    fn arithmetic() -> impl Strategy<Value = ExprRef> {
        let leaf = (0i32..100).prop_map(|v| constant(v));
        leaf.prop_recursive(4, 32, 2, |inner| {
            (inner.clone(), inner, 0usize..5).prop_map(|(l, r, op)| match op {
                0 => l.add(&r),
                1 => l.subtract(&r),
                2 => l.multiply(&r),
                3 => l.divide(&r),
                _ => l.modulo(&r),
            })
        })
    }

    fn binary_count(expr: &ExprRef) -> usize {
        let mut count = 0;
        odata_linq_ast::walk(expr, &mut |node: &ExprRef| {
            if matches!(node.expr, Expression::Binary(_)) {
                count += 1;
            }
        });
        count
    }

    proptest! {
        #[test]
        fn test_arithmetic_is_fully_parenthesized(expr in arithmetic()) {
            let rendered = convert(&expr);
            let opening = rendered.matches('(').count();
            prop_assert_eq!(opening, binary_count(&expr));
            prop_assert_eq!(opening, rendered.matches(')').count());
        }
    }
}
