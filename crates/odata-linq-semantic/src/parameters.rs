//! Lambda parameter naming
//!
//! Every lambda parameter gets a name unique within the whole tree. Empty
//! names become `p`, `p1`, ...; a name already taken by an enclosing or an
//! earlier lambda is suffixed with a counter (`c` becomes `c1`). Parameter
//! references follow the innermost lambda that declared their original
//! name.

use crate::ScopeManager;
use log::{debug, trace};
use odata_linq_ast::{
    ExprRef, Expression, ExpressionRewriter, LambdaExpr, ParameterExpr, QueryExpression,
};
use odata_linq_diagnostics::Result;
use std::collections::HashSet;
use std::sync::Arc;

const GENERATED_NAME: &str = "p";

/// Assigns unique lambda parameter names
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterNameResolver;

impl ParameterNameResolver {
    pub fn new() -> Self {
        Self
    }

    /// Rename parameters; a tree that needs no renaming is returned as is
    pub fn resolve(&self, expr: &ExprRef) -> Result<ExprRef> {
        let mut renamer = Renamer::default();
        let result = renamer.rewrite(expr)?;
        debug!(
            "Parameter names resolved ({} lambda parameters, tree {})",
            renamer.used.len(),
            if Arc::ptr_eq(&result, expr) { "unchanged" } else { "rewritten" }
        );
        Ok(result)
    }
}

#[derive(Default)]
pub(crate) struct Renamer {
    scopes: ScopeManager<String>,
    used: HashSet<String>,
}

impl Renamer {
    /// A renamer that never hands out any of the `reserved` names
    pub(crate) fn reserving(reserved: HashSet<String>) -> Self {
        Self {
            scopes: ScopeManager::new(),
            used: reserved,
        }
    }

    /// Names reserved so far, including the ones handed out
    pub(crate) fn into_used(self) -> HashSet<String> {
        self.used
    }

    fn unique_name(&mut self, name: &str) -> String {
        let base = if name.is_empty() { GENERATED_NAME } else { name };
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut counter = 1usize;
        loop {
            let candidate = format!("{base}{counter}");
            if self.used.insert(candidate.clone()) {
                trace!("Renamed lambda parameter '{name}' to '{candidate}'");
                return candidate;
            }
            counter += 1;
        }
    }

    fn rewrite_lambda(&mut self, expr: &ExprRef, lambda: &LambdaExpr) -> Result<ExprRef> {
        self.scopes.enter();
        let mut renamed = false;
        let parameters: Vec<String> = lambda
            .parameters
            .iter()
            .map(|original| {
                let name = self.unique_name(original);
                renamed |= name != *original;
                self.scopes.define(original.clone(), name.clone());
                name
            })
            .collect();
        let body = self.rewrite(&lambda.body);
        self.scopes.leave();
        let body = body?;

        if !renamed && Arc::ptr_eq(&body, &lambda.body) {
            return Ok(Arc::clone(expr));
        }
        Ok(Arc::new(QueryExpression {
            expr: Expression::Lambda(LambdaExpr { parameters, body }),
            expression_type: expr.expression_type.clone(),
        }))
    }
}

impl ExpressionRewriter for Renamer {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match &expr.expr {
            Expression::Lambda(lambda) => self.rewrite_lambda(expr, lambda),
            Expression::Parameter(parameter) => match self.scopes.lookup(&parameter.name) {
                Some(name) if *name != parameter.name => Ok(Arc::new(QueryExpression {
                    expr: Expression::Parameter(ParameterExpr { name: name.clone() }),
                    expression_type: expr.expression_type.clone(),
                })),
                _ => Ok(Arc::clone(expr)),
            },
            _ => self.rewrite_children(expr),
        }
    }
}
