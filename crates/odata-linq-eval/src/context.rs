//! Evaluation context for query execution

use odata_linq_types::QueryValue;
use std::collections::HashMap;

/// Per-call evaluation state: lambda parameter bindings, custom function
/// arguments and the recursion guard
#[derive(Debug)]
pub struct EvaluationContext {
    /// Lambda scopes, innermost last
    scopes: Vec<HashMap<String, QueryValue>>,
    /// Arguments of the custom functions being evaluated, innermost last
    arguments: Vec<HashMap<String, QueryValue>>,
    depth: usize,
    max_depth: usize,
}

impl EvaluationContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            scopes: Vec::new(),
            arguments: Vec::new(),
            depth: 0,
            max_depth,
        }
    }

    /// Enter one level of nesting; `false` once the limit is reached
    pub fn enter_recursion(&mut self) -> bool {
        if self.depth >= self.max_depth {
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn exit_recursion(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Bind lambda parameters for the duration of a body evaluation
    pub fn push_scope(&mut self, bindings: HashMap<String, QueryValue>) {
        self.scopes.push(bindings);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Look up a lambda parameter, innermost scope first
    pub fn parameter(&self, name: &str) -> Option<&QueryValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn push_arguments(&mut self, arguments: HashMap<String, QueryValue>) {
        self.arguments.push(arguments);
    }

    pub fn pop_arguments(&mut self) {
        self.arguments.pop();
    }

    /// Argument of the innermost custom function
    pub fn argument(&self, name: &str) -> Option<&QueryValue> {
        self.arguments.last().and_then(|args| args.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursion_guard() {
        let mut ctx = EvaluationContext::new(2);
        assert!(ctx.enter_recursion());
        assert!(ctx.enter_recursion());
        assert!(!ctx.enter_recursion());
        ctx.exit_recursion();
        assert!(ctx.enter_recursion());
    }

    #[test]
    fn test_inner_scope_shadows() {
        let mut ctx = EvaluationContext::new(8);
        ctx.push_scope(HashMap::from([("c".to_string(), QueryValue::int32(1))]));
        ctx.push_scope(HashMap::from([("c".to_string(), QueryValue::int32(2))]));
        assert_eq!(ctx.parameter("c"), Some(&QueryValue::int32(2)));
        ctx.pop_scope();
        assert_eq!(ctx.parameter("c"), Some(&QueryValue::int32(1)));
        ctx.pop_scope();
        assert!(ctx.parameter("c").is_none());
    }

    #[test]
    fn test_arguments_are_not_inherited() {
        let mut ctx = EvaluationContext::new(8);
        ctx.push_arguments(HashMap::from([("age".to_string(), QueryValue::int32(30))]));
        ctx.push_arguments(HashMap::new());
        assert!(ctx.argument("age").is_none());
        ctx.pop_arguments();
        assert!(ctx.argument("age").is_some());
    }
}
