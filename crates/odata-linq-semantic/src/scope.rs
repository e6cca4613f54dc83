//! Lexical scopes for lambda parameters

use indexmap::IndexMap;

/// A stack of lexical scopes mapping parameter names to `T`
#[derive(Debug, Clone)]
pub struct ScopeManager<T> {
    frames: Vec<IndexMap<String, T>>,
}

impl<T> ScopeManager<T> {
    /// Create a manager with no open scope
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Enter a new scope
    pub fn enter(&mut self) {
        self.frames.push(IndexMap::new());
    }

    /// Leave the innermost scope
    pub fn leave(&mut self) -> Option<IndexMap<String, T>> {
        self.frames.pop()
    }

    /// Define a name in the innermost scope, opening one if needed
    pub fn define(&mut self, name: impl Into<String>, value: T) {
        if self.frames.is_empty() {
            self.enter();
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// Look up a name, innermost scope first
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl<T> Default for ScopeManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing() {
        let mut scopes = ScopeManager::new();
        scopes.enter();
        scopes.define("c", 1);
        scopes.enter();
        scopes.define("c", 2);
        assert_eq!(scopes.lookup("c"), Some(&2));
        scopes.leave();
        assert_eq!(scopes.lookup("c"), Some(&1));
        assert_eq!(scopes.depth(), 1);
        scopes.leave();
        assert_eq!(scopes.lookup("c"), None);
    }
}
