use std::{collections::HashMap, iter};

use super::value::Val;

/// A single level of bindings.
pub type Scope = HashMap<String, Val>;

/// The scope stack: a global scope that is never popped plus any number of
/// nested scopes, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    global: Scope,
    locals: Vec<Scope>,
}

impl Environment {
    pub fn new(global: Scope) -> Environment {
        Environment {
            global,
            locals: Vec::new(),
        }
    }

    pub fn push(&mut self, scope: Scope) {
        self.locals.push(scope);
    }

    /// Removes the innermost scope. Returns `None`, leaving the stack
    /// untouched, when only the global scope is left.
    pub fn pop(&mut self) -> Option<Scope> {
        self.locals.pop()
    }

    /// Number of scopes, the global one included.
    pub fn depth(&self) -> usize {
        self.locals.len() + 1
    }

    /// Scopes from the global one to the innermost.
    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        iter::once(&self.global).chain(self.locals.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.locals
            .iter()
            .rev()
            .chain(iter::once(&self.global))
            .find_map(|scope| scope.get(name))
    }

    /// Rebinds `name` in the innermost scope that already has it, or binds
    /// it in the innermost scope when no scope does.
    pub fn assign(&mut self, name: &str, val: Val) {
        let scope = match self.locals.iter().rposition(|s| s.contains_key(name)) {
            Some(idx) => &mut self.locals[idx],
            None if self.global.contains_key(name) => &mut self.global,
            None => self.innermost_mut(),
        };
        scope.insert(name.to_string(), val);
    }

    /// Binds `name` in the innermost scope, shadowing outer bindings.
    pub fn define(&mut self, name: &str, val: Val) {
        self.innermost_mut().insert(name.to_string(), val);
    }

    fn innermost_mut(&mut self) -> &mut Scope {
        match self.locals.last_mut() {
            Some(scope) => scope,
            None => &mut self.global,
        }
    }
}
