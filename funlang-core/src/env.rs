//! Lexical environments.
//!
//! An environment is a shared handle to a scope chained to its parent.
//! Shared ownership is required: a closure's captured environment must
//! outlive the call frame that created it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug)]
struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

/// A shared handle to one scope in the chain.
#[derive(Debug, Clone)]
pub struct Env(Rc<RefCell<Scope>>);

impl Env {
    /// The root scope with no parent.
    pub fn global() -> Env {
        Env(Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: None,
        })))
    }

    /// A fresh scope whose lookups fall through to `self`.
    pub fn child(&self) -> Env {
        Env(Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// Look `name` up through the chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(value) = scope.vars.get(name) {
            return Some(value.clone());
        }
        scope.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Bind `name` in this scope, overwriting any existing binding
    /// here. Declaration never touches outer scopes.
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    /// Assign to an existing binding. The name must resolve somewhere
    /// in the chain; the write lands in this scope. Returns false when
    /// the name is unbound.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if self.get(name).is_none() {
            return false;
        }
        self.declare(name, value);
        true
    }
}
