//! Lexical environments
//!
//! A chain of scopes over an outer environment. Class scopes bind member
//! names to their owning class; method and block scopes bind locals; any scope
//! may bind local methods and class templates.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::MethodDef;

use super::value::{ClassId, Value};

/// What a name refers to
#[derive(Clone)]
pub enum Binding<'a> {
    /// Local value, parameter or catch binding
    Local { value: Value, mutable: bool },
    /// Member (own or inherited) reached through the `this` of the class
    Member(ClassId),
    /// Method defined in a block of `owner`'s code
    LocalMethod { def: &'a MethodDef, owner: ClassId },
    /// Class template; its declaring environment is kept by the checker
    Class(ClassId),
}

impl fmt::Debug for Binding<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Local { value, mutable } => f
                .debug_struct("Local")
                .field("value", value)
                .field("mutable", mutable)
                .finish(),
            Binding::Member(owner) => f.debug_tuple("Member").field(owner).finish(),
            Binding::LocalMethod { def, owner } => f
                .debug_struct("LocalMethod")
                .field("def", &def.name)
                .field("owner", owner)
                .finish(),
            Binding::Class(id) => f.debug_tuple("Class").field(id).finish(),
        }
    }
}

/// One scope of the chain
#[derive(Debug)]
pub struct Env<'a> {
    bindings: RefCell<FxHashMap<String, Binding<'a>>>,
    parent: Option<Rc<Env<'a>>>,
}

impl<'a> Env<'a> {
    /// Top-level scope
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(FxHashMap::default()),
            parent: None,
        })
    }

    /// New empty scope over `parent`
    pub fn child(parent: &Rc<Env<'a>>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(FxHashMap::default()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn define(&self, name: impl Into<String>, binding: Binding<'a>) {
        self.bindings.borrow_mut().insert(name.into(), binding);
    }

    pub fn define_local(&self, name: impl Into<String>, value: Value, mutable: bool) {
        self.define(name, Binding::Local { value, mutable });
    }

    /// Resolve `name`, returning the binding and the scope that holds it
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<(Binding<'a>, Rc<Env<'a>>)> {
        let mut scope = Rc::clone(self);
        loop {
            if let Some(binding) = scope.bindings.borrow().get(name) {
                return Some((binding.clone(), Rc::clone(&scope)));
            }
            let parent = scope.parent.clone()?;
            scope = parent;
        }
    }

    /// Join `value` into a local binding. `None` when no local named `name`
    /// is in scope, otherwise whether the binding changed.
    pub fn assign_local(&self, name: &str, value: &Value) -> Option<bool> {
        if let Some(Binding::Local { value: current, .. }) =
            self.bindings.borrow_mut().get_mut(name)
        {
            let joined = current.join(value);
            let changed = joined != *current;
            *current = joined;
            return Some(changed);
        }
        match &self.parent {
            Some(parent) => parent.assign_local(name, value),
            None => None,
        }
    }

    pub fn is_bound_here(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }
}
