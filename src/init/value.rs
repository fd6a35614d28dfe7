//! Abstract values and their join
//!
//! The lattice is ordered by risk: `Hot` is the bottom (join identity) and
//! `Cold` is the top (absorbing). Objects under construction and closures sit
//! in between; joining distinct ones keeps every possibility in a `Choice`.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::common::NodeId;

/// Index of a class in the [`ClassTable`](super::index::ClassTable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Abstract value of an expression
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Value {
    /// Fully, transitively initialized
    Hot,
    /// Unknown initialization status
    Cold,
    /// Object under (or having completed) construction
    Addr(Address),
    /// Closure value
    Fun(Closure),
    /// Several objects/closures reachable through different branches.
    /// Never empty, never contains `Hot`, `Cold` or a nested `Choice`.
    Choice(BTreeSet<Value>),
}

/// Abstract object identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Address {
    pub class: ClassId,
    /// Constructor arguments, each `Hot` or `Cold`
    pub args: Vec<Value>,
    /// `this` of the lexically enclosing class at instantiation
    pub outer: Box<Value>,
}

impl Address {
    /// Build an address, widening arguments so the address space stays finite.
    /// An outer chain that already passes through an object of `class` is
    /// widened to `Cold`, so each chain names every class at most once.
    pub fn new(class: ClassId, args: &[Value], outer: Value) -> Self {
        let outer = if outer.reaches_class(class) {
            Value::Cold
        } else {
            outer
        };
        Self {
            class,
            args: args.iter().map(Value::widen).collect(),
            outer: Box::new(outer),
        }
    }
}

/// Closure: body syntax, captured receiver and the class owning the body.
/// The captured lexical environment is recorded by the evaluator under
/// `(this, expr)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Closure {
    pub expr: NodeId,
    pub this: Box<Value>,
    pub class: ClassId,
}

impl Value {
    pub fn is_hot(&self) -> bool {
        matches!(self, Value::Hot)
    }

    pub fn is_cold(&self) -> bool {
        matches!(self, Value::Cold)
    }

    /// Least upper bound
    pub fn join(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Hot, v) | (v, Value::Hot) => v.clone(),
            (Value::Cold, _) | (_, Value::Cold) => Value::Cold,
            (a, b) if a == b => a.clone(),
            (a, b) => {
                let mut set = BTreeSet::new();
                a.collect_into(&mut set);
                b.collect_into(&mut set);
                Value::from_set(set)
            }
        }
    }

    /// Join of all `values`; `Hot` when empty
    pub fn join_all<'v>(values: impl IntoIterator<Item = &'v Value>) -> Value {
        values
            .into_iter()
            .fold(Value::Hot, |acc, v| acc.join(v))
    }

    /// Coerce to `Hot`/`Cold`
    pub fn widen(&self) -> Value {
        match self {
            Value::Hot => Value::Hot,
            _ => Value::Cold,
        }
    }

    /// Members of a choice, or the value itself
    pub fn alternatives(&self) -> Vec<&Value> {
        match self {
            Value::Choice(set) => set.iter().collect(),
            v => vec![v],
        }
    }

    /// Whether an object of `class` appears on this value's outer chain
    fn reaches_class(&self, class: ClassId) -> bool {
        match self {
            Value::Hot | Value::Cold | Value::Fun(_) => false,
            Value::Addr(addr) => addr.class == class || addr.outer.reaches_class(class),
            Value::Choice(set) => set.iter().any(|v| v.reaches_class(class)),
        }
    }

    fn collect_into(&self, set: &mut BTreeSet<Value>) {
        match self {
            Value::Choice(members) => set.extend(members.iter().cloned()),
            v => {
                set.insert(v.clone());
            }
        }
    }

    fn from_set(mut set: BTreeSet<Value>) -> Value {
        if set.len() == 1 {
            set.pop_first().unwrap_or(Value::Hot)
        } else {
            Value::Choice(set)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Hot => write!(f, "hot"),
            Value::Cold => write!(f, "cold"),
            Value::Addr(addr) => write!(f, "obj#{}", addr.class.0),
            Value::Fun(closure) => write!(f, "fun#{}", closure.expr.0),
            Value::Choice(set) => {
                write!(f, "{{")?;
                for (i, v) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(class: u32) -> Value {
        Value::Addr(Address::new(ClassId(class), &[], Value::Hot))
    }

    #[test]
    fn test_hot_is_identity() {
        assert_eq!(Value::Hot.join(&addr(1)), addr(1));
        assert_eq!(addr(1).join(&Value::Hot), addr(1));
    }

    #[test]
    fn test_cold_absorbs() {
        assert_eq!(Value::Cold.join(&addr(1)), Value::Cold);
        assert_eq!(addr(2).join(&Value::Cold), Value::Cold);
    }

    #[test]
    fn test_distinct_objects_form_choice() {
        let joined = addr(1).join(&addr(2));
        assert_eq!(joined.alternatives().len(), 2);
        // Joining again with a member is a no-op
        assert_eq!(joined.join(&addr(1)), joined);
    }

    #[test]
    fn test_outer_chain_names_each_class_once() {
        let a = addr(1);
        let b = Address::new(ClassId(2), &[], a.clone());
        assert_eq!(*b.outer, a);

        // A second `ClassId(2)` inside the chain cuts it
        let again = Address::new(ClassId(2), &[], Value::Addr(b.clone()));
        assert_eq!(*again.outer, Value::Cold);
        let deeper = Address::new(ClassId(1), &[], Value::Addr(b));
        assert_eq!(*deeper.outer, Value::Cold);
    }

    #[test]
    fn test_address_widens_arguments() {
        let inner = addr(3);
        let a = Address::new(ClassId(1), &[Value::Hot, inner], Value::Hot);
        assert_eq!(a.args, vec![Value::Hot, Value::Cold]);
    }
}
