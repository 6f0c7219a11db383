//! Environments: chained variable-binding scopes.
//!
//! The same structure serves lexical scopes (blocks, calls, the global scope)
//! and object instance state. Lookups always walk outward through parents,
//! never sideways. Parents never reference their children, so dropping the
//! last handle to a scope reclaims it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::lang::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    Scope,
    Object,
}

/// A shared handle to one environment.
#[derive(Clone)]
pub struct Env {
    inner: Rc<EnvInner>,
}

struct EnvInner {
    bindings: RefCell<FxHashMap<Rc<str>, Value>>,
    parent: Option<Env>,
    kind: EnvKind,
}

impl Env {
    fn with_parent(parent: Option<&Env>, kind: EnvKind) -> Env {
        Env {
            inner: Rc::new(EnvInner {
                bindings: RefCell::new(FxHashMap::default()),
                parent: parent.cloned(),
                kind,
            }),
        }
    }

    /// A root scope with no parent.
    pub fn global() -> Env {
        Env::with_parent(None, EnvKind::Scope)
    }

    /// A new lexical scope nested in this one.
    #[must_use]
    pub fn child(&self) -> Env {
        Env::with_parent(Some(self), EnvKind::Scope)
    }

    /// A new object environment chained to `parent`.
    pub fn object(parent: &Env) -> Env {
        Env::with_parent(Some(parent), EnvKind::Object)
    }

    pub fn parent(&self) -> Option<Env> {
        self.inner.parent.clone()
    }

    pub fn kind(&self) -> EnvKind {
        self.inner.kind
    }

    pub fn is_object(&self) -> bool {
        self.inner.kind == EnvKind::Object
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Introduces (or resets) a binding in this environment.
    pub fn define(&self, name: impl Into<Rc<str>>, value: Value) {
        self.inner.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Introduces a binding initialised to `undefined`.
    pub fn declare(&self, name: impl Into<Rc<str>>) {
        self.define(name, Value::Undefined);
    }

    /// Assigns to the nearest environment that already declares `name`.
    /// Returns `false` when no environment in the chain declares it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            {
                let mut bindings = env.inner.bindings.borrow_mut();
                if let Some(slot) = bindings.get_mut(name) {
                    *slot = value;
                    return true;
                }
            }
            current = env.parent();
        }
        false
    }

    /// Looks `name` up through the parent chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if let Some(value) = env.get_own(name) {
                return Some(value);
            }
            current = env.parent();
        }
        None
    }

    /// Looks `name` up in this environment only.
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.inner.bindings.borrow().get(name).cloned()
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.inner.bindings.borrow().contains_key(name)
    }

    /// The nearest object environment in the chain (what `this` refers to).
    pub fn this_object(&self) -> Option<Env> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if env.is_object() {
                return Some(env);
            }
            current = env.parent();
        }
        None
    }

    /// Snapshot of this environment's own bindings, sorted by name.
    pub fn own_bindings(&self) -> Vec<(Rc<str>, Value)> {
        let mut bindings: Vec<_> = self
            .inner
            .bindings
            .borrow()
            .iter()
            .map(|(k, v)| (Rc::clone(k), v.clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }

    /// Number of environments from this one up to the root, inclusive.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.parent();
        while let Some(env) = current {
            depth += 1;
            current = env.parent();
        }
        depth
    }
}

// Bindings may (indirectly) contain this environment, so Debug never recurses.
impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Env({:?}, {} bindings, depth {})",
            self.inner.kind,
            self.inner.bindings.borrow().len(),
            self.depth()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_parent() {
        let global = Env::global();
        global.define("x", Value::Number(1.0));
        let child = global.child();
        assert_eq!(child.lookup("x"), Some(Value::Number(1.0)));
        assert_eq!(child.get_own("x"), None);
    }

    #[test]
    fn test_shadowing_does_not_touch_outer() {
        let global = Env::global();
        global.define("x", Value::Number(1.0));
        let child = global.child();
        child.declare("x");
        assert!(child.assign("x", Value::Number(2.0)));
        assert_eq!(child.lookup("x"), Some(Value::Number(2.0)));
        assert_eq!(global.lookup("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_assign_targets_nearest_declaring_scope() {
        let global = Env::global();
        global.declare("y");
        let inner = global.child().child();
        assert!(inner.assign("y", Value::Bool(true)));
        assert_eq!(global.get_own("y"), Some(Value::Bool(true)));
        assert!(!inner.has_own("y"));
    }

    #[test]
    fn test_assign_undeclared_fails() {
        let global = Env::global();
        assert!(!global.child().assign("nope", Value::Null));
    }

    #[test]
    fn test_this_object_finds_nearest_object_env() {
        let global = Env::global();
        let object = Env::object(&global);
        let call = object.child();
        assert!(call.this_object().unwrap().ptr_eq(&object));
        assert!(global.this_object().is_none());
    }

    #[test]
    fn test_child_is_dropped_with_its_handle() {
        let global = Env::global();
        let child = global.child();
        let weak = Rc::downgrade(&child.inner);
        drop(child);
        assert!(weak.upgrade().is_none());
        assert_eq!(Rc::strong_count(&global.inner), 1);
    }

    #[test]
    fn test_own_bindings_sorted() {
        let env = Env::global();
        env.define("b", Value::Number(2.0));
        env.define("a", Value::Number(1.0));
        let names: Vec<_> = env.own_bindings().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec![Rc::from("a"), Rc::from("b")]);
    }
}
