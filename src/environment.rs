//! Lexical environments.
//!
//! An [`Environment`] is a handle to one frame of bindings plus a link to its
//! parent. Handles are cheap to clone and frames are shared: every closure that
//! captured a frame sees mutations made through any other handle to it, which
//! is how `set!` on a captured variable is observed by sibling closures.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Primitive, Symbol, Value};
use crate::evaluator::arity::Arity;

/// Environment for variable bindings
#[derive(Clone)]
pub struct Environment {
    frame: Rc<Frame>,
}

struct Frame {
    bindings: RefCell<HashMap<Symbol, Value>>,
    /// Fixed at creation
    parent: Option<Environment>,
}

impl Environment {
    /// Create a new top-level environment with no parent
    pub fn new() -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// Create a child frame of `self` holding `bindings`. Later entries
    /// overwrite earlier ones with the same name.
    pub fn extend<I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (Symbol, Value)>,
    {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(bindings.into_iter().collect()),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.frame.parent.as_ref()
    }

    /// Bind `name` in this frame, replacing any existing binding here
    pub fn define(&self, name: Symbol, value: Value) {
        self.frame.bindings.borrow_mut().insert(name, value);
    }

    /// Look `name` up along the parent chain
    pub fn lookup(&self, name: &Symbol) -> Result<Value, Error> {
        let mut env = self;
        loop {
            if let Some(value) = env.frame.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match env.parent() {
                Some(parent) => env = parent,
                None => return Err(Error::UnboundVariable(name.to_string())),
            }
        }
    }

    /// Convenience lookup by name
    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(&Symbol::new(name)).ok()
    }

    /// Mutate the binding of `name` in the nearest frame that has one
    pub fn set(&self, name: &Symbol, value: Value) -> Result<(), Error> {
        let mut env = self;
        loop {
            if let Some(slot) = env.frame.bindings.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            match env.parent() {
                Some(parent) => env = parent,
                None => return Err(Error::UnboundVariable(name.to_string())),
            }
        }
    }

    /// Whether two handles refer to the same frame
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.frame, &other.frame)
    }

    /// Register a primitive procedure in this frame.
    ///
    /// The arity is checked by the evaluator before `func` runs, so the
    /// function may index into its argument vector within the declared range.
    ///
    /// # Example
    /// ```
    /// use sxeval::Error;
    /// use sxeval::ast::Value;
    /// use sxeval::evaluator::{Arity, create_global_env};
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("answer", Arity::Exact(0), |_args| Ok(Value::Integer(42)));
    /// assert!(env.get("answer").is_some());
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    {
        self.define(
            Symbol::new(name),
            Value::Primitive(Rc::new(Primitive::new(name, arity, func))),
        );
    }

    /// Get all bindings visible from this environment.
    /// Returns (name, value) pairs sorted by name; inner bindings shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();
        let mut env = Some(self);
        while let Some(current) = env {
            for (name, value) in current.frame.bindings.borrow().iter() {
                bindings
                    .entry(name.to_string())
                    .or_insert_with(|| value.clone());
            }
            env = current.parent();
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    fn depth(&self) -> usize {
        std::iter::successors(self.parent(), |env| env.parent()).count()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

// Bindings may contain closures over this very frame, so only names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .frame
            .bindings
            .borrow()
            .keys()
            .map(ToString::to_string)
            .collect();
        names.sort();
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .field("names", &names)
            .finish()
    }
}
