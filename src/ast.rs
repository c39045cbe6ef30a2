//! This module defines the core expression/value type, [`Value`], shared by the
//! reader, the evaluator and the expander. Expressions and runtime values are the
//! same type: a `quote` simply hands its datum back, and the expander returns
//! rewritten expression trees built from the same cons cells.
//!
//! Lists are right-nested chains of [`Pair`]s terminated by [`Value::Nil`].
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] are provided for
//! building trees in code and tests, together with `From` conversions for Rust
//! literals, arrays and vectors.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::environment::Environment;
use crate::evaluator::arity::Arity;

/// Type alias for integer values in interpreter
pub(crate) type NumberType = i64;

/// Allowed non-alphanumeric characters in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:^~.";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit" or ".digit" prefix, not a
/// lone ".", alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() || name == "." {
                return false;
            }

            if (first_char == '-' || first_char == '+' || first_char == '.')
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// An interned-by-content identifier. Cloning is a reference count bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// An immutable cons cell
#[derive(Clone)]
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

// Unlink nested pairs through a worklist so dropping a long list, or a
// structure nested deeply through `car`, cannot exhaust the native stack.
impl Drop for Pair {
    fn drop(&mut self) {
        if !matches!(self.car, Value::Pair(_)) && !matches!(self.cdr, Value::Pair(_)) {
            return;
        }
        let mut pending = vec![
            std::mem::replace(&mut self.car, Value::Nil),
            std::mem::replace(&mut self.cdr, Value::Nil),
        ];
        while let Some(value) = pending.pop() {
            // Shared pairs only lose a reference here
            if let Value::Pair(rc) = value
                && let Ok(mut pair) = Rc::try_unwrap(rc)
            {
                pending.push(std::mem::replace(&mut pair.car, Value::Nil));
                pending.push(std::mem::replace(&mut pair.cdr, Value::Nil));
            }
        }
    }
}

/// Canonical erased signature of a primitive procedure.
///
/// Primitives receive ownership of their evaluated argument vector.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error>;

/// A procedure implemented in Rust
pub struct Primitive {
    pub name: String,
    pub arity: Arity,
    pub(crate) func: Box<OperationFn>,
}

impl Primitive {
    pub fn new(
        name: impl Into<String>,
        arity: Arity,
        func: impl Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    ) -> Self {
        Primitive {
            name: name.into(),
            arity,
            func: Box::new(func),
        }
    }

    /// Invoke the native callable. Arity is checked by the caller.
    pub(crate) fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        (self.func)(args)
    }
}

/// A procedure created by evaluating a `lambda` expression (a closure)
pub struct Compound {
    /// Set by the first `define` that binds this procedure
    name: OnceCell<Symbol>,
    params: Vec<Symbol>,
    /// The body as a list of expressions
    body: Value,
    /// `(begin . body)`, the expression the trampoline continues into
    sequence: Value,
    env: Environment,
    arity: Arity,
}

impl Compound {
    pub(crate) fn new(params: Vec<Symbol>, body: Value, env: Environment, arity: Arity) -> Self {
        let sequence = Value::cons(Value::sym("begin"), body.clone());
        Compound {
            name: OnceCell::new(),
            params,
            body,
            sequence,
            env,
            arity,
        }
    }

    pub fn name(&self) -> Option<&Symbol> {
        self.name.get()
    }

    /// Record the display name. Only the first assignment takes effect.
    pub(crate) fn assign_name(&self, name: &Symbol) {
        let _ = self.name.set(name.clone());
    }

    pub fn params(&self) -> &[Symbol] {
        &self.params
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub(crate) fn sequence(&self) -> &Value {
        &self.sequence
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub(crate) fn display_name(&self) -> String {
        self.name()
            .map_or_else(|| "#<procedure>".to_owned(), |name| name.to_string())
    }
}

/// Core expression and value type
///
/// To build a tree, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Integer(NumberType),
    Double(f64),
    Char(char),
    String(Rc<str>),
    Bool(bool),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    /// The empty list
    Nil,
    /// Result of forms evaluated for effect (`define`, `set!`, one-armed `if`)
    Void,
    Primitive(Rc<Primitive>),
    Compound(Rc<Compound>),
}

impl Value {
    pub fn sym(name: &str) -> Self {
        Value::Symbol(Symbol::new(name))
    }

    pub fn cons(car: Value, cdr: Value) -> Self {
        Value::Pair(Rc::new(Pair { car, cdr }))
    }

    /// Build a proper list
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list whose final cdr is `tail` (an improper list unless `tail` is a list)
    pub fn list_with_tail<I>(items: I, tail: Value) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `#f` counts as true
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::Primitive(_) | Value::Compound(_))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(p) => Some(p),
            _ => None,
        }
    }

    /// Iterate over the elements of a list. Iteration stops at the first
    /// non-pair cdr; use [`Value::to_vec`] to reject improper lists.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect the elements of a proper list, `None` for anything else
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Nil => return Some(items),
                Value::Pair(pair) => {
                    items.push(pair.car.clone());
                    current = &pair.cdr;
                }
                _ => return None,
            }
        }
    }

    /// Name used in error messages for procedures
    pub(crate) fn procedure_name(&self) -> String {
        match self {
            Value::Primitive(p) => p.name.clone(),
            Value::Compound(c) => c.display_name(),
            other => other.to_string(),
        }
    }

    /// Short description of the value's kind, for error messages
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Nil => "empty list",
            Value::Void => "void",
            Value::Primitive(_) | Value::Compound(_) => "procedure",
        }
    }
}

/// Iterator over list elements, see [`Value::iter`]
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.cdr;
                Some(&pair.car)
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Double(n) => write!(f, "Double({n:?})"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Pair(_) => write!(f, "Pair({self})"),
            Value::Nil => write!(f, "Nil"),
            Value::Void => write!(f, "Void"),
            Value::Primitive(p) => write!(f, "Primitive({})", p.name),
            Value::Compound(c) => write!(f, "Compound({}, params={:?})", c.display_name(), c.params),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Double(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Char(c) => match c {
                ' ' => write!(f, "#\\space"),
                '\n' => write!(f, "#\\newline"),
                '\t' => write!(f, "#\\tab"),
                c => write!(f, "#\\{c}"),
            },
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Pair(_) => write_list(self, f),
            Value::Nil => write!(f, "()"),
            Value::Void => write!(f, "#<void>"),
            Value::Primitive(p) => write!(f, "#<procedure:{}>", p.name),
            Value::Compound(c) => match c.name() {
                Some(name) => write!(f, "#<procedure:{name}>"),
                None => write!(f, "#<procedure>"),
            },
        }
    }
}

/// Pieces of list output still to be written
enum Pending<'a> {
    Datum(&'a Value),
    /// The cdr of a list whose earlier elements are already written
    Rest(&'a Value),
    Close,
}

/// Write a list with an explicit stack, so nesting depth is bounded by memory
/// rather than by the native stack
fn write_list(list: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut pending = vec![Pending::Datum(list)];
    while let Some(piece) = pending.pop() {
        match piece {
            Pending::Datum(Value::Pair(pair)) => {
                f.write_str("(")?;
                pending.push(Pending::Close);
                pending.push(Pending::Rest(&pair.cdr));
                pending.push(Pending::Datum(&pair.car));
            }
            Pending::Datum(atom) => write!(f, "{atom}")?,
            Pending::Rest(Value::Pair(next)) => {
                f.write_str(" ")?;
                pending.push(Pending::Rest(&next.cdr));
                pending.push(Pending::Datum(&next.car));
            }
            Pending::Rest(Value::Nil) => {}
            Pending::Rest(tail) => {
                f.write_str(" . ")?;
                pending.push(Pending::Datum(tail));
            }
            Pending::Close => f.write_str(")")?,
        }
    }
    Ok(())
}

impl PartialEq for Value {
    /// Structural equality. Pairs are compared with an explicit work stack,
    /// so long and deeply nested lists compare without recursion.
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            let same = match (a, b) {
                (Value::Integer(a), Value::Integer(b)) => a == b,
                (Value::Double(a), Value::Double(b)) => a == b,
                (Value::Char(a), Value::Char(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Symbol(a), Value::Symbol(b)) => a == b,
                (Value::Pair(a), Value::Pair(b)) => {
                    if !Rc::ptr_eq(a, b) {
                        pending.push((&a.cdr, &b.cdr));
                        pending.push((&a.car, &b.car));
                    }
                    true
                }
                (Value::Nil, Value::Nil) | (Value::Void, Value::Void) => true,
                // Procedures compare by identity
                (Value::Primitive(a), Value::Primitive(b)) => Rc::ptr_eq(a, b),
                (Value::Compound(a), Value::Compound(b)) => Rc::ptr_eq(a, b),
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(NumberType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::sym(name.as_ref())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating the empty list
pub fn nil() -> Value {
    Value::Nil
}
