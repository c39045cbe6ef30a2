//! Built-in procedure registry.
//!
//! Every primitive is declared once in [`BUILTIN_OPS`] with its Scheme
//! identifier and arity, and bound into a global environment by
//! [`register_builtins`]. The evaluator checks the declared arity before the
//! implementation runs, so implementations may destructure their argument
//! vector within that range.
//!
//! ```scheme
//! (+ 1 2.5)                      ; => 3.5
//! (map (lambda (x) (* x x)) '(1 2 3)) ; => (1 4 9)
//! (eqv? 'a 'a)                   ; => #t
//! ```
//!
//! ## Numbers
//!
//! Integers are `i64` and arithmetic on them is checked: overflow is an error
//! rather than a wrap. An operation with any double operand produces a double.
//! `/` on integers stays exact when the division is exact.
//!
//! ## Adding New Operations
//!
//! 1. Implement `fn(Vec<Value>) -> Result<Value, Error>`
//! 2. Add it to `BUILTIN_OPS` with its identifier and arity
//! 3. Add test cases to `test_builtin_function_implementations`
//!
//! `eval` and `expand` are the exception: they close over the environment
//! they are registered in and are bound by [`register_builtins`] directly.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::environment::Environment;
use crate::evaluator::{self, Arity};
use crate::expander;

/// Canonical signature of a builtin implementation
pub type BuiltinFn = fn(Vec<Value>) -> Result<Value, Error>;

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The Scheme identifier for this operation
    pub scheme_id: &'static str,
    pub func: BuiltinFn,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Compare operations by their scheme_id, which uniquely identifies them
        self.scheme_id == other.scheme_id
    }
}

//
// Numbers
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(NumberType),
    Real(f64),
}

impl Number {
    fn from_value(op: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Integer(n) => Ok(Number::Int(*n)),
            Value::Double(n) => Ok(Number::Real(*n)),
            other => Err(Error::TypeError(format!(
                "{op}: expected number, got {} {other}",
                other.type_name()
            ))),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Real(n) => n,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Integer(n),
            Number::Real(n) => Value::Double(n),
        }
    }
}

fn numbers(op: &str, args: &[Value]) -> Result<Vec<Number>, Error> {
    args.iter().map(|arg| Number::from_value(op, arg)).collect()
}

// Combine two numbers, exactly when both are integers
macro_rules! arithmetic {
    ($name:ident, $checked:ident, $op:tt, $what:expr) => {
        fn $name(a: Number, b: Number) -> Result<Number, Error> {
            match (a, b) {
                (Number::Int(x), Number::Int(y)) => x
                    .$checked(y)
                    .map(Number::Int)
                    .ok_or_else(|| Error::EvalError(format!("Integer overflow in {}", $what))),
                _ => Ok(Number::Real(a.as_f64() $op b.as_f64())),
            }
        }
    };
}

arithmetic!(add, checked_add, +, "addition");
arithmetic!(sub, checked_sub, -, "subtraction");
arithmetic!(mul, checked_mul, *, "multiplication");

fn div(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (_, Number::Int(0)) => Err(Error::EvalError("Division by zero".into())),
        (Number::Int(x), Number::Int(y)) => match (x.checked_rem(y), x.checked_div(y)) {
            (Some(0), Some(quotient)) => Ok(Number::Int(quotient)),
            (Some(_), _) => Ok(Number::Real(a.as_f64() / b.as_f64())),
            _ => Err(Error::EvalError("Integer overflow in division".into())),
        },
        _ => Ok(Number::Real(a.as_f64() / b.as_f64())),
    }
}

fn builtin_add(args: Vec<Value>) -> Result<Value, Error> {
    numbers("+", &args)?
        .into_iter()
        .try_fold(Number::Int(0), add)
        .map(Value::from)
}

fn builtin_mul(args: Vec<Value>) -> Result<Value, Error> {
    numbers("*", &args)?
        .into_iter()
        .try_fold(Number::Int(1), mul)
        .map(Value::from)
}

fn builtin_sub(args: Vec<Value>) -> Result<Value, Error> {
    let nums = numbers("-", &args)?;
    match nums.as_slice() {
        [only] => sub(Number::Int(0), *only).map(Value::from),
        [first, rest @ ..] => rest.iter().copied().try_fold(*first, sub).map(Value::from),
        [] => Err(Error::arity_mismatch("-", "at least 1", 0)),
    }
}

fn builtin_div(args: Vec<Value>) -> Result<Value, Error> {
    let nums = numbers("/", &args)?;
    match nums.as_slice() {
        [only] => div(Number::Int(1), *only).map(Value::from),
        [first, rest @ ..] => rest.iter().copied().try_fold(*first, div).map(Value::from),
        [] => Err(Error::arity_mismatch("/", "at least 1", 0)),
    }
}

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: Vec<Value>) -> Result<Value, Error> {
            let nums = numbers($op_str, &args)?;
            // All adjacent pairs must satisfy the comparison
            let holds = nums.windows(2).all(|pair| match (pair[0], pair[1]) {
                (Number::Int(a), Number::Int(b)) => a $op b,
                (a, b) => a.as_f64() $op b.as_f64(),
            });
            Ok(Value::Bool(holds))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

//
// Equivalence
//

/// Same atom, or the same allocated object
pub(crate) fn is_eqv(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Pair(x), Value::Pair(y)) => Rc::ptr_eq(x, y),
        (Value::String(x), Value::String(y)) => Rc::ptr_eq(x, y),
        _ => a == b,
    }
}

fn builtin_eqv(args: Vec<Value>) -> Result<Value, Error> {
    match args.as_slice() {
        [a, b] => Ok(Value::Bool(is_eqv(a, b))),
        _ => Err(Error::arity_mismatch("eqv?", "2", args.len())),
    }
}

fn builtin_equal(args: Vec<Value>) -> Result<Value, Error> {
    match args.as_slice() {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(Error::arity_mismatch("equal?", "2", args.len())),
    }
}

fn builtin_not(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(args.first().is_some_and(|v| !v.is_true())))
}

//
// Pairs and lists
//

fn single(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Void)
}

fn builtin_cons(args: Vec<Value>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(car), Some(cdr)) => Ok(Value::cons(car, cdr)),
        _ => Err(Error::arity_mismatch("cons", "2", 0)),
    }
}

fn builtin_car(args: Vec<Value>) -> Result<Value, Error> {
    match single(args) {
        Value::Pair(pair) => Ok(pair.car.clone()),
        other => Err(Error::TypeError(format!("car: expected pair, got {other}"))),
    }
}

fn builtin_cdr(args: Vec<Value>) -> Result<Value, Error> {
    match single(args) {
        Value::Pair(pair) => Ok(pair.cdr.clone()),
        other => Err(Error::TypeError(format!("cdr: expected pair, got {other}"))),
    }
}

fn builtin_list(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::list(args))
}

fn builtin_null(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(single(args).is_nil()))
}

fn builtin_pair(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(single(args), Value::Pair(_))))
}

fn proper_list(op: &str, value: &Value) -> Result<Vec<Value>, Error> {
    value
        .to_vec()
        .ok_or_else(|| Error::TypeError(format!("{op}: expected list, got {value}")))
}

fn builtin_length(args: Vec<Value>) -> Result<Value, Error> {
    let items = proper_list("length", &single(args))?;
    NumberType::try_from(items.len())
        .map(Value::Integer)
        .map_err(|_| Error::EvalError("length: list too long".into()))
}

//
// Procedures
//

fn builtin_procedure(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(single(args).is_procedure()))
}

/// `(apply f a b '(c d))` calls `(f a b c d)`
fn builtin_apply(mut args: Vec<Value>) -> Result<Value, Error> {
    let (Some(spread), false) = (args.pop(), args.is_empty()) else {
        return Err(Error::arity_mismatch("apply", "at least 2", args.len()));
    };
    let procedure = args.remove(0);
    args.extend(proper_list("apply", &spread)?);
    evaluator::apply(&procedure, args)
}

/// The procedure applied to successive elements of the lists, stopping at the
/// end of the shortest one
fn map_lists(op: &str, args: Vec<Value>, mut each: impl FnMut(Value)) -> Result<(), Error> {
    let mut args = args.into_iter();
    let procedure = args.next().unwrap_or(Value::Void);
    let lists = args
        .map(|list| proper_list(op, &list))
        .collect::<Result<Vec<_>, _>>()?;
    let len = lists.iter().map(Vec::len).min().unwrap_or(0);

    for index in 0..len {
        let row: Vec<Value> = lists.iter().map(|list| list[index].clone()).collect();
        each(evaluator::apply(&procedure, row)?);
    }
    Ok(())
}

fn builtin_map(args: Vec<Value>) -> Result<Value, Error> {
    let mut results = Vec::new();
    map_lists("map", args, |value| results.push(value))?;
    Ok(Value::list(results))
}

fn builtin_for_each(args: Vec<Value>) -> Result<Value, Error> {
    map_lists("for-each", args, |_| {})?;
    Ok(Value::Void)
}

//
// Output and errors
//

/// Display form: strings and characters are written raw
fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Char(c) => c.to_string(),
        other => other.to_string(),
    }
}

fn write_stdout(text: &str) -> Result<Value, Error> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|err| Error::EvalError(format!("display: {err}")))?;
    Ok(Value::Void)
}

fn builtin_display(args: Vec<Value>) -> Result<Value, Error> {
    write_stdout(&display_string(&single(args)))
}

fn builtin_newline(_args: Vec<Value>) -> Result<Value, Error> {
    write_stdout("\n")
}

fn builtin_error(args: Vec<Value>) -> Result<Value, Error> {
    let parts: Vec<String> = args.iter().map(display_string).collect();

    let message = if parts.is_empty() {
        "Error".to_string()
    } else {
        parts.join(" ")
    };

    Err(Error::EvalError(message))
}

/// Global registry of all built-in operations
static BUILTIN_OPS: &[BuiltinOp] = &[
    BuiltinOp { scheme_id: "+", func: builtin_add, arity: Arity::ANY },
    BuiltinOp { scheme_id: "-", func: builtin_sub, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: "*", func: builtin_mul, arity: Arity::ANY },
    BuiltinOp { scheme_id: "/", func: builtin_div, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: "=", func: builtin_num_eq, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: "<", func: builtin_lt, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: ">", func: builtin_gt, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: "<=", func: builtin_le, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: ">=", func: builtin_ge, arity: Arity::AtLeast(1) },
    BuiltinOp { scheme_id: "not", func: builtin_not, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "eq?", func: builtin_eqv, arity: Arity::Exact(2) },
    BuiltinOp { scheme_id: "eqv?", func: builtin_eqv, arity: Arity::Exact(2) },
    BuiltinOp { scheme_id: "equal?", func: builtin_equal, arity: Arity::Exact(2) },
    BuiltinOp { scheme_id: "cons", func: builtin_cons, arity: Arity::Exact(2) },
    BuiltinOp { scheme_id: "car", func: builtin_car, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "cdr", func: builtin_cdr, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "list", func: builtin_list, arity: Arity::ANY },
    BuiltinOp { scheme_id: "null?", func: builtin_null, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "pair?", func: builtin_pair, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "length", func: builtin_length, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "procedure?", func: builtin_procedure, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "apply", func: builtin_apply, arity: Arity::AtLeast(2) },
    BuiltinOp { scheme_id: "map", func: builtin_map, arity: Arity::AtLeast(2) },
    BuiltinOp { scheme_id: "for-each", func: builtin_for_each, arity: Arity::AtLeast(2) },
    BuiltinOp { scheme_id: "display", func: builtin_display, arity: Arity::Exact(1) },
    BuiltinOp { scheme_id: "newline", func: builtin_newline, arity: Arity::Exact(0) },
    BuiltinOp { scheme_id: "error", func: builtin_error, arity: Arity::ANY },
];

/// Lazy static map from scheme_id to BuiltinOp (private - use find_scheme_op)
static BUILTIN_SCHEME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.scheme_id, op)).collect());

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin operation by its Scheme identifier
pub fn find_scheme_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_SCHEME.get(id).copied()
}

/// Bind every builtin in `env`, plus `eval` and `expand` working in `env`.
///
/// The reflective pair holds a handle to `env`, which owns them in turn; the
/// global frame therefore lives as long as the process.
pub fn register_builtins(env: &Environment) {
    for op in get_builtin_ops() {
        env.register_builtin_function(op.scheme_id, op.arity, op.func);
    }

    let global = env.clone();
    env.register_builtin_function("eval", Arity::Exact(1), move |args| {
        evaluator::eval(&single(args), &global)
    });
    let global = env.clone();
    env.register_builtin_function("expand", Arity::Exact(1), move |args| {
        expander::expand(&single(args), &global)
    });
}
