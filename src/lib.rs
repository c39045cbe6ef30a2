//! sxeval - eval-apply core for a small Scheme
//!
//! This crate interprets already-parsed expression trees with a tree-walking
//! evaluator. It provides:
//!
//! - a single trampoline loop that keeps tail calls in constant native stack
//!   space, so `(define (loop n) (if (= n 0) 'done (loop (- n 1))))` can count
//!   down from a million without growing the stack
//! - closures over shared, mutable lexical frames (`set!` is visible to every
//!   closure that captured the frame)
//! - fixed, minimum-with-rest and pure-rest parameter lists
//! - desugaring of `let`, `cond`, `case`, `and`, `or`, `when`, `unless`, `do`,
//!   `while` and `for` into `lambda`, `if` and `begin`
//! - a normal-order *expander* that inlines compound procedures by textual
//!   substitution of unevaluated operands, without ever calling a primitive
//!
//! ```scheme
//! (define (sum-to n acc) (if (= n 0) acc (sum-to (- n 1) (+ acc n))))
//! (sum-to 100000 0)                ; => 5000050000
//! (expand '((lambda (x) (+ x x)) 5)) ; => (+ 5 5)
//! ```
//!
//! ## Modules
//!
//! - `ast`: expression and value representation
//! - `environment`: chained lexical frames
//! - `evaluator`: the eval-apply trampoline, `apply`, arity checks and frame building
//! - `syntax`: reserved syntax symbols and special-form shapes
//! - `rewrite`: pure desugaring transforms
//! - `expander`: normal-order inlining pass
//! - `builtinops`: the primitive procedure library
//! - `scheme`: S-expression reader (feature `scheme`)

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum nesting of non-tail evaluations.
///
/// Tail positions (the branches of `if`, the last expression of `begin`, the
/// body of a compound procedure call) are evaluated by the trampoline loop and
/// never count toward this limit.
pub const MAX_EVAL_DEPTH: usize = 512;

/// Step budget for a single `expand` call. Normal-order inlining of a
/// procedure that calls itself outside of `if` never terminates.
pub const MAX_EXPAND_STEPS: usize = 10_000;

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("Not applicable: {0}")]
    NotApplicable(String),
    #[error("ArityError: {name}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        /// Human-readable range, e.g. `2`, `1 to 3` or `at least 1`
        expected: String,
        got: usize,
    },
    #[error("Malformed {form}: {message}")]
    MalformedSpecialForm { form: &'static str, message: String },
    #[error("Unknown expression type: {0}")]
    UnknownExpressionType(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

impl Error {
    /// Create an ArityMismatch for a procedure called with `got` arguments
    pub fn arity_mismatch(name: impl Into<String>, expected: impl Into<String>, got: usize) -> Self {
        Error::ArityMismatch {
            name: name.into(),
            expected: expected.into(),
            got,
        }
    }

    /// Create a MalformedSpecialForm for the given form keyword
    pub fn malformed(form: &'static str, message: impl Into<String>) -> Self {
        Error::MalformedSpecialForm {
            form,
            message: message.into(),
        }
    }
}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod expander;
pub mod rewrite;
pub mod syntax;

#[cfg(feature = "scheme")]
pub mod scheme;
