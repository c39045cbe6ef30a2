use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::ast::{Compound, Primitive, Symbol, Value};
use crate::builtinops::register_builtins;
use crate::environment::Environment;
use crate::rewrite::rewrite;
use crate::syntax::{SpecialForm, form_operands};
use crate::{Error, MAX_EVAL_DEPTH};

pub mod arity;
pub mod frame;

pub use arity::{Arity, check_arity};
pub use frame::make_procedure_env;

thread_local! {
    /// Evaluation depth at which the running primitive was invoked. Procedures
    /// the primitive applies (through `apply`, `map`, `eval`, ...) continue
    /// counting from here instead of from zero.
    static PRIMITIVE_CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr.clone(), env.clone(), PRIMITIVE_CALL_DEPTH.get())
}

/// Evaluate each expression in order and return the last value.
///
/// Stops at the first failure; effects of the expressions before it stand.
/// An empty batch evaluates to void.
pub fn eval_all(exprs: &[Value], env: &Environment) -> Result<Value, Error> {
    let mut result = Value::Void;
    for (index, expr) in exprs.iter().enumerate() {
        result = eval(expr, env).inspect_err(|err| {
            debug!(index, error = %err, "batch evaluation aborted");
        })?;
    }
    Ok(result)
}

/// Read a whole program and evaluate it with [`eval_all`]
#[cfg(feature = "scheme")]
pub fn eval_str(source: &str, env: &Environment) -> Result<Value, Error> {
    let exprs = crate::scheme::parse_program(source)?;
    eval_all(&exprs, env)
}

/// Apply a procedure to already evaluated arguments
pub fn apply(procedure: &Value, args: Vec<Value>) -> Result<Value, Error> {
    let depth = PRIMITIVE_CALL_DEPTH.get();
    match procedure {
        Value::Primitive(primitive) => apply_primitive(primitive, args, depth),
        Value::Compound(compound) => {
            compound
                .arity()
                .validate(&compound.display_name(), args.len())?;
            let env = make_procedure_env(compound, args);
            eval_with_depth_tracking(compound.sequence().clone(), env, depth + 1)
        }
        other => Err(Error::NotApplicable(other.to_string())),
    }
}

fn apply_primitive(primitive: &Primitive, args: Vec<Value>, depth: usize) -> Result<Value, Error> {
    primitive.arity.validate(&primitive.name, args.len())?;
    let outer = PRIMITIVE_CALL_DEPTH.replace(depth);
    let result = primitive.call(args);
    PRIMITIVE_CALL_DEPTH.set(outer);
    result
}

/// The eval-apply loop.
///
/// Tail positions (if branches, the last expression of `begin`, rewritten
/// derived forms, compound procedure bodies) replace `expr` and `env` and go
/// around the loop again. Everything else is a nested call one level deeper.
fn eval_with_depth_tracking(
    mut expr: Value,
    mut env: Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        debug!(depth, "evaluation depth limit exceeded");
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }

    loop {
        let pair = match expr {
            Value::Pair(ref pair) => Rc::clone(pair),
            ref atom => return eval_atom(atom, &env),
        };

        if let Some(form) = SpecialForm::of(&expr) {
            match form {
                SpecialForm::Quote => return eval_quote(&expr),
                SpecialForm::Set => return eval_assignment(&expr, &env, depth),
                SpecialForm::Define => return eval_definition(&expr, &env, depth),
                SpecialForm::Lambda => return eval_lambda(&expr, &env),
                SpecialForm::If => expr = eval_if(&expr, &env, depth)?,
                SpecialForm::Begin => expr = eval_sequence(&expr, &env, depth)?,
                derived => expr = rewrite(derived, &expr)?,
            }
            continue;
        }

        // Procedure call
        let procedure = eval_with_depth_tracking(pair.car.clone(), env.clone(), depth + 1)?;
        let args = eval_operands(&pair.cdr, &env, depth)?;
        match procedure {
            Value::Primitive(primitive) => return apply_primitive(&primitive, args, depth),
            Value::Compound(compound) => {
                compound
                    .arity()
                    .validate(&compound.display_name(), args.len())?;
                env = make_procedure_env(&compound, args);
                expr = compound.sequence().clone();
            }
            other => return Err(Error::NotApplicable(other.to_string())),
        }
    }
}

fn eval_atom(expr: &Value, env: &Environment) -> Result<Value, Error> {
    match expr {
        // Self-evaluating forms (the empty list is NOT self-evaluating)
        Value::Integer(_)
        | Value::Double(_)
        | Value::Char(_)
        | Value::String(_)
        | Value::Bool(_)
        | Value::Void => Ok(expr.clone()),

        Value::Symbol(name) => env.lookup(name),

        Value::Nil | Value::Pair(_) | Value::Primitive(_) | Value::Compound(_) => {
            Err(Error::UnknownExpressionType(expr.to_string()))
        }
    }
}

/// Evaluate the operands of a call left to right
fn eval_operands(operands: &Value, env: &Environment, depth: usize) -> Result<Vec<Value>, Error> {
    let mut args = Vec::new();
    let mut current = operands;
    loop {
        match current {
            Value::Nil => return Ok(args),
            Value::Pair(pair) => {
                args.push(eval_with_depth_tracking(pair.car.clone(), env.clone(), depth + 1)?);
                current = &pair.cdr;
            }
            tail => {
                return Err(Error::EvalError(format!(
                    "improper argument list ending in {tail}"
                )));
            }
        }
    }
}

fn eval_quote(expr: &Value) -> Result<Value, Error> {
    match form_operands(expr, SpecialForm::Quote)?.as_slice() {
        [datum] => Ok(datum.clone()),
        _ => Err(Error::malformed("quote", format!("expected (quote datum), got {expr}"))),
    }
}

fn eval_assignment(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    match form_operands(expr, SpecialForm::Set)?.as_slice() {
        [Value::Symbol(name), value_expr] => {
            let value = eval_with_depth_tracking(value_expr.clone(), env.clone(), depth + 1)?;
            env.set(name, value)?;
            Ok(Value::Void)
        }
        [target, _] => Err(Error::malformed(
            "set!",
            format!("target must be a symbol, got {target}"),
        )),
        _ => Err(Error::malformed("set!", format!("expected (set! name expr), got {expr}"))),
    }
}

/// `(define name expr)` or `(define (name . formals) body...)`
fn eval_definition(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    match form_operands(expr, SpecialForm::Define)?.as_slice() {
        [Value::Symbol(name), value_expr] => {
            let value = eval_with_depth_tracking(value_expr.clone(), env.clone(), depth + 1)?;
            bind_definition(env, name, value);
            Ok(Value::Void)
        }
        [Value::Pair(signature), body @ ..] => {
            let Value::Symbol(name) = &signature.car else {
                return Err(Error::malformed(
                    "define",
                    format!("procedure name must be a symbol, got {}", signature.car),
                ));
            };
            let procedure = make_compound("define", &signature.cdr, body, env)?;
            bind_definition(env, name, procedure);
            Ok(Value::Void)
        }
        [target, _] => Err(Error::malformed(
            "define",
            format!("target must be a symbol, got {target}"),
        )),
        _ => Err(Error::malformed(
            "define",
            format!("expected (define name expr), got {expr}"),
        )),
    }
}

fn bind_definition(env: &Environment, name: &Symbol, value: Value) {
    if let Value::Compound(compound) = &value {
        compound.assign_name(name);
    }
    debug!(name = %name, value = %value, "define");
    env.define(name.clone(), value);
}

/// Returns the branch to continue with, or void for a missing alternative
fn eval_if(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    match form_operands(expr, SpecialForm::If)?.as_slice() {
        [test, consequent, rest @ ..] if rest.len() <= 1 => {
            let condition = eval_with_depth_tracking(test.clone(), env.clone(), depth + 1)?;
            if condition.is_true() {
                Ok(consequent.clone())
            } else {
                Ok(rest.first().cloned().unwrap_or(Value::Void))
            }
        }
        _ => Err(Error::malformed(
            "if",
            format!("expected (if test consequent [alternative]), got {expr}"),
        )),
    }
}

/// Evaluates all but the last expression and returns the last one
fn eval_sequence(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    let mut exprs = form_operands(expr, SpecialForm::Begin)?;
    let Some(last) = exprs.pop() else {
        return Ok(Value::Void);
    };
    for expr in exprs {
        eval_with_depth_tracking(expr, env.clone(), depth + 1)?;
    }
    Ok(last)
}

/// Build a compound procedure closing over `env`
pub(crate) fn eval_lambda(expr: &Value, env: &Environment) -> Result<Value, Error> {
    match form_operands(expr, SpecialForm::Lambda)?.as_slice() {
        [formals, body @ ..] => make_compound("lambda", formals, body, env),
        [] => Err(Error::malformed("lambda", "missing parameter list")),
    }
}

fn make_compound(
    form: &'static str,
    formals: &Value,
    body: &[Value],
    env: &Environment,
) -> Result<Value, Error> {
    if body.is_empty() {
        return Err(Error::malformed(form, "empty body"));
    }
    let (params, arity) = parse_formals(form, formals)?;
    Ok(Value::Compound(Rc::new(Compound::new(
        params,
        Value::list(body.iter().cloned()),
        env.clone(),
        arity,
    ))))
}

/// Parameter symbols and arity of a formals list.
///
/// `(a b)` takes exactly two arguments, `(a . rest)` at least one, and a bare
/// symbol any number.
fn parse_formals(form: &'static str, formals: &Value) -> Result<(Vec<Symbol>, Arity), Error> {
    let mut params: Vec<Symbol> = Vec::new();
    let mut push_param = |params: &mut Vec<Symbol>, name: &Symbol| {
        if params.contains(name) {
            Err(Error::malformed(form, format!("duplicate parameter {name}")))
        } else {
            params.push(name.clone());
            Ok(())
        }
    };

    let mut current = formals;
    loop {
        match current {
            Value::Nil => {
                let arity = Arity::Exact(params.len());
                return Ok((params, arity));
            }
            Value::Symbol(rest) => {
                let arity = Arity::AtLeast(params.len());
                push_param(&mut params, rest)?;
                return Ok((params, arity));
            }
            Value::Pair(pair) => {
                match &pair.car {
                    Value::Symbol(name) => push_param(&mut params, name)?,
                    other => {
                        return Err(Error::malformed(
                            form,
                            format!("parameter must be a symbol, got {other}"),
                        ));
                    }
                }
                current = &pair.cdr;
            }
            other => {
                return Err(Error::malformed(
                    form,
                    format!("bad parameter list, got {other}"),
                ));
            }
        }
    }
}

/// Create a global environment with the builtin procedures
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    register_builtins(&env);
    env
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::scheme::{parse_program, parse_scheme};
    use pretty_assertions::assert_eq;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        AnyError,                    // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return void (like define)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Void))
        };
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        crate::test_utils::init_test_logging();
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match parse_scheme(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(&actual, expected_val, "{test_id}: '{input}'");
            }
            (Err(_), AnyError) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), AnyError) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Each case runs in a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&'static str, TestResult)>) {
        crate::test_utils::init_test_logging();
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("2.5", success(2.5)),
            ("#\\a", success('a')),
            ("\"hello\"", success("hello")),
            ("#t", success(true)),
            ("#f", success(false)),
            // === VARIABLES ===
            ("undefined-var", SpecificError("Unbound variable: undefined-var")),
            // === NON-EXPRESSIONS ===
            ("()", SpecificError("Unknown expression type")),
            // === QUOTE ===
            ("'a", EvalResult(sym("a"))),
            ("'(1 2)", success([1, 2])),
            ("'()", EvalResult(nil())),
            ("'(if 1 2)", EvalResult(val(vec![sym("if"), val(1), val(2)]))),
            ("(quote)", SpecificError("Malformed quote")),
            ("(quote 1 2)", SpecificError("Malformed quote")),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if 0 'yes 'no)", EvalResult(sym("yes"))),
            ("(if '() 'yes 'no)", EvalResult(sym("yes"))),
            ("(if #f 1)", EvalResult(Value::Void)),
            ("(if)", SpecificError("Malformed if")),
            ("(if #t)", SpecificError("Malformed if")),
            ("(if 1 2 3 4)", SpecificError("Malformed if")),
            // === BEGIN ===
            ("(begin 1 2 3)", success(3)),
            ("(begin)", EvalResult(Value::Void)),
            ("(begin (car '()) 2)", AnyError),
            // === LAMBDA ===
            ("((lambda (x) (* x x)) 7)", success(49)),
            ("((lambda () 5))", success(5)),
            ("((lambda (x) 1 2 x) 3)", success(3)),
            ("((lambda args args) 1 2 3)", success([1, 2, 3])),
            ("((lambda args args))", EvalResult(nil())),
            ("((lambda (a . rest) rest) 1 2 3)", success([2, 3])),
            ("((lambda (a . rest) rest) 1)", EvalResult(nil())),
            (
                "((lambda (a . rest) a))",
                SpecificError("ArityError: #<procedure>: expected at least 1 arguments, got 0"),
            ),
            (
                "((lambda (a b) a) 1)",
                SpecificError("ArityError: #<procedure>: expected 2 arguments, got 1"),
            ),
            ("((lambda (a b) a) 1 2 3)", SpecificError("expected 2 arguments, got 3")),
            ("(lambda (x x) x)", SpecificError("duplicate parameter x")),
            ("(lambda (x . x) x)", SpecificError("duplicate parameter x")),
            ("(lambda (1) 1)", SpecificError("Malformed lambda")),
            ("(lambda (x))", SpecificError("empty body")),
            ("(lambda)", SpecificError("Malformed lambda")),
            // === IMPLICIT BINDINGS ===
            ("((lambda (a b) arguments) 1 2)", success([1, 2])),
            ("((lambda args (length arguments)) 1 2 3)", success(3)),
            ("((lambda (x) (procedure? callee)) 1)", success(true)),
            (
                "((lambda (n) (if (= n 0) 'done (callee (- n 1)))) 10)",
                EvalResult(sym("done")),
            ),
            ("((lambda (arguments) arguments) 5)", success(5)),
            ("((lambda (callee) callee) 6)", success(6)),
            // === APPLICATION ===
            ("(5 3)", SpecificError("Not applicable: 5")),
            ("(\"f\")", SpecificError("Not applicable")),
            ("(car)", SpecificError("ArityError: car: expected 1 arguments, got 0")),
            ("(+ 1 . 2)", SpecificError("improper argument list")),
            ("((if #t + -) 3 2)", success(5)),
            // === LET ===
            ("(let ((x 1)) (+ x 1))", success(2)),
            ("((lambda (x) (+ x 1)) 1)", success(2)),
            ("(let ((x 1) (y 2)) (let ((x 10)) (+ x y)))", success(12)),
            ("(let () 7)", success(7)),
            (
                "(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))",
                success([2, 1, 0]),
            ),
            ("(let ((x)) x)", SpecificError("Malformed let")),
            // === COND ===
            ("(cond (#f 1) (else 2))", success(2)),
            ("(cond ((= 1 2) 'a) ((= 1 1) 'b))", EvalResult(sym("b"))),
            ("(cond (#f 1))", EvalResult(Value::Void)),
            ("(cond)", EvalResult(Value::Void)),
            ("(cond (7))", success(7)),
            ("(cond (#f) (else 'x))", EvalResult(sym("x"))),
            ("(cond ((+ 1 2) => (lambda (x) (* x 10))))", success(30)),
            ("(cond (#f => car) (else 'none))", EvalResult(sym("none"))),
            ("(cond (else 1) (#t 2))", SpecificError("else clause must be last")),
            // === CASE ===
            ("(case 3 ((1 2) 'low) ((3 4) 'mid) (else 'high))", EvalResult(sym("mid"))),
            ("(case 9 ((1) 'one) (else 'other))", EvalResult(sym("other"))),
            ("(case 'b ((a) 1) ((b) 2))", success(2)),
            ("(case 5 ((1) 'x))", EvalResult(Value::Void)),
            ("(case (+ 2 2) (else => (lambda (k) (* k k))))", success(16)),
            ("(case #\\a ((#\\a) 'letter))", EvalResult(sym("letter"))),
            // === AND / OR ===
            ("(and)", success(true)),
            ("(and 1 2)", success(2)),
            ("(and 1 #f (car '()))", success(false)),
            ("(or)", success(false)),
            ("(or #f 2)", success(2)),
            ("(or #f #f)", success(false)),
            ("(or 1 (car '()))", success(1)),
            // === WHEN / UNLESS ===
            ("(when (> 2 1) 'a 'b)", EvalResult(sym("b"))),
            ("(when #f 'a)", EvalResult(Value::Void)),
            ("(unless #f 'a)", EvalResult(sym("a"))),
            ("(unless #t 'a)", EvalResult(Value::Void)),
            // === DO ===
            (
                "(do ((i 0 (+ i 1)) (acc '() (cons i acc))) ((= i 3) acc))",
                success([2, 1, 0]),
            ),
            ("(do ((i 0 (+ i 1))) ((= i 3)))", EvalResult(Value::Void)),
            ("(do ((i 0 (+ i 1)) (k 5)) ((= i 2) k))", success(5)),
            // === HIGHER ORDER PRIMITIVES ===
            ("(map (lambda (x) (* x x)) '(1 2 3))", success([1, 4, 9])),
            ("(apply + 1 2 '(3 4))", success(10)),
            ("(apply (lambda (a . r) r) '(1 2))", success([2])),
            ("(for-each (lambda (x) x) '(1 2))", EvalResult(Value::Void)),
            ("(map car '(1))", AnyError),
            // === EVAL / EXPAND ===
            ("(eval '(+ 1 2))", success(3)),
            (
                "(expand '((lambda (x) (+ x x)) 5))",
                EvalResult(val(vec![sym("+"), val(5), val(5)])),
            ),
            // === ERROR ===
            ("(error \"boom\" 1)", SpecificError("boom")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_environment_operations() {
        let environment_test_cases = vec![
            // define and set!
            TestEnvironment(vec![
                test_setup!("(define x 10)"),
                ("x", success(10)),
                test_setup!("(set! x 20)"),
                ("x", success(20)),
                ("(set! y 1)", SpecificError("Unbound variable: y")),
                ("(set! 1 2)", SpecificError("Malformed set!")),
                ("(set! x)", SpecificError("Malformed set!")),
                ("(define 1 2)", SpecificError("Malformed define")),
                ("(define x)", SpecificError("Malformed define")),
                test_setup!("(define x 30)"),
                ("x", success(30)),
            ]),
            // Function-style define
            TestEnvironment(vec![
                test_setup!("(define (sq x) (* x x))"),
                ("(sq 5)", success(25)),
                test_setup!("(define (f . args) args)"),
                ("(f 1 2)", success([1, 2])),
                ("(f)", EvalResult(nil())),
                test_setup!("(define (g a . rest) (length rest))"),
                ("(g 1 2 3)", success(2)),
                ("(g)", SpecificError("ArityError: g: expected at least 1 arguments, got 0")),
                ("(define (h))", SpecificError("Malformed define")),
                ("(define (1 x) x)", SpecificError("Malformed define")),
            ]),
            // Closures created by distinct calls do not share state
            TestEnvironment(vec![
                test_setup!("(define (make-counter) (define n 0) (lambda () (set! n (+ n 1)) n))"),
                test_setup!("(define c1 (make-counter))"),
                test_setup!("(define c2 (make-counter))"),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
                ("(c1)", success(3)),
                ("n", SpecificError("Unbound variable: n")),
            ]),
            // Closures over the same frame observe each other's set!
            TestEnvironment(vec![
                test_setup!(
                    "(define (make-account) (define balance 0) (define (deposit! n) (set! balance (+ balance n))) (define (get) balance) (list deposit! get))"
                ),
                test_setup!("(define acct (make-account))"),
                test_setup!("((car acct) 50)"),
                test_setup!("((car acct) 25)"),
                ("((car (cdr acct)))", success(75)),
            ]),
            // Sequencing effects happen in order
            TestEnvironment(vec![
                test_setup!("(define trace '())"),
                (
                    "(begin (set! trace (cons 1 trace)) (set! trace (cons 2 trace)) (set! trace (cons 3 trace)) 3)",
                    success(3),
                ),
                ("trace", success([3, 2, 1])),
            ]),
            // Operands are evaluated left to right
            TestEnvironment(vec![
                test_setup!("(define order '())"),
                test_setup!("(define (note x) (set! order (cons x order)) x)"),
                ("(list (note 1) (note 2) (note 3))", success([1, 2, 3])),
                ("order", success([3, 2, 1])),
            ]),
            // while
            TestEnvironment(vec![
                test_setup!("(define i 0)"),
                test_setup!("(define total 0)"),
                test_setup!("(while (< i 5) (set! total (+ total i)) (set! i (+ i 1)))"),
                ("total", success(10)),
                ("i", success(5)),
            ]),
            // for keeps its induction variable local
            TestEnvironment(vec![
                test_setup!("(define sum 0)"),
                test_setup!("(for ((define k 0) (< k 4) (set! k (+ k 1))) (set! sum (+ sum k)))"),
                ("sum", success(6)),
                ("k", SpecificError("Unbound variable: k")),
            ]),
            // Recursion through define
            TestEnvironment(vec![
                test_setup!("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))"),
                ("(fact 10)", success(3628800)),
                test_setup!("(define (ev? n) (if (= n 0) #t (od? (- n 1))))"),
                test_setup!("(define (od? n) (if (= n 0) #f (ev? (- n 1))))"),
                ("(ev? 100001)", success(false)),
                ("(od? 7)", success(true)),
            ]),
            // Redefining a primitive shadows it for later calls
            TestEnvironment(vec![
                test_setup!("(define (double x) (* 2 x))"),
                ("(double 4)", success(8)),
                test_setup!("(define * +)"),
                ("(double 4)", success(6)),
            ]),
            // eval works in the global environment
            TestEnvironment(vec![
                test_setup!("(define answer 42)"),
                ("(eval 'answer)", success(42)),
                ("(let ((answer 1)) (eval 'answer))", success(42)),
                test_setup!("(eval '(define late 7))"),
                ("late", success(7)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_tail_calls_run_in_constant_stack() {
        run_tests_in_environment(vec![
            TestEnvironment(vec![
                test_setup!("(define (count-down n) (if (= n 0) 'done (count-down (- n 1))))"),
                ("(count-down 1000000)", EvalResult(sym("done"))),
            ]),
            TestEnvironment(vec![(
                "(let loop ((i 0)) (cond ((= i 200000) i) (else (loop (+ i 1)))))",
                success(200000),
            )]),
            TestEnvironment(vec![(
                "(do ((i 0 (+ i 1)) (acc 0 (+ acc 1))) ((= i 200000) acc))",
                success(200000),
            )]),
            TestEnvironment(vec![
                test_setup!("(define n 0)"),
                test_setup!("(while (< n 200000) (set! n (+ n 1)))"),
                ("n", success(200000)),
            ]),
            TestEnvironment(vec![
                test_setup!("(define (walk n) (and (> n -1) (or (= n 0) (walk (- n 1)))))"),
                ("(walk 200000)", success(true)),
            ]),
        ]);
    }

    #[test]
    fn test_large_data_does_not_use_the_native_stack() {
        run_tests_in_environment(vec![
            TestEnvironment(vec![
                test_setup!("(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))"),
                ("(equal? (build 100000 '()) (build 100000 '()))", success(true)),
                ("(equal? (build 100000 '()) (cons 0 (build 99999 '())))", success(false)),
                ("(length (build 300000 '()))", success(300000)),
            ]),
            TestEnvironment(vec![
                test_setup!("(define (nest n acc) (if (= n 0) 'ok (nest (- n 1) (list acc))))"),
                ("(nest 100000 '())", EvalResult(sym("ok"))),
                test_setup!("(define (deep n acc) (if (= n 0) acc (deep (- n 1) (list acc))))"),
                ("(equal? (deep 100000 'x) (deep 100000 'x))", success(true)),
                ("(equal? (deep 100000 'x) (deep 100000 'y))", success(false)),
            ]),
        ]);
    }

    #[test]
    fn test_evaluation_depth_limit() {
        // Run on a generous stack so reaching the limit is what fails
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                run_tests_in_environment(vec![TestEnvironment(vec![
                    test_setup!(
                        "(define (make-deep depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1)))))"
                    ),
                    ("(make-deep 10)", success(52)),
                    ("(make-deep 100000)", SpecificError("depth")),
                    // Depth carries across primitives that call back into procedures
                    test_setup!(
                        "(define (via-map depth) (if (= depth 0) 0 (car (map (lambda (d) (+ 1 (via-map d))) (list (- depth 1))))))"
                    ),
                    ("(via-map 10)", success(10)),
                    ("(via-map 100000)", SpecificError("depth")),
                ])]);
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_procedure_display_names() {
        let env = create_global_env();
        eval_str(
            "(define (sq x) (* x x)) (define h (lambda () 1)) (define h2 h)",
            &env,
        )
        .unwrap();

        assert_eq!(env.get("sq").unwrap().to_string(), "#<procedure:sq>");
        assert_eq!(env.get("h").unwrap().to_string(), "#<procedure:h>");
        // The first define names the procedure; later ones don't rename it
        assert_eq!(env.get("h2").unwrap().to_string(), "#<procedure:h>");
        assert_eq!(
            eval_str("(lambda (x) x)", &env).unwrap().to_string(),
            "#<procedure>"
        );
        assert_eq!(env.get("car").unwrap().to_string(), "#<procedure:car>");
    }

    #[test]
    fn test_arity_of_compound_procedures() {
        let env = create_global_env();
        eval_str("(define (two a b) a) (define (one+ a . rest) a)", &env).unwrap();

        let two = env.get("two").unwrap();
        let Value::Compound(compound) = &two else {
            panic!("expected a compound procedure, got {two:?}");
        };
        assert_eq!(compound.arity(), Arity::Exact(2));
        assert_eq!(check_arity(&two, 2), Ok(()));
        assert_eq!(
            check_arity(&two, 1),
            Err(Error::arity_mismatch("two", "2", 1))
        );

        let one_plus = env.get("one+").unwrap();
        assert_eq!(check_arity(&one_plus, 1), Ok(()));
        assert_eq!(check_arity(&one_plus, 4), Ok(()));
        assert_eq!(
            check_arity(&one_plus, 0),
            Err(Error::arity_mismatch("one+", "at least 1", 0))
        );
    }

    #[test]
    fn test_let_matches_its_lambda_expansion() {
        let env = create_global_env();
        let direct = eval_str("(let ((x 1)) (+ x 1))", &env).unwrap();
        let rewritten = crate::rewrite::let_to_combination(
            &parse_scheme("(let ((x 1)) (+ x 1))").unwrap(),
        )
        .unwrap();
        assert_eq!(rewritten.to_string(), "((lambda (x) (+ x 1)) 1)");
        assert_eq!(eval(&rewritten, &env).unwrap(), direct);
        assert_eq!(direct, val(2));
    }

    #[test]
    fn test_batch_halts_at_first_failure() {
        let env = create_global_env();
        let program = parse_program("(define a 1) (set! a 2) (car '()) (set! a 3)").unwrap();

        assert!(eval_all(&program, &env).is_err());
        // Effects before the failure stand, the rest never ran
        assert_eq!(env.get("a"), Some(val(2)));

        assert_eq!(eval_all(&[], &env), Ok(Value::Void));
        assert_eq!(eval_str("(set! a 5) a", &env), Ok(val(5)));
    }

    #[test]
    fn test_apply_api() {
        let env = create_global_env();
        let plus = env.get("+").unwrap();
        assert_eq!(apply(&plus, vec![val(1), val(2)]), Ok(val(3)));

        let add3 = eval_str("(lambda (a b c) (+ a b c))", &env).unwrap();
        assert_eq!(apply(&add3, vec![val(1), val(2), val(3)]), Ok(val(6)));
        assert!(matches!(
            apply(&add3, vec![val(1)]),
            Err(Error::ArityMismatch { got: 1, .. })
        ));
        assert_eq!(
            apply(&val(3), vec![]),
            Err(Error::NotApplicable("3".into()))
        );
    }

    #[test]
    fn test_custom_builtin_function() {
        let env = create_global_env();
        env.register_builtin_function("twice", Arity::Exact(1), |args| match args.as_slice() {
            [Value::Integer(n)] => Ok(Value::Integer(n * 2)),
            [other] => Err(Error::TypeError(format!("twice: expected integer, got {other}"))),
            _ => unreachable!("arity is checked before the call"),
        });

        assert_eq!(eval_str("(twice 21)", &env), Ok(val(42)));
        assert!(matches!(
            eval_str("(twice 1 2)", &env),
            Err(Error::ArityMismatch { .. })
        ));
        assert!(matches!(eval_str("(twice 'a)", &env), Err(Error::TypeError(_))));
    }
}
