//! Desugaring of derived syntax into `lambda`, `if`, `begin` and `define`.
//!
//! Every transform is a pure function of the form it is given. The evaluator
//! continues into the result in tail position; the expander expands it.
//!
//! Loops become locally defined procedures that call themselves in tail
//! position, so they run in constant native stack space. The helper names
//! introduced here (`do-loop`, `while-loop`, `for-loop`, `case-key`, ...) are
//! ordinary symbols and shadow user variables of the same name inside the
//! rewritten body.

use crate::Error;
use crate::ast::Value;
use crate::syntax::{
    ARROW, ELSE, SpecialForm, form_operands, make_begin, make_call, make_define, make_if,
    make_lambda, make_quote, sequence,
};

/// Rewrite a derived form. `expr` must be a form whose head is `form`.
pub fn rewrite(form: SpecialForm, expr: &Value) -> Result<Value, Error> {
    match form {
        SpecialForm::Let => let_to_combination(expr),
        SpecialForm::Cond => cond_to_if(expr),
        SpecialForm::Case => case_to_cond(expr),
        SpecialForm::And => and_to_if(expr),
        SpecialForm::Or => or_to_if(expr),
        SpecialForm::When => when_to_if(expr),
        SpecialForm::Unless => unless_to_if(expr),
        SpecialForm::Do => transform_do(expr),
        SpecialForm::While => transform_while(expr),
        SpecialForm::For => transform_for(expr),
        SpecialForm::Quote
        | SpecialForm::Set
        | SpecialForm::Define
        | SpecialForm::If
        | SpecialForm::Lambda
        | SpecialForm::Begin => Err(Error::malformed(form.name(), "not a derived form")),
    }
}

fn s(name: &str) -> Value {
    Value::sym(name)
}

fn is_keyword(expr: &Value, keyword: &str) -> bool {
    expr.as_symbol().is_some_and(|sym| sym.as_str() == keyword)
}

fn non_empty_body(form: SpecialForm, body: &[Value]) -> Result<(), Error> {
    if body.is_empty() {
        Err(Error::malformed(form.name(), "empty body"))
    } else {
        Ok(())
    }
}

/// `(((lambda () (define name (lambda formals body...)) name)) args...)`
///
/// The arguments are evaluated outside the scope that binds `name`.
fn local_loop(name: &str, formals: Vec<Value>, body: Vec<Value>, args: Vec<Value>) -> Value {
    let procedure = make_lambda(Value::list(formals), body);
    let scope = make_lambda(Value::Nil, vec![make_define(s(name), procedure), s(name)]);
    make_call(make_call(scope, vec![]), args)
}

/// Split `((v e) ...)` into the variables and their initial expressions
fn parse_let_bindings(bindings: &Value) -> Result<(Vec<Value>, Vec<Value>), Error> {
    let form = SpecialForm::Let.name();
    let entries = bindings
        .to_vec()
        .ok_or_else(|| Error::malformed(form, format!("bindings must be a list, got {bindings}")))?;

    let mut vars = Vec::with_capacity(entries.len());
    let mut inits = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.to_vec().as_deref() {
            Some([var @ Value::Symbol(_), init]) => {
                vars.push(var.clone());
                inits.push(init.clone());
            }
            _ => return Err(Error::malformed(form, format!("bad binding {entry}"))),
        }
    }
    Ok((vars, inits))
}

/// `(let ((v e) ...) body...)` → `((lambda (v ...) body...) e ...)`
///
/// Named let binds `name` to the procedure inside its own body:
/// `(let loop ((v e) ...) body...)` →
/// `(((lambda () (define loop (lambda (v ...) body...)) loop)) e ...)`
pub fn let_to_combination(expr: &Value) -> Result<Value, Error> {
    let operands = form_operands(expr, SpecialForm::Let)?;
    match operands.as_slice() {
        [Value::Symbol(name), bindings, body @ ..] => {
            non_empty_body(SpecialForm::Let, body)?;
            let (vars, inits) = parse_let_bindings(bindings)?;
            Ok(local_loop(name.as_str(), vars, body.to_vec(), inits))
        }
        [bindings, body @ ..] => {
            non_empty_body(SpecialForm::Let, body)?;
            let (vars, inits) = parse_let_bindings(bindings)?;
            Ok(make_call(make_lambda(Value::list(vars), body.to_vec()), inits))
        }
        [] => Err(Error::malformed("let", "missing bindings")),
    }
}

/// `cond` → nested `if`.
///
/// - `(test body...)` → `(if test (begin body...) rest)`
/// - `(test)` → `(or test rest)`, the test value itself when it is true
/// - `(test => receiver)` passes the true test value to `receiver`
/// - `(else body...)` must be the last clause
///
/// With no matching clause the result is void.
pub fn cond_to_if(expr: &Value) -> Result<Value, Error> {
    let form = SpecialForm::Cond.name();
    let clauses = form_operands(expr, SpecialForm::Cond)?;
    let last = clauses.len().saturating_sub(1);

    let mut rest: Option<Value> = None;
    for (index, clause) in clauses.iter().enumerate().rev() {
        let parts = clause
            .to_vec()
            .ok_or_else(|| Error::malformed(form, format!("bad clause {clause}")))?;
        let (test, body) = parts
            .split_first()
            .ok_or_else(|| Error::malformed(form, "empty clause"))?;

        let rewritten = if is_keyword(test, ELSE) {
            if index != last {
                return Err(Error::malformed(form, "else clause must be last"));
            }
            non_empty_body(SpecialForm::Cond, body)?;
            sequence(body.to_vec())
        } else {
            match body {
                [] => match rest {
                    Some(rest) => make_call(s("or"), vec![test.clone(), rest]),
                    None => test.clone(),
                },
                [arrow, receiver] if is_keyword(arrow, ARROW) => {
                    cond_arrow(test.clone(), receiver.clone(), rest)
                }
                [arrow, ..] if is_keyword(arrow, ARROW) => {
                    return Err(Error::malformed(form, format!("bad => clause {clause}")));
                }
                _ => make_if(test.clone(), make_begin(body.to_vec()), rest),
            }
        };
        rest = Some(rewritten);
    }

    Ok(rest.unwrap_or(Value::Void))
}

/// The receiver and the remaining clauses are delayed in thunks built outside
/// the scope binding the test value.
fn cond_arrow(test: Value, receiver: Value, rest: Option<Value>) -> Value {
    let receive = make_call(make_call(s("cond-receiver"), vec![]), vec![s("cond-value")]);
    let mut formals = vec![s("cond-value"), s("cond-receiver")];
    let mut args = vec![test, make_lambda(Value::Nil, vec![receiver])];
    let otherwise = rest.map(|rest| {
        formals.push(s("cond-rest"));
        args.push(make_lambda(Value::Nil, vec![rest]));
        make_call(s("cond-rest"), vec![])
    });
    let body = make_if(s("cond-value"), receive, otherwise);
    make_call(make_lambda(Value::list(formals), vec![body]), args)
}

/// `(case key ((d ...) body...) ... (else body...))` →
/// `((lambda (case-key) (cond ((or (eqv? case-key 'd) ...) body...) ...)) key)`
///
/// A clause body of the form `=> receiver` calls `(receiver case-key)`.
pub fn case_to_cond(expr: &Value) -> Result<Value, Error> {
    let form = SpecialForm::Case.name();
    let operands = form_operands(expr, SpecialForm::Case)?;
    let (key, clauses) = operands
        .split_first()
        .ok_or_else(|| Error::malformed(form, "missing key"))?;
    let last = clauses.len().saturating_sub(1);

    let mut cond_clauses = Vec::with_capacity(clauses.len());
    for (index, clause) in clauses.iter().enumerate() {
        let parts = clause
            .to_vec()
            .ok_or_else(|| Error::malformed(form, format!("bad clause {clause}")))?;
        let (selector, body) = parts
            .split_first()
            .ok_or_else(|| Error::malformed(form, "empty clause"))?;
        non_empty_body(SpecialForm::Case, body)?;

        let test = if is_keyword(selector, ELSE) {
            if index != last {
                return Err(Error::malformed(form, "else clause must be last"));
            }
            s(ELSE)
        } else {
            let data = selector
                .to_vec()
                .ok_or_else(|| Error::malformed(form, format!("bad datum list {selector}")))?;
            let mut tests: Vec<Value> = data
                .into_iter()
                .map(|datum| make_call(s("eqv?"), vec![s("case-key"), make_quote(datum)]))
                .collect();
            match tests.len() {
                0 => Value::Bool(false),
                1 => tests.remove(0),
                _ => make_call(s("or"), tests),
            }
        };

        let body = match body {
            [arrow, receiver] if is_keyword(arrow, ARROW) => {
                vec![make_call(receiver.clone(), vec![s("case-key")])]
            }
            [arrow, ..] if is_keyword(arrow, ARROW) => {
                return Err(Error::malformed(form, format!("bad => clause {clause}")));
            }
            _ => body.to_vec(),
        };
        cond_clauses.push(Value::cons(test, Value::list(body)));
    }

    let dispatch = make_call(s("cond"), cond_clauses);
    Ok(make_call(
        make_lambda(Value::list([s("case-key")]), vec![dispatch]),
        vec![key.clone()],
    ))
}

/// `(and)` → `#t`, `(and e)` → `e`, `(and e1 e2 ...)` → `(if e1 (and e2 ...) #f)`
pub fn and_to_if(expr: &Value) -> Result<Value, Error> {
    let mut operands = form_operands(expr, SpecialForm::And)?;
    Ok(match operands.len() {
        0 => Value::Bool(true),
        1 => operands.remove(0),
        _ => {
            let first = operands.remove(0);
            make_if(first, make_call(s("and"), operands), Some(Value::Bool(false)))
        }
    })
}

/// `(or)` → `#f`, `(or e)` → `e`, and otherwise
/// `((lambda (or-value or-rest) (if or-value or-value (or-rest))) e1 (lambda () (or e2 ...)))`
///
/// The first operand is evaluated once. The remaining operands are delayed in
/// a thunk built outside the scope of `or-value`.
pub fn or_to_if(expr: &Value) -> Result<Value, Error> {
    let mut operands = form_operands(expr, SpecialForm::Or)?;
    Ok(match operands.len() {
        0 => Value::Bool(false),
        1 => operands.remove(0),
        _ => {
            let first = operands.remove(0);
            let rest = make_lambda(Value::Nil, vec![make_call(s("or"), operands)]);
            let body = make_if(
                s("or-value"),
                s("or-value"),
                Some(make_call(s("or-rest"), vec![])),
            );
            make_call(
                make_lambda(Value::list([s("or-value"), s("or-rest")]), vec![body]),
                vec![first, rest],
            )
        }
    })
}

/// `(when t body...)` → `(if t (begin body...))`
pub fn when_to_if(expr: &Value) -> Result<Value, Error> {
    let operands = form_operands(expr, SpecialForm::When)?;
    let (test, body) = operands
        .split_first()
        .ok_or_else(|| Error::malformed("when", "missing test"))?;
    Ok(make_if(test.clone(), make_begin(body.to_vec()), None))
}

/// `(unless t body...)` → `(if t (begin) (begin body...))`
pub fn unless_to_if(expr: &Value) -> Result<Value, Error> {
    let operands = form_operands(expr, SpecialForm::Unless)?;
    let (test, body) = operands
        .split_first()
        .ok_or_else(|| Error::malformed("unless", "missing test"))?;
    Ok(make_if(
        test.clone(),
        make_begin(vec![]),
        Some(make_begin(body.to_vec())),
    ))
}

/// `(do ((var init step) ...) (test res...) body...)` →
/// `(((lambda () (define do-loop (lambda (var ...) (if test (begin res...) (begin body... (do-loop step ...))))) do-loop)) init ...)`
///
/// A variable without a step keeps its value across iterations.
pub fn transform_do(expr: &Value) -> Result<Value, Error> {
    let form = SpecialForm::Do.name();
    let operands = form_operands(expr, SpecialForm::Do)?;
    let [specs, exit, body @ ..] = operands.as_slice() else {
        return Err(Error::malformed(form, "expected variable specs and a test clause"));
    };

    let specs = specs
        .to_vec()
        .ok_or_else(|| Error::malformed(form, format!("bad variable specs {specs}")))?;
    let mut vars = Vec::with_capacity(specs.len());
    let mut inits = Vec::with_capacity(specs.len());
    let mut steps = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec.to_vec().as_deref() {
            Some([var @ Value::Symbol(_), init]) => {
                vars.push(var.clone());
                inits.push(init.clone());
                steps.push(var.clone());
            }
            Some([var @ Value::Symbol(_), init, step]) => {
                vars.push(var.clone());
                inits.push(init.clone());
                steps.push(step.clone());
            }
            _ => return Err(Error::malformed(form, format!("bad variable spec {spec}"))),
        }
    }

    let exit = exit
        .to_vec()
        .ok_or_else(|| Error::malformed(form, format!("bad test clause {exit}")))?;
    let (test, results) = exit
        .split_first()
        .ok_or_else(|| Error::malformed(form, "missing test"))?;

    let mut iteration = body.to_vec();
    iteration.push(make_call(s("do-loop"), steps));
    let step = make_if(
        test.clone(),
        make_begin(results.to_vec()),
        Some(make_begin(iteration)),
    );
    Ok(local_loop("do-loop", vars, vec![step], inits))
}

/// `(while test body...)` →
/// `(((lambda () (define while-loop (lambda () (if test (begin body... (while-loop))))) while-loop)))`
pub fn transform_while(expr: &Value) -> Result<Value, Error> {
    let operands = form_operands(expr, SpecialForm::While)?;
    let (test, body) = operands
        .split_first()
        .ok_or_else(|| Error::malformed("while", "missing test"))?;

    let mut iteration = body.to_vec();
    iteration.push(make_call(s("while-loop"), vec![]));
    let step = make_if(test.clone(), make_begin(iteration), None);
    Ok(local_loop("while-loop", vec![], vec![step], vec![]))
}

/// `(for (init test step) body...)` →
/// `((lambda () init (define for-loop (lambda () (if test (begin body... step (for-loop))))) (for-loop)))`
///
/// `init` runs once in a fresh scope, so a `define` there is local to the loop.
pub fn transform_for(expr: &Value) -> Result<Value, Error> {
    let form = SpecialForm::For.name();
    let operands = form_operands(expr, SpecialForm::For)?;
    let (header, body) = operands
        .split_first()
        .ok_or_else(|| Error::malformed(form, "missing loop header"))?;
    let parts = header.to_vec();
    let Some([init, test, step]) = parts.as_deref() else {
        return Err(Error::malformed(
            form,
            format!("loop header must be (init test step), got {header}"),
        ));
    };

    let mut iteration = body.to_vec();
    iteration.push(step.clone());
    iteration.push(make_call(s("for-loop"), vec![]));
    let looping = make_lambda(
        Value::Nil,
        vec![make_if(test.clone(), make_begin(iteration), None)],
    );
    let scope = make_lambda(
        Value::Nil,
        vec![
            init.clone(),
            make_define(s("for-loop"), looping),
            make_call(s("for-loop"), vec![]),
        ],
    );
    Ok(make_call(scope, vec![]))
}
