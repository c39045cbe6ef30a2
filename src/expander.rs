//! Normal-order expansion.
//!
//! `expand` rewrites an expression instead of computing its value. Calls to
//! compound procedures are inlined by substituting the *unevaluated* operand
//! expressions for the parameters; calls to primitives are rebuilt with
//! expanded operands but never performed. Symbols resolve to their current
//! value so the operator of a call can be inspected.
//!
//! Substitution is textual. Bound variables are not renamed, so an operand
//! mentioning a name that the inlined body binds is captured by that binding:
//!
//! ```text
//! ((lambda (x) ((lambda (y) (+ x y)) 1)) y)   ; expands to (+ 1 1)
//! ```

use std::collections::HashMap;

use tracing::trace;

use crate::ast::{Symbol, Value};
use crate::environment::Environment;
use crate::evaluator::eval_lambda;
use crate::evaluator::frame::make_substitution_map;
use crate::rewrite::rewrite;
use crate::syntax::{SpecialForm, make_call, sequence};
use crate::{Error, MAX_EVAL_DEPTH, MAX_EXPAND_STEPS};

/// Expand `expr` in `env`.
///
/// `quote`, `define`, `if`, `begin` and `set!` come back verbatim; `lambda`
/// becomes a compound procedure. Each inlining or rewriting step costs one
/// unit of a budget of [`MAX_EXPAND_STEPS`], so a procedure that inlines into
/// itself forever fails with an error.
pub fn expand(expr: &Value, env: &Environment) -> Result<Value, Error> {
    let mut fuel = MAX_EXPAND_STEPS;
    expand_with_fuel(expr.clone(), env, &mut fuel, 0)
}

fn burn(fuel: &mut usize) -> Result<(), Error> {
    match fuel.checked_sub(1) {
        Some(left) => {
            *fuel = left;
            Ok(())
        }
        None => Err(Error::EvalError(format!(
            "Expansion step limit exceeded (max: {MAX_EXPAND_STEPS})"
        ))),
    }
}

fn expand_with_fuel(
    mut expr: Value,
    env: &Environment,
    fuel: &mut usize,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Expansion depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }

    loop {
        burn(fuel)?;

        let (operator_expr, operands_expr) = match &expr {
            Value::Symbol(name) => return env.lookup(name),
            Value::Pair(pair) => (pair.car.clone(), pair.cdr.clone()),
            _ => return Ok(expr),
        };

        if let Some(form) = SpecialForm::of(&expr) {
            match form {
                SpecialForm::Quote
                | SpecialForm::Define
                | SpecialForm::If
                | SpecialForm::Begin
                | SpecialForm::Set => return Ok(expr),
                SpecialForm::Lambda => return eval_lambda(&expr, env),
                derived => {
                    expr = rewrite(derived, &expr)?;
                    continue;
                }
            }
        }

        let operator = expand_with_fuel(operator_expr.clone(), env, fuel, depth + 1)?;
        match operator {
            Value::Primitive(_) => {
                let operands = operand_list(&operands_expr)?;
                let mut expanded = Vec::with_capacity(operands.len());
                for operand in operands {
                    expanded.push(expand_with_fuel(operand, env, fuel, depth + 1)?);
                }
                return Ok(make_call(operator_expr, expanded));
            }
            Value::Compound(procedure) => {
                let operands = operand_list(&operands_expr)?;
                procedure
                    .arity()
                    .validate(&procedure.display_name(), operands.len())?;
                let bindings = make_substitution_map(&procedure, &operands);
                trace!(
                    procedure = %procedure.display_name(),
                    operands = operands.len(),
                    "inlining"
                );
                expr = sequence(
                    procedure
                        .body()
                        .iter()
                        .map(|body_expr| substitute(body_expr, &bindings))
                        .collect(),
                );
            }
            _ => return Ok(expr),
        }
    }
}

fn operand_list(operands: &Value) -> Result<Vec<Value>, Error> {
    operands
        .to_vec()
        .ok_or_else(|| Error::EvalError(format!("improper argument list ending in {operands}")))
}

/// Replace every symbol bound in `bindings`, wherever it occurs in `expr`.
///
/// Nothing is off limits: quoted data and the bodies of nested lambdas are
/// rewritten too, and the replacements themselves are not searched.
fn substitute(expr: &Value, bindings: &HashMap<Symbol, Value>) -> Value {
    match expr {
        Value::Symbol(name) => bindings.get(name).cloned().unwrap_or_else(|| expr.clone()),
        Value::Pair(_) => {
            let mut items = Vec::new();
            let mut current = expr;
            while let Value::Pair(pair) = current {
                items.push(substitute(&pair.car, bindings));
                current = &pair.cdr;
            }
            Value::list_with_tail(items, substitute(current, bindings))
        }
        _ => expr.clone(),
    }
}
