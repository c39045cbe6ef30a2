//! Binding of formal parameters for procedure application.
//!
//! The evaluator binds parameters to evaluated arguments; the expander binds
//! the same parameters to unevaluated operand expressions. Both go through
//! [`bind_formals`] so the two passes agree on parameter shapes.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Compound, Symbol, Value};
use crate::environment::Environment;
use crate::evaluator::arity::Arity;

/// Implicit binding holding the list of all arguments of the current call
pub const ARGUMENTS: &str = "arguments";
/// Implicit binding holding the procedure being applied
pub const CALLEE: &str = "callee";

/// Pair each parameter with its item.
///
/// - fixed arity: positional
/// - with a rest parameter (`AtLeast(min)`): the first `min` parameters positionally, the final
///   parameter gets a list of the remaining items (all of them when `min` is 0)
///
/// `items` must already satisfy `arity`.
pub(crate) fn bind_formals(params: &[Symbol], arity: Arity, items: &[Value]) -> Vec<(Symbol, Value)> {
    match params.split_last() {
        Some((rest_param, positional)) if arity.has_rest() => {
            let split = positional.len().min(items.len());
            let mut bindings: Vec<(Symbol, Value)> = positional
                .iter()
                .cloned()
                .zip(items[..split].iter().cloned())
                .collect();
            bindings.push((rest_param.clone(), Value::list(items[split..].iter().cloned())));
            bindings
        }
        _ => params.iter().cloned().zip(items.iter().cloned()).collect(),
    }
}

/// Build the frame for applying `procedure` to `args`.
///
/// The new frame's parent is the environment the procedure closed over. The
/// implicit `arguments` and `callee` bindings come first so that explicit
/// parameters of the same name take precedence.
pub fn make_procedure_env(procedure: &Rc<Compound>, args: Vec<Value>) -> Environment {
    let mut bindings = Vec::with_capacity(procedure.params().len() + 2);
    bindings.push((Symbol::new(ARGUMENTS), Value::list(args.iter().cloned())));
    bindings.push((Symbol::new(CALLEE), Value::Compound(Rc::clone(procedure))));
    bindings.extend(bind_formals(procedure.params(), procedure.arity(), &args));
    procedure.env().extend(bindings)
}

/// Map each parameter of `procedure` to the operand expression it stands for.
/// A rest parameter maps to the list of the remaining operand expressions.
pub(crate) fn make_substitution_map(procedure: &Compound, operands: &[Value]) -> HashMap<Symbol, Value> {
    bind_formals(procedure.params(), procedure.arity(), operands)
        .into_iter()
        .collect()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};
    use pretty_assertions::assert_eq;

    fn params(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|n| Symbol::new(n)).collect()
    }

    fn compound(names: &[&str], arity: Arity) -> Rc<Compound> {
        Rc::new(Compound::new(params(names), val([sym("x")]), Environment::new(), arity))
    }

    #[test]
    fn test_bind_formals_shapes() {
        let items = [val(1), val(2), val(3)];

        // Fixed arity binds positionally
        assert_eq!(
            bind_formals(&params(&["a", "b", "c"]), Arity::Exact(3), &items),
            vec![
                (Symbol::new("a"), val(1)),
                (Symbol::new("b"), val(2)),
                (Symbol::new("c"), val(3)),
            ]
        );

        // Minimum with rest
        assert_eq!(
            bind_formals(&params(&["a", "rest"]), Arity::AtLeast(1), &items),
            vec![(Symbol::new("a"), val(1)), (Symbol::new("rest"), val([2, 3]))]
        );

        // Rest may be empty
        assert_eq!(
            bind_formals(&params(&["a", "rest"]), Arity::AtLeast(1), &items[..1]),
            vec![(Symbol::new("a"), val(1)), (Symbol::new("rest"), Value::Nil)]
        );

        // Pure rest
        assert_eq!(
            bind_formals(&params(&["all"]), Arity::AtLeast(0), &items),
            vec![(Symbol::new("all"), val([1, 2, 3]))]
        );

        // No parameters at all
        assert_eq!(bind_formals(&[], Arity::Exact(0), &[]), vec![]);
    }

    #[test]
    fn test_procedure_env_has_implicit_bindings() {
        let procedure = compound(&["a", "b"], Arity::Exact(2));
        let env = make_procedure_env(&procedure, vec![val(1), val(2)]);

        assert_eq!(env.get("a"), Some(val(1)));
        assert_eq!(env.get("b"), Some(val(2)));
        assert_eq!(env.get(ARGUMENTS), Some(val([1, 2])));
        assert_eq!(
            env.get(CALLEE),
            Some(Value::Compound(Rc::clone(&procedure)))
        );
        assert!(env.parent().unwrap().ptr_eq(procedure.env()));
    }

    #[test]
    fn test_explicit_parameters_override_implicit_bindings() {
        let procedure = compound(&["arguments", "callee"], Arity::Exact(2));
        let env = make_procedure_env(&procedure, vec![val("x"), val("y")]);

        assert_eq!(env.get(ARGUMENTS), Some(val("x")));
        assert_eq!(env.get(CALLEE), Some(val("y")));
    }

    #[test]
    fn test_substitution_map_uses_operand_expressions() {
        let procedure = compound(&["x", "more"], Arity::AtLeast(1));
        let operands = [val(vec![sym("f"), val(1)]), sym("y"), val(2)];
        let map = make_substitution_map(&procedure, &operands);

        assert_eq!(map[&Symbol::new("x")], val(vec![sym("f"), val(1)]));
        assert_eq!(map[&Symbol::new("more")], val(vec![sym("y"), val(2)]));
        assert_eq!(map.len(), 2);
    }
}
