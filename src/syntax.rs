//! Reserved syntax symbols and helpers for taking special forms apart.
//!
//! Recognition is structural: a pair whose head is one of these symbols is a
//! special form no matter what the symbol is bound to.

use crate::Error;
use crate::ast::{Symbol, Value};

/// Clause keyword for the fallback branch of `cond` and `case`
pub const ELSE: &str = "else";
/// Clause keyword passing the tested value to a receiver in `cond` and `case`
pub const ARROW: &str = "=>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    Set,
    Define,
    If,
    Lambda,
    Begin,
    Let,
    Cond,
    Case,
    And,
    Or,
    When,
    Unless,
    Do,
    While,
    For,
}

impl SpecialForm {
    pub const ALL: [SpecialForm; 16] = [
        SpecialForm::Quote,
        SpecialForm::Set,
        SpecialForm::Define,
        SpecialForm::If,
        SpecialForm::Lambda,
        SpecialForm::Begin,
        SpecialForm::Let,
        SpecialForm::Cond,
        SpecialForm::Case,
        SpecialForm::And,
        SpecialForm::Or,
        SpecialForm::When,
        SpecialForm::Unless,
        SpecialForm::Do,
        SpecialForm::While,
        SpecialForm::For,
    ];

    pub fn from_symbol(symbol: &Symbol) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|form| form.name() == symbol.as_str())
    }

    /// Recognize the special form an expression is, if any
    pub fn of(expr: &Value) -> Option<Self> {
        expr.as_pair()
            .and_then(|pair| pair.car.as_symbol())
            .and_then(Self::from_symbol)
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::Set => "set!",
            SpecialForm::Define => "define",
            SpecialForm::If => "if",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Begin => "begin",
            SpecialForm::Let => "let",
            SpecialForm::Cond => "cond",
            SpecialForm::Case => "case",
            SpecialForm::And => "and",
            SpecialForm::Or => "or",
            SpecialForm::When => "when",
            SpecialForm::Unless => "unless",
            SpecialForm::Do => "do",
            SpecialForm::While => "while",
            SpecialForm::For => "for",
        }
    }
}

/// The operands of a special form, which must be a proper list
pub fn form_operands(expr: &Value, form: SpecialForm) -> Result<Vec<Value>, Error> {
    expr.as_pair()
        .and_then(|pair| pair.cdr.to_vec())
        .ok_or_else(|| Error::malformed(form.name(), format!("improper form {expr}")))
}

/// A single expression as itself, several wrapped in `begin`
pub fn sequence(mut body: Vec<Value>) -> Value {
    if body.len() == 1 {
        body.remove(0)
    } else {
        make_begin(body)
    }
}

pub fn make_begin(body: Vec<Value>) -> Value {
    Value::cons(Value::sym("begin"), Value::list(body))
}

pub fn make_if(test: Value, consequent: Value, alternative: Option<Value>) -> Value {
    let mut parts = vec![Value::sym("if"), test, consequent];
    parts.extend(alternative);
    Value::list(parts)
}

pub fn make_lambda(formals: Value, body: Vec<Value>) -> Value {
    Value::list_with_tail([Value::sym("lambda"), formals], Value::list(body))
}

pub fn make_define(name: Value, value: Value) -> Value {
    Value::list([Value::sym("define"), name, value])
}

pub fn make_quote(datum: Value) -> Value {
    Value::list([Value::sym("quote"), datum])
}

/// `(operator operand...)`
pub fn make_call(operator: Value, operands: Vec<Value>) -> Value {
    Value::cons(operator, Value::list(operands))
}
