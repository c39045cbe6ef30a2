use std::fmt;

use tracing::debug;

use crate::Error;
use crate::ast::Value;

/// Number of arguments a procedure accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// At least n arguments
    AtLeast(usize),
}

impl Arity {
    /// Any number of arguments
    pub const ANY: Arity = Arity::AtLeast(0);

    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(min) => count >= min,
        }
    }

    /// Whether the final parameter collects the remaining arguments
    pub fn has_rest(self) -> bool {
        matches!(self, Arity::AtLeast(_))
    }

    /// Check `count` against this arity, naming `name` in the error
    pub fn validate(self, name: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            debug!(procedure = name, expected = %self, got = count, "arity mismatch");
            Err(Error::arity_mismatch(name, self.to_string(), count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::AtLeast(min) => write!(f, "at least {min}"),
        }
    }
}

/// Check an argument count against a procedure's declared arity.
///
/// Values that are not procedures have no arity and are reported as
/// not applicable.
pub fn check_arity(procedure: &Value, count: usize) -> Result<(), Error> {
    let arity = match procedure {
        Value::Primitive(p) => p.arity,
        Value::Compound(c) => c.arity(),
        other => return Err(Error::NotApplicable(other.to_string())),
    };
    arity.validate(&procedure.procedure_name(), count)
}
