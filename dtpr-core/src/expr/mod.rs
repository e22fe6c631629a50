//! Whitelisted expression language for attribute derivation, particle
//! filters and sorter keys.
//!
//! Expressions are parsed once when a schema is compiled and evaluated per
//! particle against a fixed [`Scope`]; nothing outside the scope and the
//! builtin functions is reachable.

mod ast;
mod eval;
mod parser;

use std::fmt;
use std::str::FromStr;

pub use ast::{Ast, BinaryOp, Builtin, UnaryOp};
pub use eval::{Operand, Scope};

use crate::error::{Error, Result};
use crate::value::{Scalar, Value};

/// A compiled expression together with its source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Ast,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    /// Returns [`Error::Expression`] if the source is not a valid expression.
    pub fn compile(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            ast: parser::parse(source)?,
        })
    }

    /// Source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax tree.
    #[must_use]
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Free names, in order of first appearance.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.ast.collect_names(&mut names);
        names
    }

    /// Checks that every free name is allowed.
    ///
    /// # Errors
    /// Returns [`Error::Expression`] naming the first undefined name.
    pub fn check_names(&self, allowed: impl Fn(&str) -> bool) -> Result<()> {
        match self.names().into_iter().find(|n| !allowed(n)) {
            Some(name) => Err(Error::Expression {
                expr: self.source.clone(),
                message: format!("name '{name}' is not defined at this point"),
            }),
            None => Ok(()),
        }
    }

    /// Evaluates the expression.
    ///
    /// # Errors
    /// Propagates evaluation failures, tagged with the source text.
    pub fn evaluate<'a>(&self, scope: &Scope<'a>) -> Result<Operand<'a>> {
        eval::evaluate(&self.ast, scope).map_err(|e| match e {
            Error::Evaluation(message) => {
                Error::Evaluation(format!("{message} (in '{}')", self.source))
            }
            other => other,
        })
    }

    /// Evaluates to an attribute value.
    ///
    /// # Errors
    /// Fails if evaluation fails or the result cannot be stored.
    pub fn value(&self, scope: &Scope<'_>) -> Result<Value> {
        self.evaluate(scope)?.into_value()
    }

    /// Evaluates to a truth value.
    ///
    /// # Errors
    /// Propagates evaluation failures.
    pub fn truthy(&self, scope: &Scope<'_>) -> Result<bool> {
        Ok(self.evaluate(scope)?.truthy())
    }

    /// Evaluates to a scalar, as needed for sort keys.
    ///
    /// # Errors
    /// Fails if the result is not a scalar.
    pub fn scalar(&self, scope: &Scope<'_>) -> Result<Scalar> {
        match self.evaluate(scope)? {
            Operand::Scalar(s) => Ok(s),
            other => Err(Error::Evaluation(format!(
                "'{}' must produce a scalar, got {other:?}",
                self.source
            ))),
        }
    }
}

impl FromStr for Expression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    #[test]
    fn test_names() {
        let expr = Expression::compile("'+z' if wh > 0 else side + p.wh").unwrap();
        assert_eq!(expr.names(), vec!["wh", "side", "p"]);
        assert!(expr.check_names(|n| n != "side").is_err());
        assert!(expr.check_names(|_| true).is_ok());
    }

    #[test]
    fn test_value_and_scalar() {
        let p = Particle::new(0, "Particle").with("wh", -2);
        let expr: Expression = "'+z' if wh > 0 else '-z'".parse().unwrap();
        assert_eq!(
            expr.value(&Scope::Attributes(&p)).unwrap(),
            Value::from("-z")
        );
        let err = Expression::compile("nope + 1")
            .unwrap()
            .value(&Scope::Attributes(&p))
            .unwrap_err();
        assert!(err.to_string().contains("in 'nope + 1'"));
    }
}
