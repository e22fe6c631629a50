//! Expression parser using a pest PEG grammar + Pratt parser.
//!
//! Parses strings like:
//! - `"'+z' if wh > 0 else '-z'"`
//! - `"p.pt > 5 and abs(p.eta) < 2.4"`
//! - `"len(p.matched_segments) >= 2"`

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use super::ast::{Ast, BinaryOp, Builtin, UnaryOp};
use crate::error::{Error, Result};
use crate::value::Scalar;

#[derive(Parser)]
#[grammar = "expr/expr.pest"]
struct ExpressionParser;

fn pratt() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left)
            | Op::infix(Rule::in_op, Assoc::Left)
            | Op::infix(Rule::not_in_op, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::floordiv, Assoc::Left)
            | Op::infix(Rule::modulo, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos))
        .op(Op::infix(Rule::pow, Assoc::Right))
        .op(Op::postfix(Rule::member) | Op::postfix(Rule::subscript))
}

/// Parses an expression string into an [`Ast`].
///
/// # Errors
/// Returns [`Error::Expression`] on syntax errors, unknown functions and
/// wrong argument counts.
pub fn parse(source: &str) -> Result<Ast> {
    let mut pairs = ExpressionParser::parse(Rule::expression, source)
        .map_err(|e| invalid(source, e.to_string()))?;
    let ternary = pairs
        .next()
        .and_then(|expression| {
            expression
                .into_inner()
                .find(|p| p.as_rule() == Rule::ternary)
        })
        .ok_or_else(|| invalid(source, "empty expression"))?;

    Builder {
        source,
        pratt: pratt(),
    }
    .ternary(ternary)
}

fn invalid(source: &str, message: impl Into<String>) -> Error {
    Error::Expression {
        expr: source.to_string(),
        message: message.into(),
    }
}

struct Builder<'s> {
    source: &'s str,
    pratt: PrattParser<Rule>,
}

impl Builder<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        invalid(self.source, message)
    }

    fn ternary(&self, pair: Pair<'_, Rule>) -> Result<Ast> {
        // ternary = { operation ~ (if_kw ~ operation ~ else_kw ~ ternary)? }
        let mut parts = pair
            .into_inner()
            .filter(|p| !matches!(p.as_rule(), Rule::if_kw | Rule::else_kw));
        let value = match parts.next() {
            Some(p) => self.operation(p)?,
            None => return Err(self.error("empty expression")),
        };
        let Some(cond) = parts.next() else {
            return Ok(value);
        };
        let cond = self.operation(cond)?;
        let otherwise = match parts.next() {
            Some(p) => self.ternary(p)?,
            None => return Err(self.error("conditional expression without 'else'")),
        };
        Ok(Ast::IfElse {
            cond: Box::new(cond),
            then: Box::new(value),
            otherwise: Box::new(otherwise),
        })
    }

    fn operation(&self, pair: Pair<'_, Rule>) -> Result<Ast> {
        self.pratt
            .map_primary(|primary| self.primary(primary))
            .map_prefix(|op, rhs| {
                let op = match op.as_rule() {
                    Rule::not_op => UnaryOp::Not,
                    Rule::neg => UnaryOp::Neg,
                    Rule::pos => UnaryOp::Pos,
                    other => return Err(self.error(format!("unexpected prefix {other:?}"))),
                };
                Ok(Ast::Unary(op, Box::new(rhs?)))
            })
            .map_infix(|lhs, op, rhs| {
                let (lhs, rhs) = (Box::new(lhs?), Box::new(rhs?));
                let op = match op.as_rule() {
                    Rule::and_op => return Ok(Ast::And(lhs, rhs)),
                    Rule::or_op => return Ok(Ast::Or(lhs, rhs)),
                    Rule::eq => BinaryOp::Eq,
                    Rule::ne => BinaryOp::Ne,
                    Rule::lt => BinaryOp::Lt,
                    Rule::le => BinaryOp::Le,
                    Rule::gt => BinaryOp::Gt,
                    Rule::ge => BinaryOp::Ge,
                    Rule::in_op => BinaryOp::In,
                    Rule::not_in_op => BinaryOp::NotIn,
                    Rule::add => BinaryOp::Add,
                    Rule::sub => BinaryOp::Sub,
                    Rule::mul => BinaryOp::Mul,
                    Rule::div => BinaryOp::Div,
                    Rule::floordiv => BinaryOp::FloorDiv,
                    Rule::modulo => BinaryOp::Mod,
                    Rule::pow => BinaryOp::Pow,
                    other => return Err(self.error(format!("unexpected operator {other:?}"))),
                };
                Ok(Ast::Binary(op, lhs, rhs))
            })
            .map_postfix(|lhs, op| {
                let lhs = Box::new(lhs?);
                match op.as_rule() {
                    Rule::member => {
                        let name = op.into_inner().next().map(|p| p.as_str().to_string());
                        name.map(|n| Ast::Member(lhs, n))
                            .ok_or_else(|| self.error("member access without a name"))
                    }
                    Rule::subscript => match op.into_inner().next() {
                        Some(index) => Ok(Ast::Index(lhs, Box::new(self.ternary(index)?))),
                        None => Err(self.error("empty subscript")),
                    },
                    other => Err(self.error(format!("unexpected postfix {other:?}"))),
                }
            })
            .parse(pair.into_inner())
    }

    fn primary(&self, pair: Pair<'_, Rule>) -> Result<Ast> {
        match pair.as_rule() {
            Rule::int => pair
                .as_str()
                .parse::<i64>()
                .map(|v| Ast::Literal(Scalar::Int(v)))
                .map_err(|e| self.error(format!("integer literal {}: {e}", pair.as_str()))),
            Rule::float => pair
                .as_str()
                .parse::<f64>()
                .map(|v| Ast::Literal(Scalar::Float(v)))
                .map_err(|e| self.error(format!("float literal {}: {e}", pair.as_str()))),
            Rule::string => {
                let text = pair.into_inner().next().map_or("", |p| p.as_str());
                Ok(Ast::Literal(Scalar::Str(text.to_string())))
            }
            Rule::true_lit => Ok(Ast::Literal(Scalar::Bool(true))),
            Rule::false_lit => Ok(Ast::Literal(Scalar::Bool(false))),
            Rule::none_lit => Ok(Ast::None),
            Rule::ident => Ok(match pair.as_str() {
                "pi" => Ast::Literal(Scalar::Float(std::f64::consts::PI)),
                name => Ast::Name(name.to_string()),
            }),
            Rule::list => pair
                .into_inner()
                .map(|item| self.ternary(item))
                .collect::<Result<Vec<_>>>()
                .map(Ast::List),
            Rule::call => self.call(pair),
            Rule::ternary => self.ternary(pair),
            other => Err(self.error(format!("unexpected primary {other:?}"))),
        }
    }

    fn call(&self, pair: Pair<'_, Rule>) -> Result<Ast> {
        // call = { ident ~ "(" ~ args ~ ")" }
        let mut inner = pair.into_inner();
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .ok_or_else(|| self.error("call without a function name"))?;
        let function =
            Builtin::from_name(&name).ok_or_else(|| self.error(format!("unknown function '{name}'")))?;
        let args = inner
            .map(|arg| self.ternary(arg))
            .collect::<Result<Vec<_>>>()?;
        if !function.arity().contains(&args.len()) {
            return Err(self.error(format!(
                "{name}() does not take {} argument(s)",
                args.len()
            )));
        }
        Ok(Ast::Call(function, args))
    }
}
