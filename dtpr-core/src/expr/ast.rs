//! Expression syntax tree.

use std::ops::RangeInclusive;

use crate::value::Scalar;

/// Binary operators other than the short-circuiting `and`/`or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// Whitelisted functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Len,
    Min,
    Max,
    Sum,
    Int,
    Float,
    Str,
    Bool,
    Round,
    Sqrt,
    Cos,
    Sin,
    Acos,
    Exp,
    Log,
}

impl Builtin {
    /// Looks up a function by the name used in expressions.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Builtin::Abs,
            "len" => Builtin::Len,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "round" => Builtin::Round,
            "sqrt" => Builtin::Sqrt,
            "cos" => Builtin::Cos,
            "sin" => Builtin::Sin,
            "acos" => Builtin::Acos,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            _ => return None,
        })
    }

    /// Accepted number of arguments.
    #[must_use]
    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Builtin::Min | Builtin::Max => 1..=usize::MAX,
            Builtin::Round => 1..=2,
            _ => 1..=1,
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Literal(Scalar),
    None,
    Name(String),
    List(Vec<Ast>),
    Member(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Call(Builtin, Vec<Ast>),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinaryOp, Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    IfElse {
        cond: Box<Ast>,
        then: Box<Ast>,
        otherwise: Box<Ast>,
    },
}

impl Ast {
    /// Collects the free names referenced by the expression, in order of
    /// first appearance. Member names (`p.pt`) are not free names.
    pub fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Ast::Literal(_) | Ast::None => {}
            Ast::Name(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Ast::List(items) | Ast::Call(_, items) => {
                for item in items {
                    item.collect_names(out);
                }
            }
            Ast::Member(base, _) | Ast::Unary(_, base) => base.collect_names(out),
            Ast::Index(a, b) | Ast::Binary(_, a, b) | Ast::And(a, b) | Ast::Or(a, b) => {
                a.collect_names(out);
                b.collect_names(out);
            }
            Ast::IfElse {
                cond,
                then,
                otherwise,
            } => {
                then.collect_names(out);
                cond.collect_names(out);
                otherwise.collect_names(out);
            }
        }
    }
}
