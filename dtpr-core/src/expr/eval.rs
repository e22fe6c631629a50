//! Tree-walking evaluator.

use std::cmp::Ordering;

use super::ast::{Ast, BinaryOp, Builtin, UnaryOp};
use crate::error::{Error, Result};
use crate::particle::Particle;
use crate::record::{Column, Record};
use crate::value::{Coercion, ParticleRef, Scalar, Value};

/// Names visible to an expression.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Attribute expressions: the attributes assigned so far, by bare name.
    Attributes(&'a Particle),
    /// Filters and sorters: `p`/`particle` and `ev`/`record`.
    Particle {
        particle: &'a Particle,
        record: &'a Record,
    },
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Result<Operand<'a>> {
        match *self {
            Scope::Attributes(particle) => particle
                .get(name)
                .map(|v| Operand::from(v.clone()))
                .map_err(|_| Error::Evaluation(format!("name '{name}' is not defined"))),
            Scope::Particle { particle, record } => match name {
                "p" | "particle" => Ok(Operand::Particle(particle)),
                "ev" | "record" => Ok(Operand::Record(record)),
                _ => Err(Error::Evaluation(format!("name '{name}' is not defined"))),
            },
        }
    }
}

/// Intermediate result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<'a> {
    Null,
    Scalar(Scalar),
    List(Vec<Scalar>),
    Nested(Vec<Vec<Scalar>>),
    Ref(ParticleRef),
    RefList(Vec<ParticleRef>),
    Particle(&'a Particle),
    Record(&'a Record),
}

impl From<Value> for Operand<'_> {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(s) => Operand::Scalar(s),
            Value::List(items) => Operand::List(items),
            Value::Ref(r) => Operand::Ref(r),
            Value::RefList(refs) => Operand::RefList(refs),
        }
    }
}

impl From<&Column> for Operand<'_> {
    fn from(column: &Column) -> Self {
        match column {
            Column::Scalar(s) => Operand::Scalar(s.clone()),
            Column::Vector(v) => Operand::List(v.clone()),
            Column::Nested(v) => Operand::Nested(v.clone()),
        }
    }
}

impl Operand<'_> {
    /// Python-style truthiness.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Operand::Null => false,
            Operand::Scalar(s) => s.truthy(),
            Operand::List(v) => !v.is_empty(),
            Operand::Nested(v) => !v.is_empty(),
            Operand::RefList(v) => !v.is_empty(),
            Operand::Ref(_) | Operand::Particle(_) | Operand::Record(_) => true,
        }
    }

    /// Converts the result into an attribute value.
    ///
    /// # Errors
    /// Returns an evaluation error for `None`, nested lists, particles and
    /// records.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Operand::Scalar(s) => Ok(Value::Scalar(s)),
            Operand::List(v) => Ok(Value::List(v)),
            Operand::Ref(r) => Ok(Value::Ref(r)),
            Operand::RefList(v) => Ok(Value::RefList(v)),
            other => Err(Error::Evaluation(format!(
                "{} cannot be stored as an attribute",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Operand::Null => "None",
            Operand::Scalar(s) => s.kind(),
            Operand::List(_) | Operand::Nested(_) => "list",
            Operand::Ref(_) => "particle reference",
            Operand::RefList(_) => "reference list",
            Operand::Particle(_) => "particle",
            Operand::Record(_) => "record",
        }
    }

    fn scalar(&self, context: &str) -> Result<&Scalar> {
        match self {
            Operand::Scalar(s) => Ok(s),
            other => Err(type_error(context, other)),
        }
    }
}

fn type_error(context: &str, operand: &Operand<'_>) -> Error {
    Error::Evaluation(format!(
        "unsupported operand type for {context}: {}",
        operand.kind()
    ))
}

/// Evaluates `ast` in `scope`.
///
/// # Errors
/// Returns [`Error::Evaluation`] for undefined names, type mismatches and
/// arithmetic faults, or a missing-attribute error for `p.<name>` lookups.
pub fn evaluate<'a>(ast: &Ast, scope: &Scope<'a>) -> Result<Operand<'a>> {
    match ast {
        Ast::Literal(s) => Ok(Operand::Scalar(s.clone())),
        Ast::None => Ok(Operand::Null),
        Ast::Name(name) => scope.lookup(name),
        Ast::List(items) => items
            .iter()
            .map(|item| {
                evaluate(item, scope)
                    .and_then(|v| v.scalar("list literal").cloned())
            })
            .collect::<Result<Vec<_>>>()
            .map(Operand::List),
        Ast::Member(base, name) => member(evaluate(base, scope)?, name),
        Ast::Index(base, index) => {
            let base = evaluate(base, scope)?;
            let index = evaluate(index, scope)?;
            subscript(base, &index)
        }
        Ast::Call(function, args) => {
            let args = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<Vec<_>>>()?;
            call(*function, args)
        }
        Ast::Unary(op, operand) => unary(*op, evaluate(operand, scope)?),
        Ast::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, scope)?;
            let rhs = evaluate(rhs, scope)?;
            binary(*op, &lhs, &rhs)
        }
        Ast::And(lhs, rhs) => {
            let lhs = evaluate(lhs, scope)?;
            if lhs.truthy() {
                evaluate(rhs, scope)
            } else {
                Ok(lhs)
            }
        }
        Ast::Or(lhs, rhs) => {
            let lhs = evaluate(lhs, scope)?;
            if lhs.truthy() {
                Ok(lhs)
            } else {
                evaluate(rhs, scope)
            }
        }
        Ast::IfElse {
            cond,
            then,
            otherwise,
        } => {
            if evaluate(cond, scope)?.truthy() {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
    }
}

fn member<'a>(base: Operand<'a>, name: &str) -> Result<Operand<'a>> {
    match base {
        Operand::Particle(p) => match name {
            "index" => Ok(Operand::Scalar(Scalar::Int(
                i64::try_from(p.index).unwrap_or(i64::MAX),
            ))),
            "name" => Ok(Operand::Scalar(Scalar::Str(p.name.clone()))),
            _ => Ok(Operand::from(p.get(name)?.clone())),
        },
        Operand::Record(r) => r
            .column(name)
            .map(Operand::from)
            .ok_or_else(|| Error::Evaluation(format!("record has no column '{name}'"))),
        other => Err(Error::Evaluation(format!(
            "{} has no attribute '{name}'",
            other.kind()
        ))),
    }
}

fn position(index: &Operand<'_>, len: usize) -> Result<usize> {
    let i = index
        .scalar("indexing")?
        .as_i64()
        .ok_or_else(|| Error::Evaluation("indices must be integers".to_string()))?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if i < 0 { i + len_i } else { i };
    usize::try_from(resolved)
        .ok()
        .filter(|&p| p < len)
        .ok_or_else(|| Error::Evaluation(format!("index {i} out of range for length {len}")))
}

fn subscript<'a>(base: Operand<'a>, index: &Operand<'_>) -> Result<Operand<'a>> {
    match base {
        Operand::List(mut v) => {
            let p = position(index, v.len())?;
            Ok(Operand::Scalar(v.swap_remove(p)))
        }
        Operand::Nested(mut v) => {
            let p = position(index, v.len())?;
            Ok(Operand::List(v.swap_remove(p)))
        }
        Operand::RefList(mut v) => {
            let p = position(index, v.len())?;
            Ok(Operand::Ref(v.swap_remove(p)))
        }
        Operand::Scalar(Scalar::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let p = position(index, chars.len())?;
            Ok(Operand::Scalar(Scalar::Str(chars[p].to_string())))
        }
        other => Err(type_error("indexing", &other)),
    }
}

fn unary<'a>(op: UnaryOp, operand: Operand<'a>) -> Result<Operand<'a>> {
    if op == UnaryOp::Not {
        return Ok(Operand::Scalar(Scalar::Bool(!operand.truthy())));
    }
    let value = match operand.scalar("unary minus")? {
        Scalar::Int(v) => Scalar::Int(if op == UnaryOp::Neg {
            v.checked_neg().ok_or_else(overflow)?
        } else {
            *v
        }),
        Scalar::Bool(b) => Scalar::Int(if op == UnaryOp::Neg {
            -i64::from(*b)
        } else {
            i64::from(*b)
        }),
        Scalar::Float(v) => Scalar::Float(if op == UnaryOp::Neg { -v } else { *v }),
        Scalar::Str(_) => return Err(type_error("unary minus", &operand)),
    };
    Ok(Operand::Scalar(value))
}

fn overflow() -> Error {
    Error::Evaluation("integer overflow".to_string())
}

/// Numeric view of a scalar: booleans act as integers.
enum Num {
    Int(i64),
    Float(f64),
}

fn num(s: &Scalar) -> Option<Num> {
    match s {
        Scalar::Bool(b) => Some(Num::Int(i64::from(*b))),
        Scalar::Int(v) => Some(Num::Int(*v)),
        Scalar::Float(v) => Some(Num::Float(*v)),
        Scalar::Str(_) => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(v) => *v as f64,
        Num::Float(v) => *v,
    }
}

fn binary<'a>(op: BinaryOp, lhs: &Operand<'a>, rhs: &Operand<'a>) -> Result<Operand<'a>> {
    let boolean = |b: bool| Ok(Operand::Scalar(Scalar::Bool(b)));
    match op {
        BinaryOp::Eq => boolean(lhs == rhs),
        BinaryOp::Ne => boolean(lhs != rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = (lhs.scalar("comparison")?, rhs.scalar("comparison")?);
            let ord = a.compare(b).ok_or_else(|| {
                Error::Evaluation(format!("cannot compare {} with {}", a.kind(), b.kind()))
            })?;
            boolean(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        BinaryOp::In => contains(rhs, lhs).map(Operand::Scalar),
        BinaryOp::NotIn => {
            let found = contains(rhs, lhs)?.truthy();
            boolean(!found)
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Operand::Scalar(Scalar::Str(a)), Operand::Scalar(Scalar::Str(b))) => {
                Ok(Operand::Scalar(Scalar::Str(format!("{a}{b}"))))
            }
            (Operand::List(a), Operand::List(b)) => {
                Ok(Operand::List(a.iter().chain(b).cloned().collect()))
            }
            _ => arithmetic(op, lhs, rhs),
        },
        _ => arithmetic(op, lhs, rhs),
    }
}

fn contains(haystack: &Operand<'_>, needle: &Operand<'_>) -> Result<Scalar> {
    let found = match (haystack, needle) {
        (Operand::List(items), Operand::Scalar(s)) => items.contains(s),
        (Operand::Nested(items), Operand::List(l)) => items.contains(l),
        (Operand::RefList(items), Operand::Ref(r)) => items.contains(r),
        (Operand::Scalar(Scalar::Str(h)), Operand::Scalar(Scalar::Str(n))) => h.contains(n.as_str()),
        (Operand::List(_) | Operand::Nested(_) | Operand::RefList(_), _) => false,
        (other, _) => return Err(type_error("'in'", other)),
    };
    Ok(Scalar::Bool(found))
}

fn arithmetic<'a>(op: BinaryOp, lhs: &Operand<'a>, rhs: &Operand<'a>) -> Result<Operand<'a>> {
    let context = "arithmetic";
    let (a, b) = match (num(lhs.scalar(context)?), num(rhs.scalar(context)?)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(Error::Evaluation(format!(
                "unsupported operand types for arithmetic: {} and {}",
                lhs.kind(),
                rhs.kind()
            )))
        }
    };
    let result = match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_arithmetic(op, x, y)?,
        (a, b) => Scalar::Float(float_arithmetic(op, to_f64(&a), to_f64(&b))?),
    };
    Ok(Operand::Scalar(result))
}

fn zero_division() -> Error {
    Error::Evaluation("division by zero".to_string())
}

#[allow(clippy::cast_precision_loss)]
fn int_arithmetic(op: BinaryOp, x: i64, y: i64) -> Result<Scalar> {
    Ok(Scalar::Int(match op {
        BinaryOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinaryOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinaryOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinaryOp::Div => {
            if y == 0 {
                return Err(zero_division());
            }
            return Ok(Scalar::Float(x as f64 / y as f64));
        }
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(zero_division());
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
        BinaryOp::Pow => match u32::try_from(y) {
            Ok(e) => x.checked_pow(e).ok_or_else(overflow)?,
            Err(_) if y < 0 => return Ok(Scalar::Float((x as f64).powf(y as f64))),
            Err(_) => return Err(overflow()),
        },
        _ => return Err(Error::Evaluation(format!("{op:?} is not arithmetic"))),
    }))
}

fn float_arithmetic(op: BinaryOp, x: f64, y: f64) -> Result<f64> {
    Ok(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if y == 0.0 => {
            return Err(zero_division())
        }
        BinaryOp::Div => x / y,
        BinaryOp::FloorDiv => (x / y).floor(),
        BinaryOp::Mod => x - y * (x / y).floor(),
        BinaryOp::Pow => x.powf(y),
        _ => return Err(Error::Evaluation(format!("{op:?} is not arithmetic"))),
    })
}

fn float_arg(args: &[Operand<'_>], function: &str) -> Result<f64> {
    args.first()
        .ok_or_else(|| Error::Evaluation(format!("{function}() missing argument")))?
        .scalar(function)?
        .as_f64()
        .ok_or_else(|| Error::Evaluation(format!("{function}() requires a number")))
}

fn math(value: f64, function: &str) -> Result<Operand<'static>> {
    if value.is_nan() {
        return Err(Error::Evaluation(format!("{function}(): math domain error")));
    }
    Ok(Operand::Scalar(Scalar::Float(value)))
}

/// Elements a reducing builtin iterates over: a single list argument or the
/// argument list itself.
fn elements(args: Vec<Operand<'_>>, function: &str) -> Result<Vec<Scalar>> {
    if args.len() == 1 {
        if let Some(Operand::List(items)) = args.first() {
            return Ok(items.clone());
        }
    }
    args.iter()
        .map(|a| a.scalar(function).cloned())
        .collect()
}

fn extreme(items: Vec<Scalar>, keep: Ordering, function: &str) -> Result<Operand<'static>> {
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| Error::Evaluation(format!("{function}() arg is an empty sequence")))?;
    for item in iter {
        let ord = item.compare(&best).ok_or_else(|| {
            Error::Evaluation(format!(
                "{function}(): cannot compare {} with {}",
                item.kind(),
                best.kind()
            ))
        })?;
        if ord == keep {
            best = item;
        }
    }
    Ok(Operand::Scalar(best))
}

fn call<'a>(function: Builtin, args: Vec<Operand<'a>>) -> Result<Operand<'a>> {
    let single = |coercion: Coercion, args: &[Operand<'a>]| -> Result<Operand<'a>> {
        let arg = args.first().cloned().unwrap_or(Operand::Null);
        let value = arg.into_value()?;
        Ok(Operand::from(coercion.apply("expression", value)?))
    };
    match function {
        Builtin::Abs => match args.first().map(|a| a.scalar("abs()")).transpose()? {
            Some(Scalar::Int(v)) => Ok(Operand::Scalar(Scalar::Int(
                v.checked_abs().ok_or_else(overflow)?,
            ))),
            _ => math(float_arg(&args, "abs")?.abs(), "abs"),
        },
        Builtin::Len => {
            let len = match args.first() {
                Some(Operand::List(v)) => v.len(),
                Some(Operand::Nested(v)) => v.len(),
                Some(Operand::RefList(v)) => v.len(),
                Some(Operand::Scalar(Scalar::Str(s))) => s.chars().count(),
                Some(other) => return Err(type_error("len()", other)),
                None => 0,
            };
            Ok(Operand::Scalar(Scalar::Int(
                i64::try_from(len).unwrap_or(i64::MAX),
            )))
        }
        Builtin::Min => extreme(elements(args, "min")?, Ordering::Less, "min"),
        Builtin::Max => extreme(elements(args, "max")?, Ordering::Greater, "max"),
        Builtin::Sum => {
            let items = elements(args, "sum")?;
            if items.iter().all(|s| matches!(s, Scalar::Int(_) | Scalar::Bool(_))) {
                let total = items
                    .iter()
                    .filter_map(Scalar::as_i64)
                    .try_fold(0i64, i64::checked_add)
                    .ok_or_else(overflow)?;
                return Ok(Operand::Scalar(Scalar::Int(total)));
            }
            items
                .iter()
                .map(|s| {
                    s.as_f64()
                        .ok_or_else(|| Error::Evaluation("sum() requires numbers".to_string()))
                })
                .sum::<Result<f64>>()
                .map(|t| Operand::Scalar(Scalar::Float(t)))
        }
        Builtin::Int => single(Coercion::Int, &args),
        Builtin::Float => single(Coercion::Float, &args),
        Builtin::Str => single(Coercion::Str, &args),
        Builtin::Bool => Ok(Operand::Scalar(Scalar::Bool(
            args.first().is_some_and(Operand::truthy),
        ))),
        Builtin::Round => round(&args),
        Builtin::Sqrt => math(float_arg(&args, "sqrt")?.sqrt(), "sqrt"),
        Builtin::Cos => math(float_arg(&args, "cos")?.cos(), "cos"),
        Builtin::Sin => math(float_arg(&args, "sin")?.sin(), "sin"),
        Builtin::Acos => math(float_arg(&args, "acos")?.acos(), "acos"),
        Builtin::Exp => math(float_arg(&args, "exp")?.exp(), "exp"),
        Builtin::Log => math(float_arg(&args, "log")?.ln(), "log"),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round(args: &[Operand<'_>]) -> Result<Operand<'static>> {
    let x = float_arg(args, "round")?;
    match args.get(1) {
        None => {
            let r = x.round_ties_even();
            if !r.is_finite() {
                return Err(Error::Evaluation("round(): cannot convert to integer".into()));
            }
            Ok(Operand::Scalar(Scalar::Int(r as i64)))
        }
        Some(digits) => {
            let digits = digits
                .scalar("round()")?
                .as_i64()
                .and_then(|d| i32::try_from(d).ok())
                .ok_or_else(|| Error::Evaluation("round() digits must be an integer".into()))?;
            let scale = 10f64.powi(digits);
            Ok(Operand::Scalar(Scalar::Float((x * scale).round_ties_even() / scale)))
        }
    }
}
