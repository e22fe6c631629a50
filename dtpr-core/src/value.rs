//! Attribute value types.
//!
//! Every particle attribute is a [`Value`]: a scalar, a list of scalars, a
//! reference to another particle of the same event, or a list of such
//! references. Integers and floats compare numerically with each other, and
//! hashing agrees with that equality.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single attribute scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Returns the numeric value, if this scalar is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer value, if this scalar is an integer or an
    /// integral float.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Float(v) => integral_float(*v),
            _ => None,
        }
    }

    /// Python-style truthiness.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(v) => *v != 0,
            Scalar::Float(v) => *v != 0.0,
            Scalar::Str(s) => !s.is_empty(),
        }
    }

    /// Name of the scalar kind, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "str",
        }
    }

    /// Total order over mutually comparable scalars.
    ///
    /// Numbers compare numerically (NaN sorts last), strings lexically and
    /// booleans `false < true`. Returns `None` across kinds.
    #[must_use]
    pub fn compare(&self, other: &Scalar) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (a, b) => Some(a.as_f64()?.total_cmp(&b.as_f64()?)),
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn integral_float(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::Int(i), Scalar::Float(f)) | (Scalar::Float(f), Scalar::Int(i)) => {
                integral_float(*f) == Some(*i)
            }
            _ => false,
        }
    }
}

// NaN is treated as equal to itself, which keeps the relation reflexive.
impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Scalar::Bool(b) => {
                0u8.hash(state);
                b.hash(state);
            }
            Scalar::Int(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Scalar::Float(f) => match integral_float(*f) {
                Some(v) => {
                    1u8.hash(state);
                    v.hash(state);
                }
                None if f.is_nan() => 2u8.hash(state),
                None => {
                    3u8.hash(state);
                    f.to_bits().hash(state);
                }
            },
            Scalar::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(true) => write!(f, "True"),
            Scalar::Bool(false) => write!(f, "False"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// Weak reference to a particle of the same event: `(collection, position)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleRef {
    /// Name of the particle collection (e.g. `segments`).
    pub collection: String,
    /// Position within that collection.
    pub position: usize,
}

impl ParticleRef {
    /// Creates a new reference.
    pub fn new(collection: impl Into<String>, position: usize) -> Self {
        Self {
            collection: collection.into(),
            position,
        }
    }
}

impl fmt::Display for ParticleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.collection, self.position)
    }
}

/// A particle attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Scalar(Scalar),
    List(Vec<Scalar>),
    Ref(ParticleRef),
    RefList(Vec<ParticleRef>),
}

impl Value {
    /// Returns the scalar, if this value is one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the references held by this value. An empty plain list is
    /// treated as an empty reference list.
    #[must_use]
    pub fn as_refs(&self) -> Option<&[ParticleRef]> {
        match self {
            Value::Ref(r) => Some(std::slice::from_ref(r)),
            Value::RefList(refs) => Some(refs),
            Value::List(items) if items.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Python-style truthiness.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Scalar(s) => s.truthy(),
            Value::List(items) => !items.is_empty(),
            Value::Ref(_) => true,
            Value::RefList(refs) => !refs.is_empty(),
        }
    }

    /// Flattens the value into JSON; references become their positions.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(s) => scalar_to_json(s),
            Value::List(items) => items.iter().map(scalar_to_json).collect(),
            Value::Ref(r) => serde_json::Value::from(r.position),
            Value::RefList(refs) => refs
                .iter()
                .map(|r| serde_json::Value::from(r.position))
                .collect(),
        }
    }

    /// Converts a JSON value (e.g. a constant from the run configuration).
    ///
    /// # Errors
    /// Returns a configuration error for objects, nulls and nested arrays.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(scalar_from_json)
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => scalar_from_json(other).map(Value::Scalar),
        }
    }
}

pub(crate) fn scalar_to_json(s: &Scalar) -> serde_json::Value {
    match s {
        Scalar::Bool(b) => serde_json::Value::Bool(*b),
        Scalar::Int(v) => serde_json::Value::from(*v),
        Scalar::Float(v) => serde_json::Number::from_f64(*v)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Scalar::Str(s) => serde_json::Value::String(s.clone()),
    }
}

pub(crate) fn scalar_from_json(value: &serde_json::Value) -> Result<Scalar> {
    match value {
        serde_json::Value::Bool(b) => Ok(Scalar::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| n.as_f64().map(Scalar::Float))
            .ok_or_else(|| Error::Config(format!("unrepresentable number {n}"))),
        serde_json::Value::String(s) => Ok(Scalar::Str(s.clone())),
        other => Err(Error::Config(format!("expected a scalar, got {other}"))),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        }
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::List(items) => join(f, items),
            Value::Ref(r) => write!(f, "{r}"),
            Value::RefList(refs) => join(f, refs),
        }
    }
}

macro_rules! value_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Scalar(v.into())
                }
            }
        )*
    };
}

value_from_scalar!(bool, i64, i32, f64, &str, String);

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<Scalar>> for Value {
    fn from(v: Vec<Scalar>) -> Self {
        Value::List(v)
    }
}

impl From<ParticleRef> for Value {
    fn from(v: ParticleRef) -> Self {
        Value::Ref(v)
    }
}

impl From<Vec<ParticleRef>> for Value {
    fn from(v: Vec<ParticleRef>) -> Self {
        Value::RefList(v)
    }
}

/// Target of a `type` coercion in an attribute spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coercion {
    Int,
    Float,
    Bool,
    Str,
}

impl Coercion {
    fn name(self) -> &'static str {
        match self {
            Coercion::Int => "int",
            Coercion::Float => "float",
            Coercion::Bool => "bool",
            Coercion::Str => "str",
        }
    }

    /// Coerces a scalar, or every element of a list.
    ///
    /// # Errors
    /// Returns [`Error::Coercion`] when a string does not parse or a
    /// reference is coerced.
    pub fn apply(self, attribute: &str, value: Value) -> Result<Value> {
        match value {
            Value::Scalar(s) => self.apply_scalar(attribute, s).map(Value::Scalar),
            Value::List(items) => items
                .into_iter()
                .map(|s| self.apply_scalar(attribute, s))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Err(self.error(attribute, &other.to_string())),
        }
    }

    fn error(self, attribute: &str, value: &str) -> Error {
        Error::Coercion {
            attribute: attribute.to_string(),
            target: self.name(),
            value: value.to_string(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn apply_scalar(self, attribute: &str, s: Scalar) -> Result<Scalar> {
        let fail = |s: &Scalar| self.error(attribute, &s.to_string());
        Ok(match (self, s) {
            (Coercion::Int, Scalar::Int(v)) => Scalar::Int(v),
            (Coercion::Int, Scalar::Float(v)) if v.is_finite() => Scalar::Int(v.trunc() as i64),
            (Coercion::Int, Scalar::Bool(b)) => Scalar::Int(i64::from(b)),
            (Coercion::Int, Scalar::Str(ref text)) => match text.trim().parse::<i64>() {
                Ok(v) => Scalar::Int(v),
                Err(_) => return Err(fail(&Scalar::Str(text.clone()))),
            },
            (Coercion::Float, Scalar::Int(v)) => Scalar::Float(v as f64),
            (Coercion::Float, Scalar::Float(v)) => Scalar::Float(v),
            (Coercion::Float, Scalar::Bool(b)) => Scalar::Float(if b { 1.0 } else { 0.0 }),
            (Coercion::Float, Scalar::Str(ref text)) => match text.trim().parse::<f64>() {
                Ok(v) => Scalar::Float(v),
                Err(_) => return Err(fail(&Scalar::Str(text.clone()))),
            },
            (Coercion::Bool, s) => Scalar::Bool(s.truthy()),
            (Coercion::Str, Scalar::Str(text)) => Scalar::Str(text),
            (Coercion::Str, Scalar::Bool(b)) => Scalar::Str(if b { "True" } else { "False" }.into()),
            (Coercion::Str, Scalar::Int(v)) => Scalar::Str(v.to_string()),
            (Coercion::Str, Scalar::Float(v)) => Scalar::Str(v.to_string()),
            (_, s) => return Err(fail(&s)),
        })
    }
}
