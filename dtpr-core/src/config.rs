//! Run configuration schema.
//!
//! The configuration declares which particle types to build from each record,
//! how to derive their attributes, and which selectors and preprocessors make
//! up the event pipeline. Every table keeps its declaration order, since
//! attribute expressions may only see attributes declared before them.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::value::{Coercion, Value};

/// Keyword arguments bound to a registered callable.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Deserializes keyword arguments into a typed configuration.
///
/// # Errors
/// Returns [`Error::Config`] when the arguments do not fit `T`.
pub fn parse_kwargs<T: DeserializeOwned>(kwargs: &Kwargs) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(kwargs.clone()))
        .map_err(|e| Error::Config(format!("invalid kwargs: {e}")))
}

/// A name → entry table that preserves declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedTable<T>(Vec<(String, T)>);

impl<T> Default for OrderedTable<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> OrderedTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry; an existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for OrderedTable<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedTable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TableVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for TableVisitor<T> {
            type Value = OrderedTable<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(OrderedTable::new())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut table = OrderedTable::new();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    table.insert(key, value);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_any(TableVisitor(PhantomData))
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Record column holding the event number.
    #[serde(default)]
    pub event_number_column: Option<String>,
    #[serde(default)]
    pub particle_types: OrderedTable<ParticleTypeConfig>,
    #[serde(default)]
    pub selectors: OrderedTable<StageConfig>,
    #[serde(default)]
    pub preprocessors: OrderedTable<StageConfig>,
}

impl RunConfig {
    /// Deserializes a configuration from an already-parsed document.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the document does not match the schema.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))
    }
}

/// How to build one particle type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticleTypeConfig {
    /// Dotted identifier of a registered particle class.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub attributes: OrderedTable<AttributeConfig>,
    #[serde(default)]
    pub amount: Option<Amount>,
    /// Expression over `p`/`ev`; falsy particles are dropped.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sorter: Option<SorterConfig>,
}

/// Number of particles of a type in each record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Count(usize),
    /// Scalar column giving the count, or vector column giving it by length.
    Column(String),
}

/// Post-build ordering.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SorterConfig {
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub reverse: bool,
}

/// One attribute of a particle type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum AttributeConfig {
    /// Same value for every particle.
    Constant(Value),
    Spec(AttributeSpec),
}

impl TryFrom<serde_json::Value> for AttributeConfig {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::Object(_) => serde_json::from_value(value)
                .map(AttributeConfig::Spec)
                .map_err(|e| format!("invalid attribute spec: {e}")),
            other => Value::from_json(&other)
                .map(AttributeConfig::Constant)
                .map_err(|e| e.to_string()),
        }
    }
}

/// Attribute derivation: exactly one of `branch`, `expr` or `src`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeSpec {
    /// Record column to read.
    #[serde(default)]
    pub branch: Option<String>,
    /// Expression over previously assigned attributes.
    #[serde(default)]
    pub expr: Option<String>,
    /// Dotted identifier of a registered attribute function.
    #[serde(default)]
    pub src: Option<String>,
    /// Coercion applied to the derived value.
    #[serde(default, rename = "type")]
    pub coercion: Option<Coercion>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// A selector or preprocessor entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub src: String,
    #[serde(default)]
    pub kwargs: Kwargs,
}
