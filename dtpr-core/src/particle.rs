//! Particles: typed entities with a dynamic, ordered attribute set.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::value::{ParticleRef, Scalar, Value};

/// Names reserved for particle identity; never stored as attributes.
pub const IDENTITY_FIELDS: [&str; 2] = ["index", "name"];

/// One reconstructed or generated physics object.
///
/// `index` and `name` identify the particle but never take part in equality,
/// hashing or filtering. Attributes keep their insertion order for display
/// and serialization; equality ignores that order.
#[derive(Debug, Clone, Default)]
pub struct Particle {
    /// Position of the particle when it was built.
    pub index: usize,
    /// Type tag (e.g. `Segment`).
    pub name: String,
    attributes: Vec<(String, Value)>,
}

impl Particle {
    /// Creates a particle without attributes.
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Sets an attribute, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets an attribute, keeping its position if it already exists.
    ///
    /// # Panics
    /// Panics if `key` is an identity field; those are plain struct fields.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        assert!(
            !IDENTITY_FIELDS.contains(&key),
            "'{key}' is an identity field, not an attribute"
        );
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// Removes an attribute, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(pos).1)
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Returns true if the attribute exists.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }

    /// Looks up an attribute, failing with a typed error on miss.
    ///
    /// # Errors
    /// Returns [`Error::MissingAttribute`] if the attribute is absent.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.attr(key).ok_or_else(|| Error::MissingAttribute {
            particle: self.label(),
            attribute: key.to_string(),
        })
    }

    fn get_scalar(&self, key: &str, expected: &'static str) -> Result<&Scalar> {
        self.get(key)?
            .as_scalar()
            .ok_or_else(|| self.type_error(key, expected))
    }

    fn type_error(&self, key: &str, expected: &'static str) -> Error {
        Error::AttributeType {
            particle: self.label(),
            attribute: key.to_string(),
            expected,
        }
    }

    /// Reads a numeric attribute as `f64`.
    ///
    /// # Errors
    /// Returns an error if the attribute is missing or not numeric.
    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.get_scalar(key, "a number")?
            .as_f64()
            .ok_or_else(|| self.type_error(key, "a number"))
    }

    /// Reads an integral attribute as `i64`.
    ///
    /// # Errors
    /// Returns an error if the attribute is missing or not an integer.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.get_scalar(key, "an integer")?
            .as_i64()
            .ok_or_else(|| self.type_error(key, "an integer"))
    }

    /// Reads an attribute's truthiness.
    ///
    /// # Errors
    /// Returns an error if the attribute is missing.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.truthy())
    }

    /// Reads a reference attribute. A missing attribute yields no references.
    ///
    /// # Errors
    /// Returns an error if the attribute holds non-reference data.
    pub fn refs(&self, key: &str) -> Result<&[ParticleRef]> {
        match self.attr(key) {
            None => Ok(&[]),
            Some(v) => v
                .as_refs()
                .ok_or_else(|| self.type_error(key, "a particle reference list")),
        }
    }

    /// Appends a reference, skipping it if already present.
    ///
    /// Returns true if the reference was added.
    ///
    /// # Errors
    /// Returns an error if the attribute holds non-reference data.
    pub fn push_ref(&mut self, key: &str, target: ParticleRef) -> Result<bool> {
        let mut refs = self.refs(key)?.to_vec();
        if refs.contains(&target) {
            return Ok(false);
        }
        refs.push(target);
        self.set(key, Value::RefList(refs));
        Ok(true)
    }

    /// Iterates over attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over attribute names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(k, _)| k.as_str())
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if the particle has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Serializes the particle, identity fields first.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("index".into(), serde_json::Value::from(self.index));
        map.insert("name".into(), serde_json::Value::from(self.name.clone()));
        for (k, v) in &self.attributes {
            map.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }

    fn label(&self) -> String {
        format!("{} {}", self.name, self.index)
    }

    /// Renders a summary limited to the given attributes.
    #[must_use]
    pub fn summary(&self, include: Option<&[&str]>, exclude: &[&str]) -> String {
        let properties: Vec<String> = self
            .attributes
            .iter()
            .filter(|(k, _)| include.is_none_or(|inc| inc.contains(&k.as_str())))
            .filter(|(k, _)| !exclude.contains(&k.as_str()))
            .map(|(k, v)| format!("{}: {v}", capitalize(k)))
            .collect();
        format!("{} {} info -->\n  {}", self.name, self.index, properties.join(", "))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl PartialEq for Particle {
    fn eq(&self, other: &Self) -> bool {
        self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(k, v)| other.attr(k) == Some(v))
    }
}

impl Eq for Particle {}

impl Hash for Particle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order-independent: combine per-pair hashes commutatively.
        let mut combined = 0u64;
        for (k, v) in &self.attributes {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            v.hash(&mut h);
            combined = combined.wrapping_add(h.finish());
        }
        self.attributes.len().hash(state);
        combined.hash(state);
    }
}

impl fmt::Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary(None, &[]))
    }
}
