//! Events: particle collections and scalar fields of one record.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::particle::{Particle, IDENTITY_FIELDS};
use crate::value::{ParticleRef, Value};

/// What an assignment to an event name stores.
///
/// Particles are routed into the collection map; everything else becomes a
/// scalar field.
#[derive(Debug, Clone)]
pub enum Assignment {
    Particle(Particle),
    Particles(Vec<Particle>),
    Value(Value),
}

impl From<Particle> for Assignment {
    fn from(p: Particle) -> Self {
        Assignment::Particle(p)
    }
}

impl From<Vec<Particle>> for Assignment {
    fn from(p: Vec<Particle>) -> Self {
        Assignment::Particles(p)
    }
}

macro_rules! assignment_from_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Assignment {
            fn from(v: $t) -> Self {
                Assignment::Value(Value::from(v))
            }
        })*
    };
}

assignment_from_value!(
    Value,
    bool,
    i64,
    i32,
    f64,
    &str,
    String,
    crate::value::Scalar,
    Vec<crate::value::Scalar>,
    ParticleRef,
    Vec<ParticleRef>
);

/// All particles and derived fields for one detector readout.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Position of the record in the source.
    pub index: usize,
    /// Event number; the index when the record carries none.
    pub number: i64,
    collections: Vec<(String, Vec<Particle>)>,
    fields: Vec<(String, Value)>,
}

impl Event {
    /// Creates an empty event.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            number: i64::try_from(index).unwrap_or(i64::MAX),
            collections: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Assigns a name: particles go to the collection map, values to fields.
    pub fn set(&mut self, name: &str, value: impl Into<Assignment>) {
        match value.into() {
            Assignment::Particle(p) => self.set_collection(name, vec![p]),
            Assignment::Particles(ps) => self.set_collection(name, ps),
            Assignment::Value(v) => match self.fields.iter_mut().find(|(k, _)| k == name) {
                Some((_, slot)) => *slot = v,
                None => self.fields.push((name.to_string(), v)),
            },
        }
    }

    fn set_collection(&mut self, name: &str, particles: Vec<Particle>) {
        match self.collections.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = particles,
            None => self.collections.push((name.to_string(), particles)),
        }
    }

    /// Looks up a scalar field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Iterates over scalar fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Looks up a particle collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&[Particle]> {
        self.collections
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v.as_slice()))
    }

    /// Looks up a particle collection for mutation.
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut Vec<Particle>> {
        self.collections
            .iter_mut()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Looks up a collection that an algorithm cannot run without.
    ///
    /// # Errors
    /// Returns [`Error::MissingCollection`] if it is absent.
    pub fn require(&self, name: &str) -> Result<&[Particle]> {
        self.collection(name)
            .ok_or_else(|| Error::MissingCollection(name.to_string()))
    }

    /// Iterates over `(type name, particles)` in build order.
    pub fn collections(&self) -> impl Iterator<Item = (&str, &[Particle])> {
        self.collections
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Resolves a reference.
    #[must_use]
    pub fn particle(&self, r: &ParticleRef) -> Option<&Particle> {
        self.collection(&r.collection)?.get(r.position)
    }

    /// Resolves a reference for mutation.
    pub fn particle_mut(&mut self, r: &ParticleRef) -> Option<&mut Particle> {
        self.collection_mut(&r.collection)?.get_mut(r.position)
    }

    /// Resolves every reference held by `attribute` of `particle`.
    ///
    /// # Errors
    /// Returns an error if the attribute is not a reference list or a
    /// reference dangles.
    pub fn resolve_refs<'a>(
        &'a self,
        particle: &Particle,
        attribute: &str,
    ) -> Result<Vec<&'a Particle>> {
        particle
            .refs(attribute)?
            .iter()
            .map(|r| self.particle(r).ok_or_else(|| dangling(r)))
            .collect()
    }

    /// Records a bidirectional, de-duplicated reference between two
    /// particles: `a.a_attr` gains `b` and `b.b_attr` gains `a`.
    ///
    /// # Errors
    /// Returns an error if either reference dangles or either attribute holds
    /// non-reference data.
    pub fn link(
        &mut self,
        a: &ParticleRef,
        a_attr: &str,
        b: &ParticleRef,
        b_attr: &str,
    ) -> Result<()> {
        self.particle_mut(a)
            .ok_or_else(|| dangling(a))?
            .push_ref(a_attr, b.clone())?;
        self.particle_mut(b)
            .ok_or_else(|| dangling(b))?
            .push_ref(b_attr, a.clone())?;
        Ok(())
    }

    /// Particles of `type_name` whose attributes equal every constraint.
    ///
    /// An unknown type logs a warning and yields nothing; a known but empty
    /// type yields nothing silently.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFilterKey`] naming the valid keys when a
    /// constraint names an attribute no particle of the type carries.
    pub fn filter_particles(
        &self,
        type_name: &str,
        constraints: &[(&str, Value)],
    ) -> Result<Vec<&Particle>> {
        let Some(particles) = self.collection(type_name) else {
            log::warn!(
                "Invalid particle type {type_name} to apply filter. Valid types are: {:?}",
                self.collections.iter().map(|(k, _)| k).collect::<Vec<_>>()
            );
            return Ok(Vec::new());
        };
        if particles.is_empty() {
            return Ok(Vec::new());
        }

        let valid: BTreeSet<&str> = particles.iter().flat_map(Particle::keys).collect();
        if let Some((key, _)) = constraints
            .iter()
            .find(|(k, _)| IDENTITY_FIELDS.contains(k) || !valid.contains(k))
        {
            return Err(Error::InvalidFilterKey {
                key: (*key).to_string(),
                valid: valid.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(particles
            .iter()
            .filter(|p| constraints.iter().all(|(k, v)| p.attr(k) == Some(v)))
            .collect())
    }

    /// Flattens the event into JSON: identity, fields, then one list of
    /// particle objects per collection.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("index".into(), serde_json::Value::from(self.index));
        map.insert("number".into(), serde_json::Value::from(self.number));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        for (k, particles) in &self.collections {
            map.insert(
                k.clone(),
                particles.iter().map(Particle::to_json).collect(),
            );
        }
        serde_json::Value::Object(map)
    }
}

fn dangling(r: &ParticleRef) -> Error {
    Error::DanglingRef {
        collection: r.collection.clone(),
        position: r.position,
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------ Event {} info ------", self.number)?;
        writeln!(f, "  Index: {}", self.index)?;
        for (k, v) in &self.fields {
            writeln!(f, "  {k}: {v}")?;
        }
        for (k, particles) in &self.collections {
            writeln!(f, "  {k}")?;
            writeln!(f, "    Number of {k}: {}", particles.len())?;
        }
        Ok(())
    }
}
