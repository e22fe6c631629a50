//! Schema compilation and particle construction.
//!
//! A [`RunConfig`] is compiled once into an [`EventSchema`]: every dotted
//! identifier is resolved, every expression parsed and every attribute spec
//! validated before the first record is read. The schema then builds events
//! record by record.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::config::{Amount, AttributeConfig, ParticleTypeConfig, RunConfig};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::expr::{Expression, Scope};
use crate::particle::{Particle, IDENTITY_FIELDS};
use crate::record::{Column, Record};
use crate::registry::{AttributeFn, FinalizeFn, Registry};
use crate::value::{Coercion, Value};

/// Names visible to filter and sorter expressions.
const PARTICLE_SCOPE: [&str; 4] = ["p", "particle", "ev", "record"];

enum Source {
    Constant(Value),
    Branch(String),
    Expr(Expression),
    Function { path: String, func: AttributeFn },
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Constant(v) => write!(f, "Constant({v})"),
            Source::Branch(b) => write!(f, "Branch({b})"),
            Source::Expr(e) => write!(f, "Expr({e})"),
            Source::Function { path, .. } => write!(f, "Function({path})"),
        }
    }
}

#[derive(Debug)]
struct AttributeRule {
    name: String,
    source: Source,
    coercion: Option<Coercion>,
}

#[derive(Debug)]
struct Sorter {
    by: Expression,
    reverse: bool,
}

/// Builds the particles of one type from a record.
#[derive(Debug)]
pub struct ParticleBuilder {
    type_name: String,
    particle_name: String,
    defaults: Vec<(String, Value)>,
    finalize: Option<FinalizeFn>,
    rules: Vec<AttributeRule>,
    amount: Amount,
    filter: Option<Expression>,
    sorter: Option<Sorter>,
}

/// Default particle name for a type: the type name capitalized with its last
/// character dropped, `genmuons` → `Genmuon`.
///
/// The last character goes whether or not it is a plural `s`.
#[must_use]
pub fn default_particle_name(type_name: &str) -> String {
    let mut chars = type_name.chars();
    chars.next_back();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

impl ParticleBuilder {
    /// Validates and compiles one particle type.
    ///
    /// # Errors
    /// Returns a configuration, unresolved-path or expression error.
    pub fn compile(
        type_name: &str,
        config: &ParticleTypeConfig,
        registry: &Registry,
    ) -> Result<Self> {
        let config_error =
            |message: String| Error::Config(format!("particle type '{type_name}': {message}"));

        let amount = config
            .amount
            .clone()
            .ok_or_else(|| config_error("no amount of instances to build".to_string()))?;

        let (particle_name, defaults, finalize) = match &config.class {
            Some(path) => {
                let class = registry.class(path)?;
                (class.name.clone(), class.defaults.clone(), class.finalize)
            }
            None => (default_particle_name(type_name), Vec::new(), None),
        };

        let mut assigned: HashSet<String> = defaults.iter().map(|(k, _)| k.clone()).collect();
        let mut rules = Vec::with_capacity(config.attributes.len());
        for (name, attribute) in config.attributes.iter() {
            if IDENTITY_FIELDS.contains(&name) {
                return Err(config_error(format!(
                    "'{name}' is reserved and cannot be an attribute"
                )));
            }
            let rule = match attribute {
                AttributeConfig::Constant(value) => AttributeRule {
                    name: name.to_string(),
                    source: Source::Constant(value.clone()),
                    coercion: None,
                },
                AttributeConfig::Spec(spec) => {
                    if !spec.kwargs.is_empty() && spec.src.is_none() {
                        return Err(config_error(format!(
                            "attribute '{name}' has kwargs but no 'src'"
                        )));
                    }
                    let source = match (&spec.branch, &spec.expr, &spec.src) {
                        (Some(branch), None, None) => Source::Branch(branch.clone()),
                        (None, Some(expr), None) => {
                            let expr = Expression::compile(expr)?;
                            expr.check_names(|n| assigned.contains(n))?;
                            Source::Expr(expr)
                        }
                        (None, None, Some(path)) => Source::Function {
                            path: path.clone(),
                            func: registry.attribute(path, &spec.kwargs)?,
                        },
                        (branch, expr, src) => {
                            let given = [branch, expr, src].iter().filter(|s| s.is_some()).count();
                            return Err(config_error(format!(
                                "attribute '{name}' must define exactly one of 'branch', 'expr' or 'src', found {given}"
                            )));
                        }
                    };
                    AttributeRule {
                        name: name.to_string(),
                        source,
                        coercion: spec.coercion,
                    }
                }
            };
            assigned.insert(name.to_string());
            rules.push(rule);
        }

        let filter = config
            .filter
            .as_deref()
            .map(compile_particle_expression)
            .transpose()?;

        let sorter = match &config.sorter {
            None => None,
            Some(sorter) => {
                let by = sorter
                    .by
                    .as_deref()
                    .ok_or_else(|| config_error("sorter must contain a 'by' key".to_string()))?;
                Some(Sorter {
                    by: compile_particle_expression(by)?,
                    reverse: sorter.reverse,
                })
            }
        };

        Ok(Self {
            type_name: type_name.to_string(),
            particle_name,
            defaults,
            finalize,
            rules,
            amount,
            filter,
            sorter,
        })
    }

    /// Name of the collection this builder fills.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Name given to built particles.
    #[must_use]
    pub fn particle_name(&self) -> &str {
        &self.particle_name
    }

    /// Number of particles described by `record`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the amount column is missing or is not a
    /// non-negative integer.
    pub fn amount(&self, record: &Record, record_index: usize) -> Result<usize> {
        let column = match &self.amount {
            Amount::Count(n) => return Ok(*n),
            Amount::Column(column) => column,
        };
        match record.column(column) {
            None => Err(Error::Config(format!(
                "amount column '{column}' of particle type '{}' not found in record {record_index}",
                self.type_name
            ))),
            Some(Column::Scalar(s)) => s
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "amount column '{column}' holds {s}, not a non-negative integer"
                    ))
                }),
            Some(c) => Ok(c.len()),
        }
    }

    /// Builds particle `index` without filtering.
    ///
    /// # Errors
    /// Propagates column, coercion and evaluation errors.
    pub fn build_one(&self, record: &Record, record_index: usize, index: usize) -> Result<Particle> {
        let mut particle = Particle::new(index, self.particle_name.as_str());
        for (key, value) in &self.defaults {
            particle.set(key, value.clone());
        }
        for rule in &self.rules {
            let value = match &rule.source {
                Source::Constant(value) => value.clone(),
                Source::Branch(column) => record
                    .column(column)
                    .ok_or_else(|| Error::MissingColumn {
                        column: column.clone(),
                        record: record_index,
                    })?
                    .value_at(column, index)?,
                Source::Expr(expr) => expr.value(&Scope::Attributes(&particle))?,
                Source::Function { func, .. } => func(&particle)?,
            };
            let value = match rule.coercion {
                Some(coercion) => coercion.apply(&rule.name, value)?,
                None => value,
            };
            particle.set(&rule.name, value);
        }
        if let Some(finalize) = self.finalize {
            finalize(&mut particle)?;
        }
        Ok(particle)
    }

    /// Builds, filters and sorts every particle of this type.
    ///
    /// # Errors
    /// Propagates amount, build, filter and sort-key errors.
    pub fn build(&self, record: &Record, record_index: usize) -> Result<Vec<Particle>> {
        let amount = self.amount(record, record_index)?;
        let mut particles = Vec::with_capacity(amount);
        for index in 0..amount {
            let particle = self.build_one(record, record_index, index)?;
            let keep = match &self.filter {
                Some(filter) => filter.truthy(&Scope::Particle {
                    particle: &particle,
                    record,
                })?,
                None => true,
            };
            if keep {
                particles.push(particle);
            }
        }
        match &self.sorter {
            Some(sorter) => sort_particles(particles, sorter, record),
            None => Ok(particles),
        }
    }
}

fn compile_particle_expression(source: &str) -> Result<Expression> {
    let expr = Expression::compile(source)?;
    expr.check_names(|n| PARTICLE_SCOPE.contains(&n))?;
    Ok(expr)
}

fn sort_particles(particles: Vec<Particle>, sorter: &Sorter, record: &Record) -> Result<Vec<Particle>> {
    let mut keyed = particles
        .into_iter()
        .map(|particle| {
            let key = sorter.by.scalar(&Scope::Particle {
                particle: &particle,
                record,
            })?;
            Ok((key, particle))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some((first, _)) = keyed.first() {
        if let Some((bad, _)) = keyed.iter().find(|(k, _)| first.compare(k).is_none()) {
            return Err(Error::Evaluation(format!(
                "sort keys of '{}' are not comparable: {} and {}",
                sorter.by,
                first.kind(),
                bad.kind()
            )));
        }
    }

    // Stable in both directions: ties keep their build order.
    if sorter.reverse {
        keyed.sort_by(|(a, _), (b, _)| b.compare(a).unwrap_or(Ordering::Equal));
    } else {
        keyed.sort_by(|(a, _), (b, _)| a.compare(b).unwrap_or(Ordering::Equal));
    }
    Ok(keyed.into_iter().map(|(_, p)| p).collect())
}

/// Compiled run configuration: one builder per particle type.
#[derive(Debug)]
pub struct EventSchema {
    event_number_column: Option<String>,
    builders: Vec<ParticleBuilder>,
}

impl EventSchema {
    /// Compiles every particle type of `config`.
    ///
    /// # Errors
    /// Returns the first configuration, unresolved-path or expression error.
    pub fn compile(config: &RunConfig, registry: &Registry) -> Result<Self> {
        let builders = config
            .particle_types
            .iter()
            .map(|(name, ptype)| ParticleBuilder::compile(name, ptype, registry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            event_number_column: config.event_number_column.clone(),
            builders,
        })
    }

    /// A schema without particle types.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            event_number_column: None,
            builders: Vec::new(),
        }
    }

    #[must_use]
    pub fn builders(&self) -> &[ParticleBuilder] {
        &self.builders
    }

    /// Builds the event for record `index`.
    ///
    /// Every collection is built before any is attached, so a failure never
    /// leaves a partially built event behind.
    ///
    /// # Errors
    /// Propagates the first particle type that fails to build.
    pub fn build_event(&self, record: &Record, index: usize) -> Result<Event> {
        let collections = self
            .builders
            .iter()
            .map(|b| b.build(record, index).map(|ps| (b.type_name(), ps)))
            .collect::<Result<Vec<_>>>()?;

        let mut event = Event::new(index);
        let number = self
            .event_number_column
            .as_deref()
            .and_then(|c| record.column(c))
            .and_then(|c| match c {
                Column::Scalar(s) => s.as_i64(),
                _ => None,
            });
        if let Some(n) = number {
            event.number = n;
        }
        for (name, particles) in collections {
            event.set(name, particles);
        }
        Ok(event)
    }
}
