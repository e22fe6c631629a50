//! Registry of named callables referenced from the run configuration.
//!
//! Dotted identifiers (`dtpr.selectors.baseline`) are resolved here once, at
//! startup. Each registered entry is a factory: it receives the entry's
//! `kwargs`, validates them and returns a closure with the arguments bound.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::Kwargs;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::particle::Particle;
use crate::pipeline::{Preprocessor, PreprocessorFn, Selector, SelectorFn};
use crate::value::Value;

/// Attribute function with its arguments bound; sees the in-progress particle.
pub type AttributeFn = Arc<dyn Fn(&Particle) -> Result<Value> + Send + Sync>;

type Factory<T> = Arc<dyn Fn(&Kwargs) -> Result<T> + Send + Sync>;

/// Post-build hook of a particle class.
pub type FinalizeFn = fn(&mut Particle) -> Result<()>;

/// A particle class: name, default attributes and an optional finalize hook.
#[derive(Debug, Clone)]
pub struct ParticleClass {
    pub name: String,
    /// Assigned before the configured attribute table.
    pub defaults: Vec<(String, Value)>,
    /// Run after the configured attribute table.
    pub finalize: Option<FinalizeFn>,
}

impl ParticleClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Vec::new(),
            finalize: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.defaults.push((key.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn with_finalize(mut self, finalize: FinalizeFn) -> Self {
        self.finalize = Some(finalize);
        self
    }
}

/// Dotted identifier → callable map.
#[derive(Clone, Default)]
pub struct Registry {
    classes: HashMap<String, ParticleClass>,
    attributes: HashMap<String, Factory<AttributeFn>>,
    selectors: HashMap<String, Factory<SelectorFn>>,
    preprocessors: HashMap<String, Factory<PreprocessorFn>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a particle class.
    pub fn register_class(&mut self, path: &str, class: ParticleClass) -> &mut Self {
        self.classes.insert(path.to_string(), class);
        self
    }

    /// Registers an attribute function factory.
    pub fn register_attribute<F, A>(&mut self, path: &str, factory: F) -> &mut Self
    where
        F: Fn(&Kwargs) -> Result<A> + Send + Sync + 'static,
        A: Fn(&Particle) -> Result<Value> + Send + Sync + 'static,
    {
        self.attributes.insert(
            path.to_string(),
            Arc::new(move |kwargs: &Kwargs| factory(kwargs).map(|f| Arc::new(f) as AttributeFn)),
        );
        self
    }

    /// Registers a selector factory.
    pub fn register_selector<F, S>(&mut self, path: &str, factory: F) -> &mut Self
    where
        F: Fn(&Kwargs) -> Result<S> + Send + Sync + 'static,
        S: Fn(&Event) -> Result<bool> + Send + Sync + 'static,
    {
        self.selectors.insert(
            path.to_string(),
            Arc::new(move |kwargs: &Kwargs| factory(kwargs).map(|f| Arc::new(f) as SelectorFn)),
        );
        self
    }

    /// Registers a preprocessor factory.
    pub fn register_preprocessor<F, P>(&mut self, path: &str, factory: F) -> &mut Self
    where
        F: Fn(&Kwargs) -> Result<P> + Send + Sync + 'static,
        P: Fn(&mut Event) -> Result<()> + Send + Sync + 'static,
    {
        self.preprocessors.insert(
            path.to_string(),
            Arc::new(move |kwargs: &Kwargs| factory(kwargs).map(|f| Arc::new(f) as PreprocessorFn)),
        );
        self
    }

    /// Copies every entry of `other` into this registry; `other` wins on
    /// conflicts.
    pub fn extend(&mut self, other: &Registry) -> &mut Self {
        self.classes
            .extend(other.classes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.attributes
            .extend(other.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.selectors
            .extend(other.selectors.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.preprocessors.extend(
            other
                .preprocessors
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self
    }

    /// Resolves a particle class.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedPath`] if `path` is unknown.
    pub fn class(&self, path: &str) -> Result<&ParticleClass> {
        self.classes.get(path).ok_or_else(|| unresolved("particle class", path))
    }

    /// Resolves an attribute function and binds `kwargs`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedPath`] if `path` is unknown, or the
    /// factory's error for invalid `kwargs`.
    pub fn attribute(&self, path: &str, kwargs: &Kwargs) -> Result<AttributeFn> {
        let factory = self
            .attributes
            .get(path)
            .ok_or_else(|| unresolved("attribute function", path))?;
        factory(kwargs)
    }

    /// Resolves a selector and binds `kwargs`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedPath`] if `path` is unknown, or the
    /// factory's error for invalid `kwargs`.
    pub fn selector(&self, name: &str, path: &str, kwargs: &Kwargs) -> Result<Selector> {
        let factory = self
            .selectors
            .get(path)
            .ok_or_else(|| unresolved("selector", path))?;
        Ok(Selector::from_arc(name, factory(kwargs)?))
    }

    /// Resolves a preprocessor and binds `kwargs`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedPath`] if `path` is unknown, or the
    /// factory's error for invalid `kwargs`.
    pub fn preprocessor(&self, name: &str, path: &str, kwargs: &Kwargs) -> Result<Preprocessor> {
        let factory = self
            .preprocessors
            .get(path)
            .ok_or_else(|| unresolved("preprocessor", path))?;
        Ok(Preprocessor::from_arc(name, factory(kwargs)?))
    }
}

fn unresolved(kind: &'static str, path: &str) -> Error {
    Error::UnresolvedPath {
        kind,
        path: path.to_string(),
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn sorted<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys
        }
        f.debug_struct("Registry")
            .field("classes", &sorted(&self.classes))
            .field("attributes", &sorted(&self.attributes))
            .field("selectors", &sorted(&self.selectors))
            .field("preprocessors", &sorted(&self.preprocessors))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_kwargs;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Scale {
        #[serde(default = "one")]
        factor: f64,
    }

    fn one() -> f64 {
        1.0
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_class("test.Digi", ParticleClass::new("Digi").with_default("bx", 0))
            .register_attribute("test.scaled_pt", |kwargs| {
                let Scale { factor } = parse_kwargs(kwargs)?;
                Ok(move |p: &Particle| -> Result<Value> {
                    Ok(Value::from(p.get_f64("pt")? * factor))
                })
            });
        registry
    }

    #[test]
    fn test_attribute_binding() {
        let registry = registry();
        let p = Particle::new(0, "Genmuon").with("pt", 10.0);

        let unit = registry.attribute("test.scaled_pt", &Kwargs::new()).unwrap();
        assert_eq!(unit(&p).unwrap(), Value::from(10.0));

        let mut kwargs = Kwargs::new();
        kwargs.insert("factor".into(), serde_json::json!(2.0));
        let doubled = registry.attribute("test.scaled_pt", &kwargs).unwrap();
        assert_eq!(doubled(&p).unwrap(), Value::from(20.0));

        kwargs.insert("factor".into(), serde_json::json!("two"));
        assert!(registry.attribute("test.scaled_pt", &kwargs).err().unwrap().is_config());
    }

    #[test]
    fn test_unresolved_paths() {
        let registry = registry();
        assert_eq!(registry.class("test.Digi").unwrap().name, "Digi");
        let err = registry.class("test.Nope").unwrap_err();
        assert!(matches!(err, Error::UnresolvedPath { kind: "particle class", .. }));
        assert!(registry
            .selector("x", "test.missing", &Kwargs::new())
            .is_err());
    }
}
