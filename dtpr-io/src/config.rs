//! Layered YAML run-configuration loading.
//!
//! Two extensions on top of plain YAML:
//! - `!include path` is replaced by the parsed content of `path`, resolved
//!   relative to the file that contains the tag.
//! - a `<<` key merges a mapping (or a list of mappings) into the mapping
//!   holding it. Local keys win; within a list the first mapping wins.
//!
//! Included files may include further files. A file that ends up including
//! itself is reported with the whole include chain.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use dtpr_core::RunConfig;

use crate::{Error, Result};

const MERGE_KEY: &str = "<<";
const INCLUDE_TAG: &str = "include";

/// Loads a run configuration file.
///
/// # Errors
/// Returns an I/O, YAML or include-cycle error while loading, or a core
/// configuration error if the document does not match the schema.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let document = load_document(path)?;
    Ok(RunConfig::from_value(document)?)
}

/// Loads a YAML file with includes and merges resolved, as a JSON value.
///
/// # Errors
/// Returns an I/O, YAML or include-cycle error, or
/// [`Error::InvalidFormat`] for an unsupported tag or a malformed merge.
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<serde_json::Value> {
    let yaml = Loader::default().load(path.as_ref())?;
    serde_json::to_value(&yaml).map_err(|e| {
        Error::InvalidFormat(format!("{}: {e}", path.as_ref().display()))
    })
}

#[derive(Default)]
struct Loader {
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
}

impl Loader {
    fn load(&mut self, path: &Path) -> Result<Value> {
        let path = fs::canonicalize(path)?;
        if self.stack.contains(&path) {
            let mut chain = self.stack.clone();
            chain.push(path);
            return Err(Error::IncludeCycle { chain });
        }

        let text = fs::read_to_string(&path)?;
        let value: Value = serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
            path: path.clone(),
            source,
        })?;
        log::debug!("loaded configuration {}", path.display());

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.stack.push(path);
        let resolved = self.resolve(value, &base);
        self.stack.pop();
        resolved
    }

    fn resolve(&mut self, value: Value, base: &Path) -> Result<Value> {
        match value {
            Value::Tagged(tagged) if tagged.tag == INCLUDE_TAG => match tagged.value {
                Value::String(file) => self.load(&base.join(file)),
                other => Err(Error::InvalidFormat(format!(
                    "!include expects a file path, got {other:?}"
                ))),
            },
            Value::Tagged(tagged) => Err(Error::InvalidFormat(format!(
                "unsupported tag {}",
                tagged.tag
            ))),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, base))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => self.resolve_mapping(map, base).map(Value::Mapping),
            scalar => Ok(scalar),
        }
    }

    fn resolve_mapping(&mut self, map: Mapping, base: &Path) -> Result<Mapping> {
        let mut merged = Mapping::new();
        let mut local = Vec::with_capacity(map.len());
        for (key, value) in map {
            let value = self.resolve(value, base)?;
            if key.as_str() != Some(MERGE_KEY) {
                local.push((key, value));
                continue;
            }
            let sources = match value {
                Value::Mapping(m) => vec![m],
                Value::Sequence(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::Mapping(m) => Ok(m),
                        other => Err(merge_error(&other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
                Value::Null => Vec::new(),
                other => return Err(merge_error(&other)),
            };
            for source in sources {
                for (k, v) in source {
                    if !merged.contains_key(&k) {
                        merged.insert(k, v);
                    }
                }
            }
        }
        for (key, value) in local {
            merged.insert(key, value);
        }
        Ok(merged)
    }
}

fn merge_error(value: &Value) -> Error {
    Error::InvalidFormat(format!("'<<' expects a mapping, got {value:?}"))
}
