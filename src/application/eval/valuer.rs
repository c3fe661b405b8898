use crate::application::eval::generators::GeneratorRegistry;
use crate::domain::errors::{GurlError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};
use tracing::debug;

static CACHE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)(?:_cache(?:_\d+)?|_\d+)$").expect("valid cache suffix regex")
});

/// Supplies values for variables no generator knows.
///
/// `Ok(None)` means "not available here"; a source that needs to stop the
/// whole run (an interrupted prompt) returns `Err`.
#[cfg_attr(test, mockall::automock)]
pub trait VariableSource: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Option<String>>;
}

/// Fixed values, from `--var NAME=VALUE`.
#[derive(Debug, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl VariableSource for MapSource {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.get(name).cloned())
    }
}

/// Values from `<PREFIX><NAME>` environment entries.
#[derive(Debug)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl VariableSource for EnvSource {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(std::env::var(format!("{}{}", self.prefix, name.to_uppercase())).ok())
    }
}

/// Asks each source in turn; the first one with a value wins.
pub struct ChainSource {
    sources: Vec<Box<dyn VariableSource>>,
}

impl ChainSource {
    pub fn new(sources: Vec<Box<dyn VariableSource>>) -> Self {
        Self { sources }
    }
}

impl VariableSource for ChainSource {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        for source in &self.sources {
            if let Some(value) = source.resolve(name)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Returns the pure name when `name` carries a cache suffix
/// (`_<n>`, `_cache`, `_cache_<n>`).
pub fn cache_suffix(name: &str) -> Option<&str> {
    CACHE_SUFFIX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Resolves variable names to values, memoizing cache-suffixed names for
/// the life of the process (or until [`Valuer::clear_cache`]).
///
/// The cache is shared by every worker of a run, so a pinned name resolves
/// once even under concurrency.
pub struct Valuer {
    registry: GeneratorRegistry,
    cache: Mutex<HashMap<String, String>>,
    source: Box<dyn VariableSource>,
}

impl Valuer {
    pub fn new(source: Box<dyn VariableSource>) -> Self {
        Self {
            registry: GeneratorRegistry::new(),
            cache: Mutex::new(HashMap::new()),
            source,
        }
    }

    /// Whether `name`, suffix stripped, is a registered generator.
    pub fn is_generator(&self, name: &str) -> bool {
        self.registry
            .contains(cache_suffix(name).unwrap_or(name))
    }

    pub fn value(&self, name: &str, params: Option<&str>) -> Result<String> {
        let Some(pure_name) = cache_suffix(name) else {
            return self.compute(name, name, params);
        };

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(name) {
            debug!(name, "variable served from cache");
            return Ok(hit.clone());
        }

        let value = self.compute(name, pure_name, params)?;
        cache.insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn compute(&self, name: &str, pure_name: &str, params: Option<&str>) -> Result<String> {
        if let Some(value) = self
            .registry
            .generate(pure_name, params)
            .filter(|v| !v.is_empty())
        {
            return Ok(value);
        }

        debug!(name, "no generator value, asking variable source");
        self.source
            .resolve(name)?
            .ok_or_else(|| GurlError::VariableUnavailable(name.to_string()))
    }
}
