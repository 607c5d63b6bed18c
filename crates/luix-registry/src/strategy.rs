//! Named strategy lookup
//!
//! Pluggable pieces (serializers, codecs, load balancers, health checkers,
//! ...) are looked up by the name carried in a URL option. Each kind keeps an
//! explicit name -> constructor table populated at startup.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

type Constructor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Table of named constructors for one strategy kind
pub struct Strategies<T> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<T>>,
}

impl<T> Strategies<T> {
    /// Create an empty table for the given strategy kind (used in error messages)
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: BTreeMap::new(),
        }
    }

    /// Register a constructor, replacing any previous one with the same name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> T + Send + Sync + 'static,
    ) {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(
        mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        self.register(name, constructor);
        self
    }

    /// Construct the strategy registered under `name`
    pub fn create(&self, name: &str) -> Result<T> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| {
                Error::Configuration(format!("Unknown {} strategy: '{}'", self.kind, name))
            })
    }

    /// Whether a strategy is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl<T> Clone for Strategies<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            constructors: self.constructors.clone(),
        }
    }
}
