//! Builder-scoped operator registry.
//!
//! Vertices may reference operators by name instead of by instance; the
//! registry resolves those names at build time. A singleton entry is shared
//! by every graph built from the builder, while a factory entry produces an
//! owned instance per resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::operator::Operator;

enum Entry {
    Singleton(Arc<dyn Operator>),
    Factory(Box<dyn Fn() -> Arc<dyn Operator> + Send + Sync>),
}

#[derive(Default)]
pub struct OperatorRegistry {
    entries: HashMap<String, Entry>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance resolved as-is by every lookup.
    pub fn register_singleton(&mut self, name: &str, operator: Arc<dyn Operator>) {
        self.entries
            .insert(name.to_string(), Entry::Singleton(operator));
    }

    /// Registers a factory producing a fresh instance per lookup.
    pub fn register_factory<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Operator> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.to_string(), Entry::Factory(Box::new(factory)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Operator>> {
        match self.entries.get(name)? {
            Entry::Singleton(operator) => Some(operator.clone()),
            Entry::Factory(factory) => Some(factory()),
        }
    }
}
