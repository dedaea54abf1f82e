//! registry.rs
//! Field-type name -> contract.

use super::{FieldContract, FieldKind};
use crate::error::ConfigurationError;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    contracts: BTreeMap<String, Arc<dyn FieldContract>>,
}

static BUILTIN: OnceLock<FieldRegistry> = OnceLock::new();

impl FieldRegistry {
    /// A registry with no field types.
    pub fn empty() -> Self { Self::default() }

    /// A fresh registry holding the built-in field types, for extension.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for kind in FieldKind::ALL {
            registry.register(kind.name(), kind);
        }
        registry
    }

    /// Process-wide built-in registry, initialised on first use and never
    /// mutated afterwards.
    pub fn builtin() -> &'static FieldRegistry {
        BUILTIN.get_or_init(Self::with_builtins)
    }

    pub fn register(&mut self, name: &str, contract: impl FieldContract + 'static) {
        self.contracts.insert(name.to_string(), Arc::new(contract));
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn FieldContract>, ConfigurationError> {
        self.contracts
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownField(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool { self.contracts.contains_key(name) }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}
