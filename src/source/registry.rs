use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::concat::ConcatDataset;
use crate::config::{ConcatDatasetConfig, MetaDatasetConfig};
use crate::constants::registry::{CLASS_CONCAT, CLASS_MEMORY, CLASS_META};
use crate::errors::DatasetError;
use crate::meta::MetaDataset;
use crate::source::{InMemorySource, InMemorySourceParams, SequenceSource};
use crate::types::SourceClass;

/// Builds a source of one registered class from its spec.
///
/// The registry is passed along so composite sources can build their children.
pub type SourceConstructor = Arc<
    dyn Fn(&str, &SourceSpec, &SourceRegistry) -> Result<Box<dyn SequenceSource>, DatasetError>
        + Send
        + Sync
        + 'static,
>;

/// Declarative description of one source: its class and constructor params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Registered class name, e.g. `memory`.
    pub class: SourceClass,
    /// Class-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl SourceSpec {
    /// Spec for `class` with raw JSON `params`.
    pub fn new(class: impl Into<SourceClass>, params: serde_json::Value) -> Self {
        Self {
            class: class.into(),
            params,
        }
    }

    /// Deserialize `params`, treating absent params as the default value.
    pub fn parse_params<T: DeserializeOwned + Default>(&self) -> Result<T, DatasetError> {
        if self.params.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone()).map_err(|err| {
            DatasetError::Configuration(format!(
                "invalid params for source class '{}': {err}",
                self.class
            ))
        })
    }
}

/// Maps source class names to constructors.
///
/// Classes are resolved once when a dataset is configured.
#[derive(Clone)]
pub struct SourceRegistry {
    constructors: HashMap<SourceClass, SourceConstructor>,
}

impl SourceRegistry {
    /// Registry without any classes.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in `memory`, `meta`, and `concat` classes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(CLASS_MEMORY, |id, spec, _| {
            let params: InMemorySourceParams = spec.parse_params()?;
            Ok(Box::new(InMemorySource::from_params(id, params)))
        });
        registry.register(CLASS_META, |id, spec, registry| {
            let config: MetaDatasetConfig = parse_required(spec)?;
            Ok(Box::new(
                MetaDataset::from_config(&config, registry)?.with_id(id),
            ))
        });
        registry.register(CLASS_CONCAT, |id, spec, registry| {
            let config: ConcatDatasetConfig = parse_required(spec)?;
            Ok(Box::new(
                ConcatDataset::from_config(&config, registry)?.with_id(id),
            ))
        });
        registry
    }

    /// Register (or replace) a class constructor.
    pub fn register<F>(&mut self, class: impl Into<SourceClass>, constructor: F) -> &mut Self
    where
        F: Fn(&str, &SourceSpec, &SourceRegistry) -> Result<Box<dyn SequenceSource>, DatasetError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(class.into(), Arc::new(constructor));
        self
    }

    /// True when `class` has a constructor.
    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    /// Instantiate source `id` from `spec`.
    pub fn build(
        &self,
        id: &str,
        spec: &SourceSpec,
    ) -> Result<Box<dyn SequenceSource>, DatasetError> {
        let constructor = self.constructors.get(&spec.class).ok_or_else(|| {
            DatasetError::Configuration(format!(
                "source '{id}' uses unregistered class '{}'",
                spec.class
            ))
        })?;
        constructor(id, spec, self)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn parse_required<T: DeserializeOwned>(spec: &SourceSpec) -> Result<T, DatasetError> {
    serde_json::from_value(spec.params.clone()).map_err(|err| {
        DatasetError::Configuration(format!(
            "invalid params for source class '{}': {err}",
            spec.class
        ))
    })
}
