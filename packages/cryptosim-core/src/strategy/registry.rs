//! Strategy catalogue, resolved by name at simulation creation.

use super::{MeanReversion, Momentum, RsiReversal, SmaCrossover, Strategy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Largest value accepted for an integer parameter.
pub const MAX_INTEGER_PARAMETER: usize = 100_000;

/// Whether a parameter takes whole numbers (periods) or any float.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Integer,
    Float,
}

/// One tunable parameter of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub default: f64,
    pub description: String,
}

/// Strategy metadata shown to users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyDescriptor {
    /// Canonical name
    pub name: String,
    /// Other names accepted on lookup
    pub aliases: Vec<String>,
    /// How the strategy works
    pub description: String,
    /// Parameters in declaration order
    pub parameters: Vec<ParameterSpec>,
}

impl StrategyDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn integer(self, name: &str, default: usize, description: &str) -> Self {
        self.parameter(name, ParameterKind::Integer, default as f64, description)
    }

    pub fn float(self, name: &str, default: f64, description: &str) -> Self {
        self.parameter(name, ParameterKind::Float, default, description)
    }

    fn parameter(mut self, name: &str, kind: ParameterKind, default: f64, description: &str) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.to_string(),
            kind,
            default,
            description: description.to_string(),
        });
        self
    }

    /// Validate overrides against the declared parameters and fill in defaults.
    pub fn resolve_parameters(&self, overrides: &BTreeMap<String, f64>) -> Result<Parameters> {
        for name in overrides.keys() {
            if !self.parameters.iter().any(|p| &p.name == name) {
                return Err(Error::Config(format!(
                    "unknown parameter '{}' for strategy '{}'",
                    name, self.name
                )));
            }
        }

        let mut values = BTreeMap::new();
        for spec in &self.parameters {
            let value = overrides.get(&spec.name).copied().unwrap_or(spec.default);
            if !value.is_finite() {
                return Err(Error::Config(format!(
                    "parameter '{}' must be finite",
                    spec.name
                )));
            }
            if spec.kind == ParameterKind::Integer
                && (value.fract() != 0.0 || value < 1.0 || value > MAX_INTEGER_PARAMETER as f64)
            {
                return Err(Error::Config(format!(
                    "parameter '{}' must be an integer in 1..={}, got {}",
                    spec.name, MAX_INTEGER_PARAMETER, value
                )));
            }
            values.insert(spec.name.clone(), value);
        }

        Ok(Parameters { values })
    }
}

/// Resolved parameter values, defaults included.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, f64>,
}

impl Parameters {
    pub fn float(&self, name: &str) -> Result<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("missing parameter '{}'", name)))
    }

    pub fn integer(&self, name: &str) -> Result<usize> {
        self.float(name).map(|v| v as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }
}

/// Builds a strategy instance from resolved parameters.
pub type StrategyFactory = Arc<dyn Fn(&Parameters) -> Result<Box<dyn Strategy>> + Send + Sync>;

/// Wrap a typed constructor as a [`StrategyFactory`].
pub fn factory<S, F>(build: F) -> StrategyFactory
where
    S: Strategy + 'static,
    F: Fn(&Parameters) -> Result<S> + Send + Sync + 'static,
{
    Arc::new(move |parameters: &Parameters| -> Result<Box<dyn Strategy>> {
        Ok(Box::new(build(parameters)?))
    })
}

struct Entry {
    descriptor: StrategyDescriptor,
    factory: StrategyFactory,
}

/// Strategies available to simulations, looked up case-insensitively by name or alias.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    entries: Vec<Arc<Entry>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with momentum, mean reversion, RSI and SMA crossover.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins = [
            (Momentum::descriptor(), factory(Momentum::from_parameters)),
            (MeanReversion::descriptor(), factory(MeanReversion::from_parameters)),
            (RsiReversal::descriptor(), factory(RsiReversal::from_parameters)),
            (SmaCrossover::descriptor(), factory(SmaCrossover::from_parameters)),
        ];

        for (descriptor, factory) in builtins {
            // Built-in names are distinct, so registration cannot collide.
            let _ = registry.register(descriptor, factory);
        }
        registry
    }

    /// Add a strategy. Fails if its name or an alias is already taken.
    pub fn register(&mut self, descriptor: StrategyDescriptor, factory: StrategyFactory) -> Result<()> {
        let keys: Vec<String> = std::iter::once(&descriptor.name)
            .chain(&descriptor.aliases)
            .map(|k| k.to_lowercase())
            .collect();

        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(Error::InvalidOperation(format!(
                "strategy name '{}' is already registered",
                taken
            )));
        }

        let position = self.entries.len();
        for key in keys {
            self.index.insert(key, position);
        }
        self.entries.push(Arc::new(Entry { descriptor, factory }));
        Ok(())
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.index
            .get(&name.trim().to_lowercase())
            .and_then(|&i| self.entries.get(i))
            .map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn descriptor(&self, name: &str) -> Option<&StrategyDescriptor> {
        self.entry(name).map(|e| &e.descriptor)
    }

    /// Build a fresh strategy instance.
    pub fn resolve(
        &self,
        name: &str,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<(Box<dyn Strategy>, StrategyDescriptor)> {
        let entry = self
            .entry(name)
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))?;
        let parameters = entry.descriptor.resolve_parameters(overrides)?;
        let strategy = (entry.factory)(&parameters)?;
        Ok((strategy, entry.descriptor.clone()))
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<StrategyDescriptor> {
        let mut descriptors: Vec<_> = self.entries.iter().map(|e| e.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|d| d.name).collect()
    }
}
