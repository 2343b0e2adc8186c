//! Config model: reading, validation, merging and variant expansion.
//!
//! A config is a root [`CommonConfig`] plus named variants. Each variant is
//! resolved by layering the root, then its includes in dependency order,
//! then itself:
//!
//! ```yaml
//! version: v4
//! base: docker-registry.wikimedia.org/bookworm
//! variants:
//!   build:
//!     builders:
//!       - node: { requirements: [package.json] }
//!   production:
//!     includes: [build]
//!     copies: [build]
//! ```

pub mod apt;
pub mod artifacts;
pub mod builder;
pub mod builders;
pub mod common;
pub mod copies;
pub mod dep_graph;
pub mod flag;
pub mod lives;
pub mod node;
pub mod php;
pub mod policy;
pub mod python;
pub mod reader;
pub mod requirements;
pub mod runs;
pub mod user;
pub mod validation;
pub mod variant;


pub use artifacts::ArtifactSpec;
pub use builders::{BuilderEntry, BuildersConfig};
pub use common::CommonConfig;
pub use dep_graph::{DepGraph, DepGraphError};
pub use flag::Flag;
pub use policy::{Enforcement, Policy};
pub use reader::{parse_yaml_config, read_config, read_config_file, read_yaml_config};
pub use validation::{Validate, ValidationErrors, Validator, CURRENT_VERSION};
pub use variant::VariantConfig;

use crate::error::{BlubberError, Result};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Right-biased overlay of one config fragment onto another.
///
/// Set fields of `other` win, unset fields keep the current value, and
/// merging a value with itself leaves it unchanged.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

/// Removes `key` from a YAML mapping and decodes it.
pub(crate) fn take_field<T, E>(
    doc: &mut serde_yaml::Mapping,
    key: &str,
) -> std::result::Result<Option<T>, E>
where
    T: DeserializeOwned,
    E: de::Error,
{
    doc.remove(key)
        .map(|value| {
            serde_yaml::from_value(value).map_err(|e| E::custom(format!("{}: {}", key, e)))
        })
        .transpose()
}

/// Decodes what is left of a mapping as the shared config fields.
pub(crate) fn common_from<E: de::Error>(
    doc: serde_yaml::Mapping,
) -> std::result::Result<CommonConfig, E> {
    CommonConfig::deserialize(serde_yaml::Value::Mapping(doc)).map_err(E::custom)
}

/// A complete config document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Config {
    pub version: String,
    #[serde(flatten)]
    pub common: CommonConfig,
    pub variants: BTreeMap<String, VariantConfig>,
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut doc = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();

        let version = take_field::<_, D::Error>(&mut doc, "version")?.unwrap_or_default();
        let variants = take_field::<_, D::Error>(&mut doc, "variants")?.unwrap_or_default();
        let common = common_from::<D::Error>(doc)?;

        Ok(Self { version, common, variants })
    }
}

impl Validate for Config {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("version", &self.version, "required,currentversion");
        self.common.validate(v);
        v.field("variants", &self.variants, "variants");

        v.nested("variants", |v| {
            for (name, variant) in &self.variants {
                v.nested(name, |v| variant.validate(v));
            }
        });
    }
}

impl Config {
    /// Validates the whole document, resolving variant references against
    /// its own variants.
    ///
    /// A lone conflict between mutually exclusive keys is reported as
    /// [`BlubberError::Conflict`].
    pub fn validate_all(&self) -> Result<()> {
        let variants: BTreeSet<String> = self.variants.keys().cloned().collect();

        validation::validate(self, &variants).map_err(|errors| match errors.errors() {
            [validation::FieldError { tag, namespace, param, .. }] if tag == "notallowedwith" => {
                BlubberError::Conflict { field: namespace.clone(), peers: param.clone() }
            }
            _ => BlubberError::Validation(errors),
        })
    }

    pub fn variant(&self, name: &str) -> Result<&VariantConfig> {
        self.variants
            .get(name)
            .ok_or_else(|| BlubberError::UnknownVariant { variant: name.to_string() })
    }

    /// Returns `name` and its transitive includes, includes first.
    ///
    /// # Returns
    /// * `Err(BlubberError::ExpansionLoop)` - An include chain leads back to itself
    /// * `Err(BlubberError::UnknownVariant)` - An included variant is not declared
    pub fn resolve_includes(&self, name: &str) -> Result<Vec<String>> {
        let mut visiting = HashSet::new();
        let mut order = Vec::new();

        self.visit_includes(name, &mut visiting, &mut order)?;

        Ok(order)
    }

    fn visit_includes(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        let variant = self.variant(name)?;

        if !visiting.insert(name.to_string()) {
            return Err(BlubberError::ExpansionLoop { variant: name.to_string() });
        }

        for include in variant.includes.iter().flatten() {
            self.visit_includes(include, visiting, order)?;
        }

        visiting.remove(name);

        if !order.iter().any(|n| n == name) {
            order.push(name.to_string());
        }

        Ok(())
    }

    /// Resolves a variant against the root config and its includes.
    ///
    /// The result has no includes left, its copies expanded against its
    /// application directory, and its artifacts normalized.
    pub fn expand_variant(&self, name: &str) -> Result<VariantConfig> {
        let mut expanded = VariantConfig { common: self.common.clone(), ..Default::default() };

        for include in self.resolve_includes(name)? {
            expanded.merge(self.variant(&include)?.clone());
        }

        expanded.includes = None;
        expanded.materialize();

        debug!(variant = name, "expanded variant");

        Ok(expanded)
    }

    /// Builds the graph of variants `name` copies from, expanding each one.
    fn copies_graph(&self, name: &str) -> Result<(DepGraph, BTreeMap<String, VariantConfig>)> {
        let mut graph = DepGraph::new();
        let mut expanded = BTreeMap::new();
        let mut queue = vec![name.to_string()];

        graph.ensure(name);

        while let Some(current) = queue.pop() {
            if expanded.contains_key(&current) {
                continue;
            }

            let variant = self.expand_variant(&current)?;

            for dep in variant.variant_dependencies() {
                self.variant(&dep)?;
                graph.add(&current, &dep);
                queue.push(dep);
            }

            expanded.insert(current, variant);
        }

        Ok((graph, expanded))
    }

    /// Variants to build for `name`, dependencies first and `name` last.
    pub fn dependency_order(&self, name: &str) -> Result<Vec<String>> {
        let (graph, _) = self.copies_graph(name)?;
        Self::order(&graph, name)
    }

    fn order(graph: &DepGraph, name: &str) -> Result<Vec<String>> {
        let mut order = graph.get_deps(name).map_err(|e| match e {
            DepGraphError::CycleAt { key } => BlubberError::ExpansionLoop { variant: key },
            other => other.into(),
        })?;
        order.push(name.to_string());

        Ok(order)
    }

    /// Replaces `name` and every variant it copies from with their expanded
    /// form.
    ///
    /// Expanding an already expanded config is a no-op.
    pub fn expand_includes_and_copies(&mut self, name: &str) -> Result<Vec<String>> {
        let (graph, mut expanded) = self.copies_graph(name)?;
        let order = Self::order(&graph, name)?;

        for variant in &order {
            if let Some(config) = expanded.remove(variant) {
                self.variants.insert(variant.clone(), config);
            }
        }

        Ok(order)
    }
}
