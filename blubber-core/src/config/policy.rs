//! Policy enforcement over a read config.
//!
//! ```yaml
//! enforcements:
//!   - path: variants.production.runs.as
//!     rule: ne=root
//!   - path: base
//!     rule: oneof=debian:bookworm debian:bullseye
//! ```

use super::validation::{RuleContext, Rules};
use super::Config;
use crate::error::{BlubberError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

/// A validation rule applied to the value at a dotted config path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enforcement {
    pub path: String,
    pub rule: String,
}

/// An ordered list of enforcements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub enforcements: Vec<Enforcement>,
}

impl Policy {
    /// Parses a YAML or JSON policy document.
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(data).map_err(|e| BlubberError::Parse { reason: e.to_string() })
    }

    /// Loads a policy from a local path, a `file://` URI or an HTTP(S) URL.
    ///
    /// # Arguments
    /// * `uri` - Where the policy document lives
    ///
    /// # Returns
    /// * `Err(BlubberError::PolicyLoad)` - The document could not be fetched or parsed
    #[instrument]
    pub async fn load(uri: &str) -> Result<Self> {
        let load_error = |reason: String| BlubberError::PolicyLoad { uri: uri.to_string(), reason };

        let data = if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = reqwest::get(uri).await.map_err(|e| load_error(e.to_string()))?;

            if !response.status().is_success() {
                return Err(load_error(format!("HTTP {}", response.status())));
            }

            response.bytes().await.map_err(|e| load_error(e.to_string()))?.to_vec()
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            tokio::fs::read(path).await.map_err(|e| load_error(e.to_string()))?
        };

        let policy = Self::from_yaml(&data).map_err(|e| load_error(e.to_string()))?;

        info!(enforcements = policy.enforcements.len(), "loaded policy");

        Ok(policy)
    }

    /// Checks `config` as `variant` will be built.
    ///
    /// `variant` and every variant it copies from are expanded against the
    /// root config and their includes first, so inherited values are
    /// enforced like declared ones.
    ///
    /// # Returns
    /// * `Err(BlubberError::PolicyViolation)` - The first enforcement the expanded config violates
    /// * `Err(BlubberError::ExpansionLoop)` - The variant's includes or copies form a cycle
    /// * `Err(BlubberError::UnknownVariant)` - The variant, or one it refers to, is not declared
    #[instrument(skip(self, config))]
    pub fn enforce(&self, config: &Config, variant: &str) -> Result<()> {
        let mut expanded = config.clone();
        expanded.expand_includes_and_copies(variant)?;

        self.validate(&expanded)
    }

    /// Checks every enforcement in order against `config` as given.
    ///
    /// Paths that do not resolve are skipped. Flags are checked as booleans.
    /// Values a variant only inherits are invisible here; see
    /// [`Policy::enforce`].
    ///
    /// # Returns
    /// * `Err(BlubberError::PolicyViolation)` - The first enforcement the config violates
    /// * `Err(BlubberError::InvalidRule)` - An enforcement's rule could not be parsed
    pub fn validate(&self, config: &Config) -> Result<()> {
        let document = serde_json::to_value(config)
            .map_err(|e| BlubberError::Marshal { what: "config".into(), reason: e.to_string() })?;
        let variants: BTreeSet<String> = config.variants.keys().cloned().collect();

        for enforcement in &self.enforcements {
            let rules = Rules::parse(&enforcement.rule).map_err(|e| BlubberError::InvalidRule {
                rule: enforcement.rule.clone(),
                reason: e.to_string(),
            })?;

            let Some(value) = resolve_path(&document, &enforcement.path) else {
                debug!(path = %enforcement.path, "policy path does not resolve, skipping");
                continue;
            };

            let ctx = RuleContext { variants: Some(&variants), siblings: None };

            if rules.check(value, &ctx).is_some() {
                return Err(BlubberError::PolicyViolation {
                    path: enforcement.path.clone(),
                    rule: enforcement.rule.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Descends a dotted path through maps and flattened structs.
pub fn resolve_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |value, key| value.as_object()?.get(key))
}
