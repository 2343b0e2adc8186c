//! Config reading.
//!
//! The version is checked before anything else so that a config written for
//! another version fails with a version error rather than a field error.

use super::common::CommonConfig;
use super::validation::Validator;
use super::{Config, Merge};
use crate::error::{BlubberError, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, instrument};

/// Decodes a YAML (or JSON) config and applies the built-in defaults,
/// without validating its fields.
///
/// The version is still checked first. Use this when something else, such as
/// a policy, must see the config before field validation does.
///
/// # Arguments
/// * `data` - Raw config document
///
/// # Returns
/// * `Ok(Config)` - Decoded config with defaults merged under the root
/// * `Err(BlubberError)` - Malformed document, unknown fields or an unsupported version
pub fn parse_yaml_config(data: &[u8]) -> Result<Config> {
    let document: serde_yaml::Value =
        serde_yaml::from_slice(data).map_err(|e| BlubberError::Parse { reason: e.to_string() })?;

    check_version(&document)?;

    let mut config: Config = serde_yaml::from_value(document)
        .map_err(|e| BlubberError::Parse { reason: e.to_string() })?;

    let mut common = CommonConfig::defaults();
    common.merge(config.common);
    config.common = common;

    debug!(variants = config.variants.len(), "parsed config");

    Ok(config)
}

/// Reads a YAML (or JSON) config, applies the defaults and validates it.
pub fn read_yaml_config(data: &[u8]) -> Result<Config> {
    let config = parse_yaml_config(data)?;
    config.validate_all()?;

    Ok(config)
}

/// Alias of [`read_yaml_config`]; JSON documents are valid YAML.
pub fn read_config(data: &[u8]) -> Result<Config> {
    read_yaml_config(data)
}

/// Reads and validates the config at `path`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn read_config_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| BlubberError::Io { path: path.to_path_buf(), source: e })?;

    read_yaml_config(&data)
}

fn check_version(document: &serde_yaml::Value) -> Result<()> {
    let version = document.get("version").and_then(serde_yaml::Value::as_str).unwrap_or_default();

    let variants = BTreeSet::new();
    let mut v = Validator::new(&variants);
    v.field("version", version, "required,currentversion");
    v.finish()?;

    Ok(())
}
