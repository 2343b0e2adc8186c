//! OCI image configuration.

use super::options::Platform;
use crate::error::{BlubberError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The runtime section of an image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self { kind: "layers".into(), diff_ids: Vec::new() }
    }
}

/// An OCI image config document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default)]
    pub config: ImageConfig,
    #[serde(default)]
    pub rootfs: RootFs,
}

impl Image {
    /// A fresh image for `platform`, with the working directory at `/` and a
    /// standard `PATH`.
    pub fn new(platform: &Platform) -> Self {
        let mut image = Self::default();
        image.set_platform(platform);
        image.config.working_dir = "/".into();
        image.config.env = Some(vec![format!("PATH={}", DEFAULT_PATH)]);
        image
    }

    /// Decodes an image config fetched from a registry.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| BlubberError::Marshal {
                what: "image config".into(),
                reason: e.to_string(),
            })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BlubberError::Marshal {
                what: "image config".into(),
                reason: e.to_string(),
            })
    }

    pub fn set_platform(&mut self, platform: &Platform) {
        self.os = platform.os.clone();
        self.architecture = platform.architecture.clone();
        self.variant = platform.variant.clone();
    }

    /// Environment as ordered key/value pairs.
    pub fn env(&self) -> Vec<(String, String)> {
        self.config
            .env
            .iter()
            .flatten()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry.clone(), String::new()),
            })
            .collect()
    }

    pub fn get_env(&self, key: &str) -> Option<String> {
        self.env().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sets a variable, replacing an existing entry in place.
    pub fn add_env(&mut self, key: &str, value: &str) {
        let entry = format!("{}={}", key, value);
        let env = self.config.env.get_or_insert_with(Vec::new);

        match env.iter_mut().find(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key) {
            Some(existing) => *existing = entry,
            None => env.push(entry),
        }
    }

    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        self.config.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
    }

    pub fn add_volume(&mut self, path: &str) {
        self.config
            .volumes
            .get_or_insert_with(BTreeMap::new)
            .insert(path.to_string(), serde_json::json!({}));
    }

    /// Sets the entrypoint. Any inherited command is cleared, since it was
    /// meant as arguments to the previous entrypoint.
    pub fn set_entrypoint(&mut self, entrypoint: &[String]) {
        self.config.entrypoint = Some(entrypoint.to_vec());
        self.config.cmd = None;
    }

    pub fn entrypoint(&self) -> &[String] {
        self.config.entrypoint.as_deref().unwrap_or_default()
    }
}
