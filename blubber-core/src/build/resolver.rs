//! Base image metadata resolution.
//!
//! Compilation needs each base image's config (environment, working
//! directory, user, entrypoint) and digest, but never its layers.

use super::image::Image;
use super::options::Platform;
use crate::error::{BlubberError, Result};
use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// A base image's config, pinned to a digest where known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Fully qualified reference
    pub reference: String,
    /// Manifest digest
    pub digest: Option<String>,
    pub image: Image,
}

/// Fetches image configs for base images.
#[async_trait]
pub trait ImageMetaResolver: Send + Sync {
    async fn resolve_image_config(&self, reference: &str, platform: &Platform)
        -> Result<ResolvedImage>;
}

/// Resolves images against their OCI registries, anonymously.
#[derive(Debug, Clone, Default)]
pub struct RegistryResolver {
    /// Registries spoken to over plain HTTP
    insecure_registries: Vec<String>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Self { insecure_registries: vec!["localhost".to_string()] }
    }

    pub fn with_insecure_registry(mut self, registry: &str) -> Self {
        self.insecure_registries.push(registry.to_string());
        self
    }

    fn client(&self, platform: &Platform) -> Client {
        let platform = platform.clone();

        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(self.insecure_registries.clone()),
            platform_resolver: Some(Box::new(move |manifests: &[ImageIndexEntry]| {
                platform_digest(manifests, &platform)
            })),
            ..Default::default()
        };

        Client::new(config)
    }
}

#[async_trait]
impl ImageMetaResolver for RegistryResolver {
    #[instrument(skip(self), fields(platform = %platform))]
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ResolvedImage> {
        let resolution_error = |reason: String| BlubberError::BaseImageResolution {
            image: reference.to_string(),
            reason,
        };

        let normalized = normalize_image_ref(reference)?;
        let oci_reference = Reference::try_from(normalized.as_str())
            .map_err(|e| resolution_error(format!("invalid image reference: {}", e)))?;

        info!("Resolving image config for {}", normalized);

        let client = self.client(platform);
        let (_manifest, digest, config) = client
            .pull_manifest_and_config(&oci_reference, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| resolution_error(e.to_string()))?;

        let image =
            Image::from_json(config.as_bytes()).map_err(|e| resolution_error(e.to_string()))?;

        debug!(digest = %digest, "resolved image config");

        Ok(ResolvedImage { reference: normalized, digest: Some(digest), image })
    }
}

/// Serves fixed image configs. Unknown references fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    images: BTreeMap<String, (String, Image)>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `image` under `reference`, which is normalized first.
    pub fn with_image(mut self, reference: &str, digest: &str, image: Image) -> Self {
        let key = normalize_image_ref(reference).unwrap_or_else(|_| reference.to_string());
        self.images.insert(key, (digest.to_string(), image));
        self
    }
}

#[async_trait]
impl ImageMetaResolver for StaticResolver {
    async fn resolve_image_config(
        &self,
        reference: &str,
        _platform: &Platform,
    ) -> Result<ResolvedImage> {
        let normalized = normalize_image_ref(reference)?;

        match self.images.get(&normalized) {
            Some((digest, image)) => Ok(ResolvedImage {
                reference: normalized,
                digest: Some(digest.clone()),
                image: image.clone(),
            }),
            None => Err(BlubberError::BaseImageResolution {
                image: reference.to_string(),
                reason: "image not found".into(),
            }),
        }
    }
}

/// Resolves every image to an empty config without contacting a registry.
/// Source references are left unpinned.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineResolver;

#[async_trait]
impl ImageMetaResolver for OfflineResolver {
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ResolvedImage> {
        Ok(ResolvedImage {
            reference: normalize_image_ref(reference)?,
            digest: None,
            image: Image::new(platform),
        })
    }
}

/// Qualifies a short image reference the way Docker does.
///
/// `debian` becomes `docker.io/library/debian:latest` and `foo/bar:1.0`
/// becomes `docker.io/foo/bar:1.0`. The first element names a registry only
/// if it contains a `.` or a `:`, or is `localhost`.
pub fn normalize_image_ref(reference: &str) -> Result<String> {
    let invalid = |reason: &str| BlubberError::BaseImageResolution {
        image: reference.to_string(),
        reason: reason.to_string(),
    };

    if reference.is_empty() || reference.chars().any(char::is_whitespace) {
        return Err(invalid("invalid image reference"));
    }

    let normalized = match reference.split_once('/') {
        None => format!("docker.io/library/{}", reference),
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            reference.to_string()
        }
        Some(_) => format!("docker.io/{}", reference),
    };

    let (name, digest) = match normalized.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (normalized.as_str(), None),
    };

    let last = name.rsplit('/').next().unwrap_or(name);

    let normalized = match digest {
        Some(_) => normalized.clone(),
        None if last.contains(':') => normalized.clone(),
        None => format!("{}:latest", normalized),
    };

    Ok(normalized)
}

/// Picks the index entry matching `platform`, falling back to any variant of
/// the same os and architecture.
fn platform_digest(manifests: &[ImageIndexEntry], platform: &Platform) -> Option<String> {
    let matching = |entry: &&ImageIndexEntry| {
        entry.platform.as_ref().is_some_and(|p| {
            p.os == platform.os && p.architecture == platform.architecture
        })
    };

    let exact = manifests.iter().filter(matching).find(|entry| {
        entry.platform.as_ref().is_some_and(|p| p.variant == platform.variant)
    });

    match exact.or_else(|| manifests.iter().find(matching)) {
        Some(entry) => Some(entry.digest.clone()),
        None => {
            debug!("No image found for platform {}", platform);
            None
        }
    }
}
