//! Compiles a variant of a config into a build graph and image config.

use crate::build::options::Options;
use crate::build::phase::{Phase, PhaseCompileable};
use crate::build::resolver::{ImageMetaResolver, RegistryResolver};
use crate::build::target::{Target, TargetGroup};
use crate::config::Config;
use crate::error::{BlubberError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Version stamped into the `blubber.version` label.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const VARIANT_LABEL: &str = "blubber.variant";
pub const VERSION_LABEL: &str = "blubber.version";

/// Compiles variants, resolving base images through a shared resolver.
#[derive(Clone)]
pub struct Compiler {
    resolver: Arc<dyn ImageMetaResolver>,
}

impl Compiler {
    pub fn new(resolver: Arc<dyn ImageMetaResolver>) -> Self {
        Self { resolver }
    }

    /// A compiler that resolves base images against their registries.
    pub fn with_registry() -> Self {
        Self::new(Arc::new(RegistryResolver::new()))
    }

    /// Compiles `variant` and every variant it copies from.
    ///
    /// Variants are compiled dependencies first, each through all phases in
    /// order, so that a copy always sees the final state of its source.
    ///
    /// # Arguments
    /// * `config` - A read config; it is expanded on a copy
    /// * `variant` - Name of the variant to build
    /// * `options` - Build arguments, labels and platforms
    ///
    /// # Returns
    /// * `Ok(Target)` - The compiled target of `variant`
    /// * `Err(BlubberError)` - Expansion, base image resolution or instruction failure
    #[instrument(skip(self, config, options), fields(platform = %options.target_platform))]
    pub async fn compile(
        &self,
        config: &Config,
        variant: &str,
        options: &Options,
    ) -> Result<Target> {
        let mut config = config.clone();
        let order = config.expand_includes_and_copies(variant)?;

        info!(order = ?order, "compiling variants");

        let options = Arc::new(options.clone());
        let mut group = TargetGroup::new();

        for name in &order {
            let base = &config.variant(name)?.common.base;
            group.push(Target::new(name, base, Arc::clone(&options)));
        }

        group.initialize_all(Arc::clone(&self.resolver)).await?;

        for name in &order {
            let variant_config = config.variant(name)?;

            let peers: BTreeMap<String, _> = variant_config
                .variant_dependencies()
                .into_iter()
                .filter_map(|dep| group.find(&dep).map(|peer| (dep, peer.state().clone())))
                .collect();

            let target = group
                .find_mut(name)
                .ok_or_else(|| BlubberError::UnknownVariant { variant: name.clone() })?;

            for (peer, state) in peers {
                target.link(&peer, state);
            }

            for phase in Phase::ALL {
                let instructions = variant_config.instructions_for_phase(phase);

                debug!(
                    variant = %name,
                    phase = %phase,
                    instructions = instructions.len(),
                    "compiling phase"
                );

                for instruction in &instructions {
                    instruction.compile(target).map_err(|e| BlubberError::compile(name, e))?;
                }
            }
        }

        let mut target = group
            .pop()
            .ok_or_else(|| BlubberError::UnknownVariant { variant: variant.to_string() })?;
        let variant_config = config.variant(variant)?;

        target.add_labels(&BTreeMap::from([
            (VARIANT_LABEL.to_string(), variant.to_string()),
            (VERSION_LABEL.to_string(), VERSION.to_string()),
        ]));

        if options.run_entrypoint {
            target
                .run_entrypoint(&options.entrypoint_args, &variant_config.common.runs.environment)
                .map_err(|e| BlubberError::compile(variant, e))?;
        }

        Ok(target)
    }
}

/// Compiles `variant` and marshals the result.
///
/// # Returns
/// * `Ok((graph, image_config))` - Serialized build graph and OCI image config
pub async fn compile(
    config: &Config,
    variant: &str,
    options: &Options,
    resolver: Arc<dyn ImageMetaResolver>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    Compiler::new(resolver).compile(config, variant, options).await?.marshal()
}
