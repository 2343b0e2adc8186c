//! Blubber core library
//!
//! Reads variant-based container image configs, validates and expands them,
//! and compiles a variant into a build graph plus an OCI image config, or
//! renders it as a multi-stage Dockerfile.

pub mod build;
pub mod compiler;
pub mod config;
pub mod dockerfile;
pub mod error;
pub mod observability;
pub mod paths;

// Re-export commonly used items
pub use build::{
    Image, ImageMetaResolver, OfflineResolver, Options, Platform, RegistryResolver, ResolvedImage,
    StaticResolver, Target,
};
pub use compiler::{compile, Compiler, VERSION};
pub use config::{
    parse_yaml_config, read_config, read_config_file, read_yaml_config, Config, Policy,
    VariantConfig,
};
pub use error::{BlubberError, Result};
pub use observability::init as init_observability;
