//! Build options and platforms.

use crate::error::{BlubberError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// An OS, architecture and optional variant, as in `linux/arm64/v8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self { os: os.to_string(), architecture: architecture.to_string(), variant: None }
    }

    /// The platform of the machine running the compiler, using OCI
    /// architecture names.
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "arm" => "arm",
            other => other,
        };

        Self::new("linux", architecture)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;

        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }

        Ok(())
    }
}

impl FromStr for Platform {
    type Err = BlubberError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BlubberError::InvalidOption {
            option: "platform".into(),
            reason: format!("{:?} is not of the form os/arch[/variant]", s),
        };

        let parts: Vec<&str> = s.split('/').collect();

        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self { variant: Some(variant.to_string()), ..Self::new(os, arch) })
            }
            _ => Err(invalid()),
        }
    }
}

/// Options for a single compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Values for exposed build arguments, overriding their defaults
    pub build_args: BTreeMap<String, String>,
    /// Labels added to the final image config
    pub labels: BTreeMap<String, String>,
    /// Platform the build runs on
    pub build_platform: Platform,
    /// Platform the image is built for
    pub target_platform: Platform,
    /// Run the variant's entrypoint as a final build step
    pub run_entrypoint: bool,
    /// Arguments appended to the entrypoint when `run_entrypoint` is set
    pub entrypoint_args: Vec<String>,
    /// Upper bound on each base image metadata lookup
    pub meta_resolve_timeout: Option<Duration>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from frontend key/value pairs.
    ///
    /// Recognized keys are `run-variant`, `entrypoint-args` (a JSON array),
    /// `platform`, `build-arg:NAME` and `label:NAME`. Unknown keys are
    /// ignored.
    pub fn from_frontend_opts(opts: &BTreeMap<String, String>) -> Result<Self> {
        let mut options = Self::new();

        for (key, value) in opts {
            if let Some(name) = key.strip_prefix("build-arg:") {
                options.build_args.insert(name.to_string(), value.clone());
            } else if let Some(name) = key.strip_prefix("label:") {
                options.labels.insert(name.to_string(), value.clone());
            } else {
                match key.as_str() {
                    "run-variant" => {
                        options.run_entrypoint =
                            value.parse().map_err(|_| BlubberError::InvalidOption {
                                option: key.clone(),
                                reason: format!("{:?} is not a boolean", value),
                            })?;
                    }
                    "entrypoint-args" => {
                        options.entrypoint_args =
                            serde_json::from_str(value).map_err(|e| BlubberError::InvalidOption {
                                option: key.clone(),
                                reason: e.to_string(),
                            })?;
                    }
                    "platform" => options.target_platform = value.parse()?,
                    _ => {}
                }
            }
        }

        Ok(options)
    }

    pub fn with_build_arg(mut self, name: &str, value: &str) -> Self {
        self.build_args.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_target_platform(mut self, platform: Platform) -> Self {
        self.target_platform = platform;
        self
    }
}
