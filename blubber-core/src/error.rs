//! Error types for blubber.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::config::dep_graph::DepGraphError;
use crate::config::validation::ValidationErrors;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for blubber operations.
pub type Result<T> = std::result::Result<T, BlubberError>;

/// Main error type for blubber.
#[derive(Error, Debug)]
pub enum BlubberError {
    // Reading errors
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    // Expansion errors
    #[error("variant expansion detected loop at '{variant}'")]
    ExpansionLoop { variant: String },

    #[error("variant '{variant}' does not exist")]
    UnknownVariant { variant: String },

    #[error("'{field}' cannot be used together with {peers}")]
    Conflict { field: String, peers: String },

    #[error(transparent)]
    DependencyGraph(#[from] DepGraphError),

    // Compilation errors
    #[error("failed to resolve base image {image}: {reason}")]
    BaseImageResolution { image: String, reason: String },

    #[error("failed to compile variant '{variant}': {source}")]
    Compile {
        variant: String,
        #[source]
        source: Box<BlubberError>,
    },

    #[error("instruction {instruction} failed: {reason}")]
    Instruction { instruction: String, reason: String },

    #[error("invalid build option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("failed to marshal {what}: {reason}")]
    Marshal { what: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    // Policy errors
    #[error("value for \"{path}\" violates policy rule \"{rule}\"")]
    PolicyViolation { path: String, rule: String },

    #[error("failed to load policy from {uri}: {reason}")]
    PolicyLoad { uri: String, reason: String },

    #[error("invalid validation rule \"{rule}\": {reason}")]
    InvalidRule { rule: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlubberError {
    /// Wraps an error with the variant being compiled.
    pub fn compile(variant: impl Into<String>, source: BlubberError) -> Self {
        Self::Compile { variant: variant.into(), source: Box::new(source) }
    }

    /// Returns true when the error is a rejected config version.
    pub fn is_version_mismatch(&self) -> bool {
        match self {
            Self::Validation(errs) => errs.is_version_mismatch(),
            _ => false,
        }
    }

    /// Process exit code for this error, as reported by the CLI.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 2 | the config could not be read or decoded |
    /// | 3 | expansion or compilation failed |
    /// | 4 | the config is invalid |
    /// | 5 | the policy could not be loaded |
    /// | 6 | the config violates the policy |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse { .. } | Self::Io { .. } => 2,
            Self::Validation(_) | Self::Conflict { .. } => 4,
            Self::PolicyLoad { .. } | Self::InvalidRule { .. } => 5,
            Self::PolicyViolation { .. } => 6,
            Self::Compile { source, .. } => match source.as_ref() {
                Self::Validation(_) | Self::Conflict { .. } => 4,
                _ => 3,
            },
            _ => 3,
        }
    }
}
