//! Copy descriptors shared by `copies`, `artifacts` and builder `requirements`.

use super::lives::LOCAL_LIB_PREFIX;
use super::validation::{Validate, Validator};
use crate::build::instruction::{Copy, CopyFrom, Instruction};
use crate::build::phase::{Phase, PhaseCompileable};
use crate::paths;
use serde::{Deserialize, Serialize};

/// The `from` keyword naming the local build context.
pub const LOCAL_ARTIFACT_KEYWORD: &str = "local";

/// Files copied from the build context or from another variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactSpec {
    pub from: String,
    pub source: String,
    pub destination: String,
}

impl ArtifactSpec {
    pub fn new(from: &str, source: &str, destination: &str) -> Self {
        Self {
            from: from.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }

    /// Builds a local copy of `source` into the directory that contains it.
    ///
    /// `src/requirements.txt` becomes
    /// `{from: local, source: src/requirements.txt, destination: src/}`.
    pub fn from_short(source: &str) -> Self {
        Self::new(
            LOCAL_ARTIFACT_KEYWORD,
            source,
            &format!("{}/", paths::dir(&paths::clean(source))),
        )
    }

    pub fn is_local(&self) -> bool {
        self.from.is_empty() || self.from == LOCAL_ARTIFACT_KEYWORD
    }

    /// The variant this artifact is copied from, if any.
    pub fn dependency(&self) -> Option<&str> {
        if self.is_local() {
            None
        } else {
            Some(&self.from)
        }
    }

    /// Fills in the defaults for unset fields.
    ///
    /// An empty `from` means the local context. An empty `source` is `.` for
    /// local copies and `app_dir` otherwise, and an empty `destination`
    /// mirrors the source.
    pub fn normalize(&self, app_dir: &str) -> Self {
        let from = if self.from.is_empty() { LOCAL_ARTIFACT_KEYWORD } else { self.from.as_str() };

        let source = match (self.source.is_empty(), from == LOCAL_ARTIFACT_KEYWORD) {
            (false, _) => self.source.as_str(),
            (true, true) => ".",
            (true, false) => app_dir,
        };

        let destination =
            if self.destination.is_empty() { source } else { self.destination.as_str() };

        Self::new(from, source, destination)
    }

    /// Expands a bare `{from: V}` entry into the application directory and
    /// the shared library prefix of `V`.
    ///
    /// Entries with a source or destination, and local entries, are only
    /// normalized.
    pub fn expand(&self, app_dir: &str) -> Vec<Self> {
        if self.is_local() || !self.source.is_empty() || !self.destination.is_empty() {
            return vec![self.normalize(app_dir)];
        }

        vec![
            Self::new(&self.from, app_dir, app_dir),
            Self::new(&self.from, LOCAL_LIB_PREFIX, LOCAL_LIB_PREFIX),
        ]
    }

    /// The copy instruction for this artifact.
    pub fn copy_instruction(&self, sources: Vec<String>, destination: String) -> Instruction {
        let copy = Copy::new(sources, destination);

        if self.is_local() {
            Instruction::Copy(copy)
        } else {
            Instruction::CopyFrom(CopyFrom::new(&self.from, copy))
        }
    }
}

impl PhaseCompileable for ArtifactSpec {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match phase {
            Phase::PostInstall => {
                vec![self.copy_instruction(vec![self.source.clone()], self.destination.clone())]
            }
            _ => Vec::new(),
        }
    }
}

impl Validate for ArtifactSpec {
    fn validate(&self, v: &mut Validator<'_>) {
        v.with_siblings(self, |v| {
            v.field("from", &self.from, "omitempty,variantref");
            v.field("source", &self.source, "requiredwith=destination,relativelocal");
            v.field("destination", &self.destination, "relativelocal");
        });
    }
}

/// Appends `other` to `base`, dropping earlier duplicates so the last
/// occurrence of each artifact wins its position.
pub fn merge_artifacts(base: &mut Vec<ArtifactSpec>, other: Vec<ArtifactSpec>) {
    base.retain(|artifact| !other.contains(artifact));
    base.extend(other);
}

/// Removes duplicates, keeping the last occurrence of each artifact.
pub fn dedupe_keep_last(artifacts: Vec<ArtifactSpec>) -> Vec<ArtifactSpec> {
    let mut result: Vec<ArtifactSpec> = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        result.retain(|existing| existing != &artifact);
        result.push(artifact);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_short() {
        assert_eq!(
            ArtifactSpec::from_short("src/requirements.txt"),
            ArtifactSpec::new("local", "src/requirements.txt", "src/")
        );
        assert_eq!(
            ArtifactSpec::from_short("package.json"),
            ArtifactSpec::new("local", "package.json", "./")
        );
    }

    #[test]
    fn test_normalize_defaults() {
        let local = ArtifactSpec::default().normalize("/srv/app");
        assert_eq!(local, ArtifactSpec::new("local", ".", "."));

        let variant = ArtifactSpec::new("build", "", "").normalize("/srv/app");
        assert_eq!(variant, ArtifactSpec::new("build", "/srv/app", "/srv/app"));

        let partial = ArtifactSpec::new("build", "/srv/app/bin", "").normalize("/srv/app");
        assert_eq!(partial.destination, "/srv/app/bin");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for spec in [
            ArtifactSpec::default(),
            ArtifactSpec::new("build", "", "/dest"),
            ArtifactSpec::new("", "foo", ""),
        ] {
            let once = spec.normalize("/srv/app");
            assert_eq!(once.normalize("/srv/app"), once);
        }
    }

    #[test]
    fn test_expand_variant_shorthand() {
        let expanded = ArtifactSpec::new("build", "", "").expand("/srv/app");

        assert_eq!(
            expanded,
            vec![
                ArtifactSpec::new("build", "/srv/app", "/srv/app"),
                ArtifactSpec::new("build", "/opt/lib", "/opt/lib"),
            ]
        );
    }

    #[test]
    fn test_expand_local_shorthand() {
        let expanded = ArtifactSpec::new("local", "", "").expand("/srv/app");
        assert_eq!(expanded, vec![ArtifactSpec::new("local", ".", ".")]);
    }

    #[test]
    fn test_dedupe_keeps_last() {
        let a = ArtifactSpec::new("build", "/a", "/a");
        let b = ArtifactSpec::new("build", "/b", "/b");

        assert_eq!(dedupe_keep_last(vec![a.clone(), b.clone(), a.clone()]), vec![b, a]);
    }

    #[test]
    fn test_merge_artifacts_is_idempotent() {
        let list =
            vec![ArtifactSpec::new("build", "/a", "/a"), ArtifactSpec::new("local", ".", ".")];

        let mut merged = list.clone();
        merge_artifacts(&mut merged, list.clone());
        assert_eq!(merged, list);
    }

    #[test]
    fn test_post_install_copies() {
        let local = ArtifactSpec::new("local", ".", ".");
        assert_eq!(
            local.instructions_for_phase(Phase::PostInstall),
            vec![Instruction::Copy(Copy::new(vec![".".into()], ".".into()))]
        );

        let remote = ArtifactSpec::new("build", "/srv/app", "/srv/app");
        assert_eq!(
            remote.instructions_for_phase(Phase::PostInstall),
            vec![Instruction::CopyFrom(CopyFrom::new(
                "build",
                Copy::new(vec!["/srv/app".into()], "/srv/app".into())
            ))]
        );
        assert!(remote.instructions_for_phase(Phase::PreInstall).is_empty());
    }
}
