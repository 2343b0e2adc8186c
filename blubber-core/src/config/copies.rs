//! Files a variant copies in from other variants or the build context.

use super::artifacts::{dedupe_keep_last, merge_artifacts, ArtifactSpec};
use super::validation::{Validate, Validator};
use super::Merge;
use serde::{Deserialize, Deserializer, Serialize};

/// Copies, given as bare variant names or full artifact objects.
///
/// ```yaml
/// copies:
///   - build
///   - { from: local, source: ./config.yaml, destination: ./config.yaml }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CopiesSpec(pub Vec<ArtifactSpec>);

#[derive(Deserialize)]
#[serde(untagged)]
enum CopyEntry {
    Variant(String),
    Artifact(ArtifactSpec),
}

impl<'de> Deserialize<'de> for CopiesSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<CopyEntry>::deserialize(deserializer)?;

        Ok(Self(
            entries
                .into_iter()
                .map(|entry| match entry {
                    CopyEntry::Variant(from) => ArtifactSpec { from, ..Default::default() },
                    CopyEntry::Artifact(artifact) => artifact,
                })
                .collect(),
        ))
    }
}

impl CopiesSpec {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactSpec> {
        self.0.iter()
    }

    /// Expands shorthand entries against the application directory.
    pub fn expand(&self, app_dir: &str) -> Self {
        Self(dedupe_keep_last(self.0.iter().flat_map(|a| a.expand(app_dir)).collect()))
    }
}

impl Merge for CopiesSpec {
    fn merge(&mut self, other: Self) {
        merge_artifacts(&mut self.0, other.0);
    }
}

impl Validate for CopiesSpec {
    fn validate(&self, v: &mut Validator<'_>) {
        v.each("copies", &self.0);
    }
}
