//! Files a builder needs before it can install dependencies.

use super::artifacts::{ArtifactSpec, LOCAL_ARTIFACT_KEYWORD};
use super::validation::{Validate, Validator};
use crate::build::instruction::Instruction;
use crate::paths;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Requirement files, given as bare paths or full artifact objects.
///
/// ```yaml
/// requirements:
///   - package.json
///   - { from: build, source: /srv/app/composer.lock, destination: ./ }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequirementsSpec(pub Vec<ArtifactSpec>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementEntry {
    Short(String),
    Long(ArtifactSpec),
}

impl<'de> Deserialize<'de> for RequirementsSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<RequirementEntry>::deserialize(deserializer)?;

        Ok(Self(
            entries
                .into_iter()
                .map(|entry| match entry {
                    RequirementEntry::Short(source) => ArtifactSpec::from_short(&source),
                    RequirementEntry::Long(artifact) => artifact,
                })
                .collect(),
        ))
    }
}

impl RequirementsSpec {
    pub fn from_short<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        Self(sources.into_iter().map(ArtifactSpec::from_short).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactSpec> {
        self.0.iter()
    }

    /// Variants the requirements are copied from.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(ArtifactSpec::dependency)
    }

    /// Where each requirement file lands, relative to `dir`.
    pub fn destination_paths(&self, dir: &str) -> Vec<String> {
        self.0.iter().map(|artifact| Self::file_destination(artifact, dir)).collect()
    }

    /// Copy instructions placing every requirement under `dir`.
    ///
    /// Files sharing a source and destination directory are copied together,
    /// sources in declaration order and destinations sorted.
    pub fn copy_instructions(&self, dir: &str) -> Vec<Instruction> {
        let mut from_order: Vec<&str> = Vec::new();
        let mut grouped: BTreeMap<&str, BTreeMap<String, (&ArtifactSpec, Vec<String>)>> =
            BTreeMap::new();

        for artifact in &self.0 {
            let from =
                if artifact.is_local() { LOCAL_ARTIFACT_KEYWORD } else { artifact.from.as_str() };

            if !from_order.contains(&from) {
                from_order.push(from);
            }

            grouped
                .entry(from)
                .or_default()
                .entry(Self::destination_dir(artifact, dir))
                .or_insert_with(|| (artifact, Vec::new()))
                .1
                .push(paths::clean(&artifact.source));
        }

        let mut instructions = Vec::new();

        for from in from_order {
            if let Some(destinations) = grouped.remove(from) {
                for (destination, (artifact, sources)) in destinations {
                    instructions.push(artifact.copy_instruction(sources, destination));
                }
            }
        }

        instructions
    }

    fn destination_dir(artifact: &ArtifactSpec, dir: &str) -> String {
        let destination = if artifact.destination.is_empty() {
            format!("{}/", paths::dir(&paths::clean(&artifact.source)))
        } else {
            artifact.destination.clone()
        };

        paths::resolve(dir, &destination)
    }

    fn file_destination(artifact: &ArtifactSpec, dir: &str) -> String {
        let destination = Self::destination_dir(artifact, dir);

        if destination.ends_with('/') {
            paths::join([destination.as_str(), &paths::base(&artifact.source)])
        } else {
            destination
        }
    }
}

impl Validate for RequirementsSpec {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("requirements", &self.0, "omitempty,unique");
        v.each("requirements", &self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::instruction::{Copy, CopyFrom};

    #[test]
    fn test_deserialize_mixed_forms() {
        let reqs: RequirementsSpec = serde_yaml::from_str(
            "- package.json\n- {from: build, source: /srv/app/composer.lock, destination: ./}",
        )
        .unwrap();

        assert_eq!(
            reqs.0,
            vec![
                ArtifactSpec::new("local", "package.json", "./"),
                ArtifactSpec::new("build", "/srv/app/composer.lock", "./"),
            ]
        );
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let res: Result<RequirementsSpec, _> = serde_yaml::from_str("- {source: a, bogus: b}");
        assert!(res.is_err());
    }

    #[test]
    fn test_copy_instructions_group_by_destination() {
        let reqs = RequirementsSpec(vec![
            ArtifactSpec::from_short("requirements.txt"),
            ArtifactSpec::from_short("src/requirements-test.txt"),
            ArtifactSpec::from_short("requirements-dev.txt"),
            ArtifactSpec::new("build", "/srv/app/lib.whl", "wheels/"),
        ]);

        assert_eq!(
            reqs.copy_instructions("/srv/app"),
            vec![
                Instruction::Copy(Copy::new(
                    vec!["requirements.txt".into(), "requirements-dev.txt".into()],
                    "/srv/app/".into()
                )),
                Instruction::Copy(Copy::new(
                    vec!["src/requirements-test.txt".into()],
                    "/srv/app/src/".into()
                )),
                Instruction::CopyFrom(CopyFrom::new(
                    "build",
                    Copy::new(vec!["/srv/app/lib.whl".into()], "/srv/app/wheels/".into())
                )),
            ]
        );
    }

    #[test]
    fn test_destination_paths() {
        let reqs = RequirementsSpec::from_short(["requirements.txt", "src/test.txt"]);

        assert_eq!(
            reqs.destination_paths("."),
            vec!["requirements.txt".to_string(), "src/test.txt".to_string()]
        );
    }
}
