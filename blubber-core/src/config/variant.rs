//! A named variant: shared config plus includes, copies and artifacts.

use super::artifacts::{dedupe_keep_last, merge_artifacts, ArtifactSpec};
use super::common::CommonConfig;
use super::copies::CopiesSpec;
use super::validation::{Validate, Validator};
use super::{common_from, take_field, Merge};
use crate::build::instruction::Instruction;
use crate::build::macros;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariantConfig {
    /// Variants merged in before this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includes: Option<Vec<String>>,
    pub copies: CopiesSpec,
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(flatten)]
    pub common: CommonConfig,
}

impl<'de> Deserialize<'de> for VariantConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut doc = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();

        let includes = take_field::<_, D::Error>(&mut doc, "includes")?;
        let copies = take_field::<_, D::Error>(&mut doc, "copies")?.unwrap_or_default();
        let artifacts = take_field::<_, D::Error>(&mut doc, "artifacts")?.unwrap_or_default();
        let common = common_from::<D::Error>(doc)?;

        Ok(Self { includes, copies, artifacts, common })
    }
}

impl VariantConfig {
    /// Expands copies and normalizes artifacts against the application
    /// directory.
    pub(crate) fn materialize(&mut self) {
        let app_dir = self.common.lives.dir.clone();

        self.copies = self.copies.expand(&app_dir);
        self.artifacts =
            dedupe_keep_last(self.artifacts.iter().map(|a| a.normalize(&app_dir)).collect());
    }

    /// Variants this one copies files from, in order of first reference.
    pub fn variant_dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();

        let referenced = self
            .copies
            .iter()
            .chain(self.artifacts.iter())
            .filter_map(ArtifactSpec::dependency)
            .chain(self.common.requirement_dependencies());

        for dep in referenced {
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }

        deps
    }

    /// Copies and artifacts, duplicates dropped.
    fn all_artifacts(&self) -> Vec<ArtifactSpec> {
        dedupe_keep_last(self.copies.iter().chain(self.artifacts.iter()).cloned().collect())
    }
}

impl Merge for VariantConfig {
    fn merge(&mut self, other: Self) {
        if other.includes.is_some() {
            self.includes = other.includes;
        }

        self.copies.merge(other.copies);
        merge_artifacts(&mut self.artifacts, other.artifacts);
        self.common.merge(other.common);
    }
}

impl PhaseCompileable for VariantConfig {
    /// Component instructions for `phase`, framed by the user switches the
    /// phase requires.
    ///
    /// Privileged instructions run as root and later ones as the `lives`
    /// owner. Files copied in the install phases are owned by `lives`. After
    /// installation the image drops to the `runs` user unless it runs
    /// insecurely.
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        let common = &self.common;
        let lives = &common.lives.user;
        let runs = &common.runs.user;
        let scratch = common.is_scratch();

        let mut instructions = Vec::new();

        match phase {
            Phase::Privileged if !scratch => {
                instructions.push(Instruction::User("root".to_string()));
            }
            Phase::PrivilegeDropped if !scratch => {
                instructions.push(Instruction::User(format!("{}:{}", lives.uid, lives.gid)));
            }
            _ => {}
        }

        instructions.extend(common.instructions_for_phase(phase));

        if phase == Phase::PostInstall {
            for artifact in self.all_artifacts() {
                instructions.extend(artifact.instructions_for_phase(phase));
            }

            if !scratch && !common.runs.insecurely.is_true() {
                instructions.push(Instruction::User(format!("{}:{}", runs.uid, runs.gid)));
            }

            if let Some(entrypoint) = common.entrypoint.as_ref().filter(|e| !e.is_empty()) {
                instructions.push(Instruction::EntryPoint(entrypoint.clone()));
            }
        }

        match phase {
            Phase::PreInstall | Phase::PostInstall => {
                macros::apply_user(lives.uid, lives.gid, instructions)
            }
            _ => instructions,
        }
    }
}

impl Validate for VariantConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("includes", &self.includes, "omitempty,dive,variantref");
        self.copies.validate(v);
        v.each("artifacts", &self.artifacts);
        self.common.validate(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::instruction::{Copy, CopyAs, CopyFrom};
    use crate::config::flag::Flag;

    fn production() -> VariantConfig {
        VariantConfig {
            copies: CopiesSpec(vec![ArtifactSpec::new("build", "/srv/app", "/srv/app")]),
            artifacts: vec![ArtifactSpec::new("local", "config.yaml", "config.yaml")],
            common: CommonConfig {
                base: "foo/bar".into(),
                entrypoint: Some(vec!["./server".into()]),
                ..CommonConfig::defaults()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_deserialize_rejects_unknown_field() {
        let res: Result<VariantConfig, _> = serde_yaml::from_str("base: foo\nbogus: true");
        assert!(res.is_err());

        let variant: VariantConfig =
            serde_yaml::from_str("includes: [build]\ncopies: [build]\nbase: foo").unwrap();
        assert_eq!(variant.includes, Some(vec!["build".to_string()]));
        assert_eq!(variant.common.base, "foo");
    }

    #[test]
    fn test_privileged_starts_as_root() {
        let instructions = production().instructions_for_phase(Phase::Privileged);
        assert_eq!(instructions[0], Instruction::User("root".into()));
    }

    #[test]
    fn test_post_install_copies_as_owner_then_drops() {
        let instructions = production().instructions_for_phase(Phase::PostInstall);

        assert_eq!(
            instructions,
            vec![
                Instruction::CopyAs(CopyAs::new(
                    65533,
                    65533,
                    Instruction::CopyFrom(CopyFrom::new(
                        "build",
                        Copy::new(vec!["/srv/app".into()], "/srv/app".into())
                    ))
                )),
                Instruction::CopyAs(CopyAs::new(
                    65533,
                    65533,
                    Instruction::Copy(Copy::new(vec!["config.yaml".into()], "config.yaml".into()))
                )),
                Instruction::User("900:900".into()),
                Instruction::EntryPoint(vec!["./server".into()]),
            ]
        );
    }

    #[test]
    fn test_insecure_keeps_lives_user() {
        let mut variant = production();
        variant.common.runs.insecurely = Flag::new(true);

        let instructions = variant.instructions_for_phase(Phase::PostInstall);
        assert!(!instructions.iter().any(|i| matches!(i, Instruction::User(_))));
    }

    #[test]
    fn test_scratch_keeps_artifacts_and_entrypoint() {
        let mut variant = production();
        variant.common.base = String::new();

        assert!(variant.instructions_for_phase(Phase::Privileged).is_empty());

        let post = variant.instructions_for_phase(Phase::PostInstall);
        assert_eq!(post.len(), 3);
        assert_eq!(post[2], Instruction::EntryPoint(vec!["./server".into()]));
    }

    #[test]
    fn test_variant_dependencies() {
        let mut variant = production();
        variant.artifacts.push(ArtifactSpec::new("assets", "/srv/app/public", "public"));
        variant.copies.0.push(ArtifactSpec::new("build", "/opt/lib", "/opt/lib"));

        assert_eq!(variant.variant_dependencies(), vec!["build", "assets"]);
    }

    #[test]
    fn test_self_merge_is_identity() {
        let mut variant = production();
        variant.includes = Some(vec!["build".into()]);

        let mut merged = variant.clone();
        merged.merge(variant.clone());
        assert_eq!(merged, variant);
    }
}
