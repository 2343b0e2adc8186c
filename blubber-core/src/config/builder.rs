//! Arbitrary build commands.

use super::requirements::RequirementsSpec;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, Run};
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

/// A command run after its requirements have been copied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsSpec>,
}

impl BuilderConfig {
    pub fn new<'a>(command: impl IntoIterator<Item = &'a str>) -> Self {
        Self { command: Some(command.into_iter().map(String::from).collect()), requirements: None }
    }
}

impl Merge for BuilderConfig {
    fn merge(&mut self, other: Self) {
        if other.command.is_some() {
            self.command = other.command;
        }

        if other.requirements.is_some() {
            self.requirements = other.requirements;
        }
    }
}

impl PhaseCompileable for BuilderConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        let Some((program, args)) = self.command.as_deref().and_then(|c| c.split_first()) else {
            return Vec::new();
        };

        match phase {
            Phase::PreInstall => {
                self.requirements.iter().flat_map(|r| r.copy_instructions(".")).collect()
            }
            Phase::PostInstall => {
                vec![Instruction::Run(Run::literal(program.clone(), args.to_vec()))]
            }
            _ => Vec::new(),
        }
    }
}

impl Validate for BuilderConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        if let Some(requirements) = &self.requirements {
            requirements.validate(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::instruction::Copy;

    #[test]
    fn test_runs_command_after_requirements() {
        let builder = BuilderConfig {
            requirements: Some(RequirementsSpec::from_short(["Makefile", "src/"])),
            ..BuilderConfig::new(["make", "-f", "Makefile", "test"])
        };

        assert_eq!(
            builder.instructions_for_phase(Phase::PreInstall),
            vec![Instruction::Copy(Copy::new(vec!["Makefile".into(), "src".into()], "./".into()))]
        );

        let post = builder.instructions_for_phase(Phase::PostInstall);
        let Instruction::Run(run) = &post[0] else {
            panic!("expected Run");
        };
        assert_eq!(run.compile().unwrap(), r#"make "-f" "Makefile" "test""#);
    }

    #[test]
    fn test_percent_in_command_is_literal() {
        let builder = BuilderConfig::new(["date", "+%Y-%m-%d"]);

        let post = builder.instructions_for_phase(Phase::PostInstall);
        let Instruction::Run(run) = &post[0] else {
            panic!("expected Run");
        };
        assert_eq!(run.compile().unwrap(), r#"date "+%Y-%m-%d""#);
    }

    #[test]
    fn test_empty_command_is_noop() {
        let builder = BuilderConfig {
            requirements: Some(RequirementsSpec::from_short(["Makefile"])),
            ..Default::default()
        };

        for phase in Phase::ALL {
            assert!(builder.instructions_for_phase(phase).is_empty());
        }
    }
}
