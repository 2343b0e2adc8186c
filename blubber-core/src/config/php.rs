//! PHP dependency installation with composer.

use super::flag::Flag;
use super::requirements::RequirementsSpec;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, Run, RunAll};
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsSpec>,
    pub production: Flag,
}

impl Merge for PhpConfig {
    fn merge(&mut self, other: Self) {
        if other.requirements.is_some() {
            self.requirements = other.requirements;
        }

        self.production.merge(other.production);
    }
}

impl PhaseCompileable for PhpConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match (phase, &self.requirements) {
            (Phase::PreInstall, Some(requirements)) if !requirements.is_empty() => {
                let mut args = vec!["--no-scripts"];
                if self.production.is_true() {
                    args.push("--no-dev");
                }

                let mut instructions = requirements.copy_instructions(".");
                instructions.push(Instruction::RunAll(RunAll::new(vec![Run::new(
                    "composer install",
                    args,
                )])));
                instructions
            }
            _ => Vec::new(),
        }
    }
}

impl Validate for PhpConfig {
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
    fn test_pre_install_composer() {
        let php = PhpConfig {
            requirements: Some(RequirementsSpec::from_short(["composer.json", "composer.lock"])),
            production: Flag::new(true),
        };

        let instructions = php.instructions_for_phase(Phase::PreInstall);
        assert_eq!(
            instructions[0],
            Instruction::Copy(Copy::new(
                vec!["composer.json".into(), "composer.lock".into()],
                "./".into()
            ))
        );

        let Instruction::RunAll(install) = &instructions[1] else {
            panic!("expected RunAll");
        };
        assert_eq!(install.compile().unwrap(), r#"composer install "--no-scripts" "--no-dev""#);
    }

    #[test]
    fn test_nothing_without_requirements() {
        let php = PhpConfig { production: Flag::new(true), ..Default::default() };

        for phase in Phase::ALL {
            assert!(php.instructions_for_phase(phase).is_empty());
        }
    }
}
