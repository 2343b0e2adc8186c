//! Node.js dependency installation with npm.

use super::flag::Flag;
use super::lives::LOCAL_LIB_PREFIX;
use super::requirements::RequirementsSpec;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, Run, RunAll};
use crate::build::phase::{Phase, PhaseCompileable};
use crate::paths;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsSpec>,
    pub env: String,
    #[serde(rename = "use-npm-ci")]
    pub use_npm_ci: Flag,
}

impl NodeConfig {
    fn has_requirements(&self) -> bool {
        self.requirements.as_ref().is_some_and(|r| !r.is_empty())
    }

    fn install(&self) -> RunAll {
        let production = self.env == "production";

        let install = if self.use_npm_ci.is_true() {
            Run::new("npm ci", Vec::<String>::new())
        } else if production {
            Run::new("npm install", ["--production"])
        } else {
            Run::new("npm install", Vec::<String>::new())
        };

        let mut runs = vec![Run::new("cd", [LOCAL_LIB_PREFIX]), install];

        if production {
            runs.push(Run::new("npm dedupe", Vec::<String>::new()));
        }

        RunAll::new(runs)
    }
}

impl Merge for NodeConfig {
    fn merge(&mut self, other: Self) {
        if other.requirements.is_some() {
            self.requirements = other.requirements;
        }

        if !other.env.is_empty() {
            self.env = other.env;
        }

        self.use_npm_ci.merge(other.use_npm_ci);
    }
}

impl PhaseCompileable for NodeConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match (phase, &self.requirements) {
            (Phase::PreInstall, Some(requirements)) if !requirements.is_empty() => {
                let mut instructions = requirements.copy_instructions(LOCAL_LIB_PREFIX);
                instructions.push(Instruction::RunAll(self.install()));
                instructions
            }
            (Phase::PostInstall, _) if !self.env.is_empty() || self.has_requirements() => {
                let modules = paths::join([LOCAL_LIB_PREFIX, "node_modules"]);

                vec![Instruction::env([
                    ("NODE_ENV", self.env.clone()),
                    ("NODE_PATH", modules.clone()),
                    ("PATH", format!("{}:${{PATH}}", paths::join([modules.as_str(), ".bin"]))),
                ])]
            }
            _ => Vec::new(),
        }
    }
}

impl Validate for NodeConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("env", &self.env, "omitempty,nodeenv");

        if let Some(requirements) = &self.requirements {
            requirements.validate(v);
        }
    }
}
