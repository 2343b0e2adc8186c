//! Debian packages installed while privileged.

use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, Run, RunAll};
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AptConfig {
    pub packages: Vec<String>,
}

impl Merge for AptConfig {
    /// Appends packages not already listed.
    fn merge(&mut self, other: Self) {
        for package in other.packages {
            if !self.packages.contains(&package) {
                self.packages.push(package);
            }
        }
    }
}

impl PhaseCompileable for AptConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        if phase != Phase::Privileged || self.packages.is_empty() {
            return Vec::new();
        }

        vec![Instruction::RunAll(RunAll::new(vec![
            Run::new("apt-get update", Vec::<String>::new()),
            Run::new("apt-get install -y", self.packages.clone()),
            Run::new("rm -rf /var/lib/apt/lists/*", Vec::<String>::new()),
        ]))]
    }
}

impl Validate for AptConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("packages", &self.packages, "dive,debianpackage");
    }
}
