//! Runtime user and environment.

use super::flag::Flag;
use super::user::UserConfig;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, RunAll};
use crate::build::macros;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The account the application runs as, and its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RunsDocument")]
pub struct RunsConfig {
    #[serde(flatten)]
    pub user: UserConfig,
    pub environment: BTreeMap<String, String>,
    pub insecurely: Flag,
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunsDocument {
    #[serde(rename = "as")]
    name: String,
    uid: u32,
    gid: u32,
    environment: BTreeMap<String, String>,
    insecurely: Flag,
}

impl From<RunsDocument> for RunsConfig {
    fn from(doc: RunsDocument) -> Self {
        Self {
            user: UserConfig { name: doc.name, uid: doc.uid, gid: doc.gid },
            environment: doc.environment,
            insecurely: doc.insecurely,
        }
    }
}

impl RunsConfig {
    /// The built-in runtime user: `runuser` (900:900).
    pub fn defaults() -> Self {
        Self { user: UserConfig::new("runuser", 900, 900), ..Default::default() }
    }

    pub fn home(&self) -> String {
        self.user.home()
    }
}

impl Merge for RunsConfig {
    fn merge(&mut self, other: Self) {
        self.user.merge(other.user);
        self.environment.extend(other.environment);
        self.insecurely.merge(other.insecurely);
    }
}

impl PhaseCompileable for RunsConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match phase {
            Phase::Privileged if !self.insecurely.is_true() => vec![
                Instruction::string_arg("RUNS_AS", &self.user.name),
                Instruction::uint_arg("RUNS_UID", self.user.uid),
                Instruction::uint_arg("RUNS_GID", self.user.gid),
                Instruction::RunAll(RunAll::new(macros::create_user(
                    "$RUNS_AS",
                    "$RUNS_UID",
                    "$RUNS_GID",
                ))),
            ],
            Phase::PrivilegeDropped => {
                let mut instructions = vec![Instruction::env([("HOME", self.home())])];

                if !self.environment.is_empty() {
                    instructions.push(Instruction::Env(self.environment.clone()));
                }

                instructions
            }
            _ => Vec::new(),
        }
    }
}

impl Validate for RunsConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        self.user.validate(v);
        v.field("environment", &self.environment, "envvars");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_environment() {
        let mut runs = RunsConfig::defaults();
        runs.environment.insert("FOO".into(), "bar".into());
        runs.environment.insert("KEEP".into(), "me".into());

        let mut other = RunsConfig::default();
        other.environment.insert("FOO".into(), "baz".into());
        other.insecurely = Flag::new(true);
        runs.merge(other);

        assert_eq!(runs.environment["FOO"], "baz");
        assert_eq!(runs.environment["KEEP"], "me");
        assert!(runs.insecurely.is_true());
        assert_eq!(runs.user.name, "runuser");
    }

    #[test]
    fn test_privilege_dropped_env() {
        let mut runs = RunsConfig::defaults();
        runs.environment.insert("FOO".into(), "bar".into());

        assert_eq!(
            runs.instructions_for_phase(Phase::PrivilegeDropped),
            vec![
                Instruction::env([("HOME", "/home/runuser")]),
                Instruction::env([("FOO", "bar")]),
            ]
        );
    }

    #[test]
    fn test_insecure_skips_user_creation() {
        let mut runs = RunsConfig::defaults();
        assert_eq!(runs.instructions_for_phase(Phase::Privileged).len(), 4);

        runs.insecurely = Flag::new(true);
        assert!(runs.instructions_for_phase(Phase::Privileged).is_empty());
    }

    #[test]
    fn test_deserialize() {
        let runs: RunsConfig = serde_yaml::from_str(
            "as: someuser\nuid: 666\ngid: 777\ninsecurely: true\nenvironment: {FOO: bar}",
        )
        .unwrap();

        assert_eq!(runs.user, UserConfig::new("someuser", 666, 777));
        assert!(runs.insecurely.is_true());
        assert_eq!(runs.environment["FOO"], "bar");
    }
}
